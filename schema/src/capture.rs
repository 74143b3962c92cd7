//! Capture session state and process exit types
//!
//! A capture session moves through the following states:
//!
//! ```text
//! Idle → Starting → Running → Stopping → Idle
//!            └──→ FailedImmediately → Idle
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::SystemTime;

/// Lifecycle state of the supervised capture process
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum CaptureState {
    /// No capture process is supervised
    #[default]
    Idle,
    /// The process was launched and the grace period is running
    Starting,
    /// The process survived the grace period
    Running,
    /// Termination is in progress
    Stopping,
    /// The process exited before the grace period elapsed
    FailedImmediately,
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::FailedImmediately => "failed immediately",
        };
        f.write_str(label)
    }
}

/// Information about a process that exited
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessExit {
    /// Process ID that exited
    pub pid: u32,

    /// Exit code (None if killed by signal)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Signal that killed the process (Unix only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,

    /// Timestamp when the exit was detected
    pub timestamp: String,
}

impl ProcessExit {
    /// Check if this represents a successful exit (code 0)
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Short human-readable description of how the process ended
    pub fn describe(&self) -> String {
        match (self.exit_code, self.signal) {
            (Some(code), _) => format!("exit code {}", code),
            (None, Some(sig)) => format!("signal {}", sig),
            (None, None) => "unknown status".to_string(),
        }
    }
}

/// Create a current timestamp string in RFC3339 format
pub fn current_timestamp() -> String {
    humantime::format_rfc3339_seconds(SystemTime::now()).to_string()
}
