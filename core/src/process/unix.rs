//! Unix process management with safe spawn/kill using process groups
//!
//! This module provides Unix-specific process management capabilities that use
//! process groups (via `setsid()`) to ensure safe and reliable process cleanup.
//!
//! ## Safety
//!
//! - All spawned processes are placed in their own process group using `setsid()`
//! - Signals are sent to the entire process group, so helpers the capture
//!   producer starts (e.g. a privileged sniffer) are terminated with it
//! - SIGTERM is used for graceful termination, SIGKILL for forceful termination
//! - A `ChildProcess` dropped while still running kills its group
//!
//! ## Process Groups
//!
//! When a process calls `setsid()`, it:
//! - Creates a new session and becomes the session leader
//! - Creates a new process group and becomes the process group leader
//! - Has no controlling terminal
//!
//! This allows us to signal the entire process tree by sending signals to the
//! negative process ID (which targets the process group).

// Allow unsafe code for this module since process management requires libc::setsid() calls
#![allow(unsafe_code)]

use super::StdioMode;
use crate::{CoreError, Result};
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, error, warn};

/// A child process managed with Unix process groups
///
/// The process is guaranteed to be in its own process group, allowing for
/// reliable cleanup of the entire process tree.
#[derive(Debug)]
pub struct ChildProcess {
    /// The process ID of the spawned process
    pid: Pid,
    /// The underlying Child handle for waiting and status checking
    child: Child,
    /// Set once an exit status has been observed
    reaped: bool,
}

impl ChildProcess {
    /// Get the process ID
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Wait for the process to exit and return its exit status (async)
    pub async fn wait(&mut self) -> Result<std::process::ExitStatus> {
        let status = self.child.wait().await.map_err(|e| {
            CoreError::ProcessWait(format!("Failed to wait for process {}: {}", self.pid, e))
        })?;
        self.reaped = true;
        Ok(status)
    }

    /// Try to wait for the process to exit without blocking
    pub fn try_wait(&mut self) -> Result<Option<std::process::ExitStatus>> {
        let status = self.child.try_wait().map_err(|e| {
            CoreError::ProcessWait(format!(
                "Failed to try_wait for process {}: {}",
                self.pid, e
            ))
        })?;
        if status.is_some() {
            self.reaped = true;
        }
        Ok(status)
    }

    /// Take the stdout handle for async reading, if available
    pub fn take_stdout(&mut self) -> Option<tokio::process::ChildStdout> {
        self.child.stdout.take()
    }

    /// Take the stderr handle for async reading, if available
    pub fn take_stderr(&mut self) -> Option<tokio::process::ChildStderr> {
        self.child.stderr.take()
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        if let Ok(None) = self.child.try_wait() {
            warn!(
                "Process group {} still running on drop, sending SIGKILL",
                self.pid
            );
            let _ = killpg(self.pid, Signal::SIGKILL);
        }
    }
}

/// Spawn a new process in its own process group
///
/// The process is placed in its own process group via `setsid()`, which:
///
/// - Creates a new session with the process as session leader
/// - Creates a new process group with the process as group leader
/// - Detaches from the controlling terminal
///
/// ## Arguments
///
/// * `cmd` - The command to execute (must be in PATH or an absolute path)
/// * `args` - Command line arguments for the process
/// * `cwd` - Working directory for the child, inherited when `None`
/// * `stdio` - How stdout/stderr are wired (`NewConsole` behaves like `Inherit`)
///
/// ## Safety
///
/// This function uses `unsafe` code to call `libc::setsid()` in the `pre_exec`
/// closure. `setsid()` is async-signal-safe and runs in the child between
/// `fork()` and `exec()`.
///
/// ## Example
///
/// ```rust,no_run
/// use tunnelwatch_core::process::{unix::spawn, StdioMode};
///
/// # async fn demo() -> tunnelwatch_core::Result<()> {
/// let child = spawn("echo", &["hello", "world"], None, StdioMode::Piped)?;
/// println!("Spawned process with PID: {}", child.pid());
/// # Ok(())
/// # }
/// ```
pub fn spawn(
    cmd: &str,
    args: &[&str],
    cwd: Option<&Path>,
    stdio: StdioMode,
) -> Result<ChildProcess> {
    debug!("Spawning process: {} {:?} (cwd: {:?})", cmd, args, cwd);

    let mut command = Command::new(cmd);
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    match stdio {
        StdioMode::Piped => {
            command.stdin(Stdio::null());
            command.stdout(Stdio::piped());
            command.stderr(Stdio::piped());
        }
        StdioMode::Inherit | StdioMode::NewConsole => {
            command.stdin(Stdio::null());
        }
    }

    // Safety: setsid() is async-signal-safe and appropriate for use in pre_exec
    #[deny(unsafe_op_in_unsafe_fn)]
    unsafe {
        command.pre_exec(|| {
            let result = libc::setsid();
            if result == -1 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }

    let child = command.spawn().map_err(|e| {
        error!("Failed to spawn process '{}': {}", cmd, e);
        CoreError::ProcessSpawn(format!("Failed to spawn '{}': {}", cmd, e))
    })?;

    let raw_pid = child
        .id()
        .ok_or_else(|| CoreError::ProcessSpawn("Spawned child did not have a PID".to_string()))?;
    let pid = Pid::from_raw(raw_pid as i32);
    debug!("Successfully spawned process {} in new process group", pid);

    Ok(ChildProcess {
        pid,
        child,
        reaped: false,
    })
}

fn signal_group(child: &ChildProcess, signal: Signal) -> Result<()> {
    debug!("Sending {} to process group {}", signal, child.pid);

    match killpg(child.pid, signal) {
        Ok(()) => {
            debug!("Successfully sent {} to process group {}", signal, child.pid);
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            // Process group doesn't exist, which means it already exited
            debug!("Process group {} already exited", child.pid);
            Ok(())
        }
        Err(nix::errno::Errno::EPERM) => {
            // Permission denied - process may have already exited or changed ownership
            debug!(
                "Permission denied signaling process group {} (likely already exited)",
                child.pid
            );
            Ok(())
        }
        Err(e) => {
            error!(
                "Failed to send {} to process group {}: {}",
                signal, child.pid, e
            );
            Err(CoreError::ProcessSignal(format!(
                "Failed to send {} to process group {}: {}",
                signal, child.pid, e
            )))
        }
    }
}

/// Send SIGTERM to the process group for graceful termination
///
/// ## Error Handling
///
/// - `ESRCH` (No such process) is treated as success since it means the process
///   group has already exited
/// - `EPERM` is treated as success: the group leader may have exited and the
///   id been taken over by a process we do not own
/// - Other errors are propagated as `ProcessSignal` errors
pub fn signal_term_group(child: &ChildProcess) -> Result<()> {
    signal_group(child, Signal::SIGTERM)
}

/// Send SIGKILL to the process group for forceful termination
///
/// Same error handling as [`signal_term_group`].
pub fn signal_kill_group(child: &ChildProcess) -> Result<()> {
    signal_group(child, Signal::SIGKILL)
}

/// Poll `try_wait` until the process exits or `timeout` elapses
pub async fn wait_with_timeout(
    child: &mut ChildProcess,
    timeout: Duration,
) -> Result<Option<std::process::ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() >= timeout {
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_simple_command() {
        let mut child =
            spawn("echo", &["hello", "world"], None, StdioMode::Piped).expect("Failed to spawn echo");
        assert!(child.pid() > 0);
        child.wait().await.expect("wait");
    }

    #[tokio::test]
    async fn test_spawn_and_wait() {
        let mut child = spawn("true", &[], None, StdioMode::Inherit).expect("Failed to spawn true");
        let status = child.wait().await.expect("Failed to wait for process");
        assert!(status.success());
    }

    #[tokio::test]
    async fn test_spawn_respects_working_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut child = spawn(
            "sh",
            &["-c", "touch marker"],
            Some(dir.path()),
            StdioMode::Piped,
        )
        .expect("spawn sh");
        assert!(child.wait().await.expect("wait").success());
        assert!(dir.path().join("marker").exists());
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let result = spawn("nonexistent_command_12345", &[], None, StdioMode::Piped);
        match result {
            Err(CoreError::ProcessSpawn(_)) => {}
            Err(e) => panic!("Expected ProcessSpawn error, got: {}", e),
            Ok(_) => panic!("Expected spawn to fail"),
        }
    }

    #[tokio::test]
    async fn test_signal_exited_process_group_is_ok() {
        let mut child = spawn("true", &[], None, StdioMode::Piped).expect("spawn true");
        child.wait().await.expect("wait");

        assert!(signal_term_group(&child).is_ok());
        assert!(signal_kill_group(&child).is_ok());
    }

    #[tokio::test]
    async fn test_wait_with_timeout_expires_while_running() {
        let mut child = spawn("sleep", &["30"], None, StdioMode::Piped).expect("spawn sleep");
        let found = wait_with_timeout(&mut child, Duration::from_millis(100))
            .await
            .expect("wait");
        assert!(found.is_none());

        signal_kill_group(&child).expect("kill");
        let status = wait_with_timeout(&mut child, Duration::from_secs(2))
            .await
            .expect("wait")
            .expect("exited after SIGKILL");
        assert!(!status.success());
    }
}
