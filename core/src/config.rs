//! Configuration loading and validation for tunnelwatch
//!
//! This module parses a TOML configuration into a [`MonitorConfig`], applies
//! defaults matching the standard project layout (via serde defaults), and
//! performs strict validation with field-path error messages.
//!
//! ```toml
//! projectRoot = "/opt/dns-detector"
//! pollIntervalMs = 2000
//!
//! [capture]
//! command = ["python3", "capture.py"]
//! logFile = "dns_log.csv"
//!
//! [analysis]
//! command = ["python3", "predict.py"]
//! modelFile = "best_dns_model.pkl"
//! suspiciousMarkers = ["Suspicious", "🔴"]
//! ```

use crate::supervisor::LaunchSpec;
use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(windows)]
const PYTHON: &str = "python";
#[cfg(not(windows))]
const PYTHON: &str = "python3";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MonitorConfig {
    /// Directory the collaborators run in; relative artifact paths resolve here
    #[serde(default = "default_project_root")]
    pub project_root: PathBuf,
    /// Interval between two polls of the capture log
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Capture producer settings
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Analysis job settings
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

/// Settings for the long-running capture producer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    /// Program followed by its arguments
    #[serde(default = "default_capture_command")]
    pub command: Vec<String>,
    /// Script that must exist before the capture is launched
    #[serde(default = "default_capture_script")]
    pub script: PathBuf,
    /// CSV file the producer appends to
    #[serde(default = "default_capture_log")]
    pub log_file: PathBuf,
    /// Delay after launch before checking for an immediate exit
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// How long to wait after the graceful signal before killing
    #[serde(default = "default_graceful_timeout_ms")]
    pub graceful_timeout_ms: u64,
    /// How long to wait for the forced kill to be reaped
    #[serde(default = "default_kill_timeout_ms")]
    pub kill_timeout_ms: u64,
    /// Upper bound on collecting output from a process that died at startup
    #[serde(default = "default_diagnostics_timeout_ms")]
    pub diagnostics_timeout_ms: u64,
}

/// Settings for the batch analysis job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    /// Program followed by its arguments
    #[serde(default = "default_analysis_command")]
    pub command: Vec<String>,
    /// Script that must exist before the analysis is launched
    #[serde(default = "default_analysis_script")]
    pub script: PathBuf,
    /// Pre-trained model artifact read by the analysis job
    #[serde(default = "default_model_file")]
    pub model_file: PathBuf,
    /// CSV file rewritten by every successful run
    #[serde(default = "default_predictions_file")]
    pub predictions_file: PathBuf,
    /// Substrings of a prediction label that mark a row as suspicious
    #[serde(default = "default_suspicious_markers")]
    pub suspicious_markers: Vec<String>,
}

fn default_project_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_capture_command() -> Vec<String> {
    vec![PYTHON.to_string(), "capture.py".to_string()]
}

fn default_capture_script() -> PathBuf {
    PathBuf::from("capture.py")
}

fn default_capture_log() -> PathBuf {
    PathBuf::from("dns_log.csv")
}

fn default_grace_period_ms() -> u64 {
    500
}

fn default_graceful_timeout_ms() -> u64 {
    3000
}

fn default_kill_timeout_ms() -> u64 {
    2000
}

fn default_diagnostics_timeout_ms() -> u64 {
    1000
}

fn default_analysis_command() -> Vec<String> {
    vec![PYTHON.to_string(), "predict.py".to_string()]
}

fn default_analysis_script() -> PathBuf {
    PathBuf::from("predict.py")
}

fn default_model_file() -> PathBuf {
    PathBuf::from("best_dns_model.pkl")
}

fn default_predictions_file() -> PathBuf {
    PathBuf::from("dns_predictions.csv")
}

fn default_suspicious_markers() -> Vec<String> {
    vec!["Suspicious".to_string(), "🔴".to_string()]
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            project_root: default_project_root(),
            poll_interval_ms: default_poll_interval_ms(),
            capture: CaptureConfig::default(),
            analysis: AnalysisConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            command: default_capture_command(),
            script: default_capture_script(),
            log_file: default_capture_log(),
            grace_period_ms: default_grace_period_ms(),
            graceful_timeout_ms: default_graceful_timeout_ms(),
            kill_timeout_ms: default_kill_timeout_ms(),
            diagnostics_timeout_ms: default_diagnostics_timeout_ms(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            command: default_analysis_command(),
            script: default_analysis_script(),
            model_file: default_model_file(),
            predictions_file: default_predictions_file(),
            suspicious_markers: default_suspicious_markers(),
        }
    }
}

impl MonitorConfig {
    /// Default configuration rooted at `project_root`
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            ..Self::default()
        }
    }

    /// Resolve a configured path against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    /// Absolute location of the capture log
    pub fn capture_log_path(&self) -> PathBuf {
        self.resolve(&self.capture.log_file)
    }

    /// Absolute location of the predictions file
    pub fn predictions_path(&self) -> PathBuf {
        self.resolve(&self.analysis.predictions_file)
    }

    /// Poll interval as a Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Launch description for the capture producer
    pub fn capture_launch(&self) -> LaunchSpec {
        LaunchSpec::from_command(&self.capture.command, &self.project_root)
            .require("capture script", self.resolve(&self.capture.script))
    }

    /// Launch description for the analysis job
    pub fn analysis_launch(&self) -> LaunchSpec {
        LaunchSpec::from_command(&self.analysis.command, &self.project_root)
            .require("analysis script", self.resolve(&self.analysis.script))
    }

    /// Absolute location of the trained model
    pub fn model_path(&self) -> PathBuf {
        self.resolve(&self.analysis.model_file)
    }

    /// Validate the configuration and return `Result<()>` with field-path errors
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(CoreError::ValidationError(
                "pollIntervalMs: must be > 0".to_string(),
            ));
        }

        validate_command("capture.command", &self.capture.command)?;
        validate_command("analysis.command", &self.analysis.command)?;

        for (field, value) in [
            ("capture.gracePeriodMs", self.capture.grace_period_ms),
            ("capture.gracefulTimeoutMs", self.capture.graceful_timeout_ms),
            ("capture.killTimeoutMs", self.capture.kill_timeout_ms),
        ] {
            if value == 0 {
                return Err(CoreError::ValidationError(format!(
                    "{}: must be > 0",
                    field
                )));
            }
        }

        for (field, path) in [
            ("capture.logFile", &self.capture.log_file),
            ("analysis.modelFile", &self.analysis.model_file),
            ("analysis.predictionsFile", &self.analysis.predictions_file),
        ] {
            if path.as_os_str().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "{}: cannot be empty",
                    field
                )));
            }
        }

        if self.analysis.suspicious_markers.is_empty() {
            return Err(CoreError::ValidationError(
                "analysis.suspiciousMarkers: must contain at least one marker".to_string(),
            ));
        }
        for (i, marker) in self.analysis.suspicious_markers.iter().enumerate() {
            if marker.is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "analysis.suspiciousMarkers[{}]: cannot be empty",
                    i
                )));
            }
        }

        Ok(())
    }
}

fn validate_command(field: &str, command: &[String]) -> Result<()> {
    match command.first() {
        None => Err(CoreError::ValidationError(format!(
            "{}: must contain at least the program",
            field
        ))),
        Some(program) if program.trim().is_empty() => Err(CoreError::ValidationError(format!(
            "{}[0]: program cannot be empty",
            field
        ))),
        Some(_) => Ok(()),
    }
}

/// Load the configuration from a TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<MonitorConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_config_from_toml_str(&data)
}

/// Load the configuration from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<MonitorConfig> {
    let cfg: MonitorConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_defaults() {
        let cfg = load_config_from_toml_str("").expect("should parse");
        assert_eq!(cfg, MonitorConfig::default());
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.capture.grace_period_ms, 500);
        assert_eq!(cfg.analysis.suspicious_markers, vec!["Suspicious", "🔴"]);
    }

    #[test]
    fn parses_overrides() {
        let input = r#"
        projectRoot = "/srv/detector"
        pollIntervalMs = 250

        [capture]
        command = ["sudo", "python3", "capture.py", "--iface", "eth0"]
        logFile = "logs/dns.csv"
        gracefulTimeoutMs = 1500

        [analysis]
        suspiciousMarkers = ["TUNNEL"]
        "#;
        let cfg = load_config_from_toml_str(input).expect("should parse");
        assert_eq!(cfg.project_root, PathBuf::from("/srv/detector"));
        assert_eq!(cfg.poll_interval_ms, 250);
        assert_eq!(cfg.capture.graceful_timeout_ms, 1500);
        assert_eq!(cfg.capture.grace_period_ms, 500);
        assert_eq!(
            cfg.capture_log_path(),
            PathBuf::from("/srv/detector/logs/dns.csv")
        );

        let launch = cfg.capture_launch();
        assert_eq!(launch.program, "sudo");
        assert_eq!(launch.args, vec!["python3", "capture.py", "--iface", "eth0"]);
        assert_eq!(launch.working_dir, PathBuf::from("/srv/detector"));
        assert_eq!(launch.required.len(), 1);
        assert_eq!(
            launch.required[0].path,
            PathBuf::from("/srv/detector/capture.py")
        );
    }

    #[test]
    fn absolute_paths_are_not_rebased() {
        let mut cfg = MonitorConfig::for_project("/srv/detector");
        cfg.analysis.predictions_file = PathBuf::from("/tmp/preds.csv");
        assert_eq!(cfg.predictions_path(), PathBuf::from("/tmp/preds.csv"));
    }

    #[test]
    fn errors_on_zero_poll_interval() {
        let err = load_config_from_toml_str("pollIntervalMs = 0").unwrap_err();
        assert!(format!("{}", err).contains("pollIntervalMs: must be > 0"));
    }

    #[test]
    fn errors_on_empty_command() {
        let input = r#"
        [capture]
        command = []
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(format!("{}", err).contains("capture.command"));
    }

    #[test]
    fn errors_on_zero_timeout() {
        let input = r#"
        [capture]
        killTimeoutMs = 0
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(format!("{}", err).contains("capture.killTimeoutMs"));
    }

    #[test]
    fn errors_on_empty_marker() {
        let input = r#"
        [analysis]
        suspiciousMarkers = ["Suspicious", ""]
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(format!("{}", err).contains("analysis.suspiciousMarkers[1]"));
    }

    #[test]
    fn reports_unreadable_file() {
        let err = load_config_from_toml_path("/definitely/not/here.toml").unwrap_err();
        assert_eq!(err.code(), "CORE001");
    }
}
