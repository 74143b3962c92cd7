//! Core error types and utilities

use std::path::PathBuf;
use thiserror::Error;

/// Core-specific error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("Missing {what}: {} not found", .path.display())]
    MissingCollaborator { what: String, path: PathBuf },

    #[error("No capture data found in {}; start a capture before analyzing", .0.display())]
    NoCaptureData(PathBuf),

    #[error(
        "Capture process exited immediately ({exit}):\n{diagnostics}\n\
         Check privileges and that the capture dependencies are installed."
    )]
    ImmediateExit { exit: String, diagnostics: String },

    #[error("A capture session is already running")]
    AlreadyRunning,

    #[error("An analysis is already in progress")]
    AnalysisInProgress,

    #[error("Analysis exited with {0}; check its console output for details")]
    AnalysisFailed(String),

    #[error("Transient read failure: {0}")]
    TransientReadFailure(String),

    #[error("Termination failure: {0}")]
    TerminationFailure(String),

    #[error("Process spawn error: {0}")]
    ProcessSpawn(String),

    #[error("Process signal error: {0}")]
    ProcessSignal(String),

    #[error("Process wait error: {0}")]
    ProcessWait(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CoreError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::ConfigurationError(_) => "CORE001",
            CoreError::ValidationError(_) => "CORE002",
            CoreError::InitializationError(_) => "CORE003",
            CoreError::MissingCollaborator { .. } => "CORE010",
            CoreError::NoCaptureData(_) => "CORE011",
            CoreError::ImmediateExit { .. } => "CORE012",
            CoreError::AlreadyRunning => "CORE013",
            CoreError::AnalysisInProgress => "CORE014",
            CoreError::AnalysisFailed(_) => "CORE015",
            CoreError::TransientReadFailure(_) => "CORE016",
            CoreError::TerminationFailure(_) => "CORE017",
            CoreError::ProcessSpawn(_) => "CORE020",
            CoreError::ProcessSignal(_) => "CORE021",
            CoreError::ProcessWait(_) => "CORE022",
            CoreError::IoError(_) => "CORE005",
        }
    }

    /// Whether the error is a warning the caller may continue past
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientReadFailure(_) | CoreError::TerminationFailure(_)
        )
    }

    pub(crate) fn missing(what: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        CoreError::MissingCollaborator {
            what: what.into(),
            path: path.into(),
        }
    }
}

/// Core-specific result type
pub type Result<T> = std::result::Result<T, CoreError>;

