//! CLI error types

use thiserror::Error;
use tunnelwatch_core::CoreError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl CliError {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            CliError::InvalidArgument(_) => "CLI002",
            CliError::ConfigError(_) => "CLI003",
            CliError::Core(e) => e.code(),
            CliError::IoError(_) => "CLI008",
            CliError::SerializationError(_) => "CLI009",
        }
    }
}

/// CLI-specific result type
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CliError::InvalidArgument("test".to_string()).code(), "CLI002");
        assert_eq!(CliError::ConfigError("test".to_string()).code(), "CLI003");
        assert_eq!(CliError::Core(CoreError::AlreadyRunning).code(), "CORE013");
    }

    #[test]
    fn test_error_display() {
        let error = CliError::InvalidArgument("project root /nope is not a directory".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid argument: project root /nope is not a directory"
        );

        let error = CliError::from(CoreError::AnalysisInProgress);
        assert_eq!(error.to_string(), "An analysis is already in progress");
    }
}
