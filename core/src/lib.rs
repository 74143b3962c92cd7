//! Core functionality for tunnelwatch
//!
//! This crate contains the capture supervisor, the capture-log tail reader,
//! the predictions reader and the analysis runner shared by the CLI front end.

pub mod analysis;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod process;
pub mod snapshot;
pub mod supervisor;
pub mod tail;


// Re-export schema types for convenience
pub use schema::*;

pub use analysis::AnalysisRunner;
pub use config::{load_config_from_toml_path, load_config_from_toml_str, MonitorConfig};
pub use error::{CoreError, Result};
pub use poller::{spawn_poller, PollControl, PollUpdate, PollerHandle};
pub use snapshot::{SnapshotReader, SuspicionMarkers};
pub use supervisor::{platform_adapter, CaptureSupervisor, LaunchSpec, SupervisorTimings};
pub use tail::{TailBatch, TailReader};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
