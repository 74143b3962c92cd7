//! Runs the analysis job and reads back its predictions
//!
//! Preconditions are checked in a fixed order before anything is launched:
//! capture data, then the model artifact, then the analysis script.

use crate::config::MonitorConfig;
use crate::snapshot::{SnapshotReader, SuspicionMarkers};
use crate::supervisor::{LaunchSpec, ProcessAdapter};
use crate::{CoreError, Result};
use schema::PredictionSnapshot;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Clears the in-progress flag when the run ends, however it ends
struct InProgressGuard(Arc<AtomicBool>);

impl Drop for InProgressGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Launches the analysis job, one run at a time
pub struct AnalysisRunner {
    adapter: Arc<dyn ProcessAdapter>,
    launch: LaunchSpec,
    capture_log: PathBuf,
    model: PathBuf,
    snapshot: SnapshotReader,
    in_progress: Arc<AtomicBool>,
}

impl AnalysisRunner {
    /// Create a runner from explicit parts
    pub fn new(
        adapter: Arc<dyn ProcessAdapter>,
        launch: LaunchSpec,
        capture_log: impl Into<PathBuf>,
        model: impl Into<PathBuf>,
        snapshot: SnapshotReader,
    ) -> Self {
        Self {
            adapter,
            launch,
            capture_log: capture_log.into(),
            model: model.into(),
            snapshot,
            in_progress: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a runner with the paths and command from `config`
    pub fn from_config(config: &MonitorConfig, adapter: Arc<dyn ProcessAdapter>) -> Self {
        let markers = SuspicionMarkers::new(config.analysis.suspicious_markers.iter().cloned());
        Self::new(
            adapter,
            config.analysis_launch(),
            config.capture_log_path(),
            config.model_path(),
            SnapshotReader::new(config.predictions_path(), markers),
        )
    }

    /// Reader for the predictions file this runner produces
    pub fn snapshot_reader(&self) -> &SnapshotReader {
        &self.snapshot
    }

    /// Whether a run is currently in flight
    pub fn is_running(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Check that capture data, model and script are all present
    pub fn check_preconditions(&self) -> Result<()> {
        if !has_capture_data(&self.capture_log) {
            return Err(CoreError::NoCaptureData(self.capture_log.clone()));
        }
        if !self.model.exists() {
            return Err(CoreError::missing("trained model", &self.model));
        }
        self.launch.check_required()
    }

    /// Run the analysis job to completion and read its predictions
    pub async fn analyze(&self) -> Result<PredictionSnapshot> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::AnalysisInProgress);
        }
        let _guard = InProgressGuard(self.in_progress.clone());

        self.check_preconditions()?;

        info!("Running analysis: {}", self.launch.display());
        let exit = self.adapter.run_to_completion(&self.launch).await?;
        if !exit.is_success() {
            error!("Analysis exited with {}", exit.describe());
            return Err(CoreError::AnalysisFailed(exit.describe()));
        }

        let snapshot = self.snapshot.read_all()?;
        info!(
            "Analysis complete: {} analyzed, {} suspicious",
            snapshot.total_count(),
            snapshot.suspicious_count()
        );
        Ok(snapshot)
    }
}

fn has_capture_data(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
