//! Test utilities for CLI crate integration tests.
#![allow(missing_docs)]
#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use tunnelwatch_core::MonitorConfig;

pub const CAPTURE_HEADER: &str = "timestamp,qname,src_ip,dst_ip,is_response\n";

/// Run the given future with a timeout, failing the test if it elapses.
///
/// # Panics
///
/// Panics if the timeout elapses before the future completes.
pub async fn run_with_timeout<F, T>(duration: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(duration, fut)
        .await
        .expect("test timed out")
}

/// Configuration for a project in `root` with fast timings
pub fn fast_config(root: &Path) -> MonitorConfig {
    let mut config = MonitorConfig::for_project(root);
    config.poll_interval_ms = 20;
    config.capture.grace_period_ms = 30;
    config.capture.graceful_timeout_ms = 100;
    config.capture.kill_timeout_ms = 100;
    config.capture.diagnostics_timeout_ms = 100;
    config
}

/// Create the files a full project would have
pub fn populate_project(root: &Path) {
    std::fs::write(root.join("capture.py"), "").unwrap();
    std::fs::write(root.join("predict.py"), "").unwrap();
    std::fs::write(root.join("best_dns_model.pkl"), "model").unwrap();
}
