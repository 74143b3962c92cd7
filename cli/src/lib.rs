//! tunnelwatch command-line front end
//!
//! The interactive monitor lives in [`console`]; the one-shot `analyze` and
//! `show` commands are implemented here so they can be driven from tests with
//! any writer.

pub mod console;
pub mod error;
pub mod view;

pub use error::{CliError, Result};

use serde_json::json;
use std::io::Write;
use std::sync::Arc;
use tunnelwatch_core::supervisor::ProcessAdapter;
use tunnelwatch_core::{AnalysisRunner, MonitorConfig, SnapshotReader, SuspicionMarkers, TailReader};

/// Run one analysis and print the suspicious view
pub async fn analyze_once<W: Write>(
    config: &MonitorConfig,
    adapter: Arc<dyn ProcessAdapter>,
    as_json: bool,
    out: &mut W,
) -> Result<()> {
    let runner = AnalysisRunner::from_config(config, adapter);
    let snapshot = runner.analyze().await?;
    if as_json {
        writeln!(out, "{}", serde_json::to_string_pretty(&snapshot)?)?;
    } else {
        write!(out, "{}", view::render_suspicious(&snapshot))?;
    }
    Ok(())
}

/// Print the captured rows and the last analysis results once
pub fn show_once<W: Write>(config: &MonitorConfig, as_json: bool, out: &mut W) -> Result<()> {
    let batch = TailReader::new(config.capture_log_path()).try_poll()?;
    let markers = SuspicionMarkers::new(config.analysis.suspicious_markers.iter().cloned());
    let snapshot = SnapshotReader::new(config.predictions_path(), markers).read_all()?;

    if as_json {
        let doc = json!({
            "captured": batch.records,
            "totalRows": batch.total_rows,
            "predictions": snapshot,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
        return Ok(());
    }

    for record in &batch.records {
        writeln!(out, "{}", view::render_captured(record))?;
    }
    writeln!(out, "{}", view::capture_summary(batch.total_rows))?;
    writeln!(out)?;
    write!(out, "{}", view::render_suspicious(&snapshot))?;
    Ok(())
}
