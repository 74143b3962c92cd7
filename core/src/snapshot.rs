//! Whole-file reader for the predictions produced by an analysis run

use crate::tail::HeaderIndex;
use crate::{CoreError, Result};
use schema::{PredictionEntry, PredictionRecord, PredictionReport, PredictionSnapshot};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Label substrings that mark a prediction as suspicious
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspicionMarkers {
    markers: Vec<String>,
}

impl Default for SuspicionMarkers {
    fn default() -> Self {
        Self::new(["Suspicious", "🔴"])
    }
}

impl SuspicionMarkers {
    /// Build a marker set; matching is case-sensitive
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `label` contains any marker
    pub fn is_suspicious(&self, label: &str) -> bool {
        self.markers.iter().any(|m| label.contains(m.as_str()))
    }
}

/// Reads the predictions file in one pass
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    path: PathBuf,
    markers: SuspicionMarkers,
}

impl SnapshotReader {
    /// Create a reader for `path`
    pub fn new(path: impl Into<PathBuf>, markers: SuspicionMarkers) -> Self {
        Self {
            path: path.into(),
            markers,
        }
    }

    /// Predictions file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and classify the whole file
    ///
    /// An absent file is `NotAnalyzed`. Any row that cannot be parsed fails
    /// the whole read with `TransientReadFailure`.
    pub fn read_all(&self) -> Result<PredictionSnapshot> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No predictions at {}", self.path.display());
                return Ok(PredictionSnapshot::NotAnalyzed);
            }
            Err(e) => {
                return Err(CoreError::TransientReadFailure(format!(
                    "Cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let text = String::from_utf8_lossy(&bytes);
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut header = None;
        let mut entries = Vec::new();
        for (line, result) in reader.records().enumerate() {
            let row = result.map_err(|e| self.parse_failure(line + 1, &e.to_string()))?;
            let Some(columns) = header.as_ref() else {
                header = Some(HeaderIndex::from_record(&row));
                continue;
            };
            let record = self.parse_row(columns, &row, line + 1)?;
            let suspicious = self.markers.is_suspicious(&record.prediction_label);
            entries.push(PredictionEntry { record, suspicious });
        }

        let report = PredictionReport::from_entries(entries);
        debug!(
            "Read {} predictions ({} suspicious) from {}",
            report.total_count,
            report.suspicious_count,
            self.path.display()
        );
        Ok(PredictionSnapshot::Analyzed(report))
    }

    fn parse_row(
        &self,
        columns: &HeaderIndex,
        row: &csv::StringRecord,
        line: usize,
    ) -> Result<PredictionRecord> {
        let (confidence, confidence_text) = match columns.get(row, "confidence").map(str::trim) {
            None | Some("") => (None, None),
            Some(raw) => {
                let text = raw.trim_end_matches('%').trim();
                let value = text.parse::<f64>().map_err(|_| {
                    self.parse_failure(line, &format!("confidence {:?} is not a number", raw))
                })?;
                (Some(value), Some(text.to_string()))
            }
        };

        Ok(PredictionRecord {
            query_name: columns.get_or_missing(row, "qname"),
            prediction_label: columns.get(row, "prediction").unwrap_or("").to_string(),
            confidence,
            confidence_text,
        })
    }

    fn parse_failure(&self, line: usize, detail: &str) -> CoreError {
        CoreError::TransientReadFailure(format!(
            "{} line {}: {}",
            self.path.display(),
            line,
            detail
        ))
    }
}
