//! Row types read from the capture log and the predictions file
//!
//! Both files are produced by external collaborators. The capture log grows
//! by appending one [`CapturedRecord`] per row; the predictions file is
//! rewritten wholesale by every analysis run and is read back as a
//! [`PredictionSnapshot`].

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Placeholder used for any column missing from a row
pub const MISSING_FIELD: &str = "N/A";

/// A single DNS packet observed by the capture producer
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CapturedRecord {
    /// Capture timestamp as written by the producer
    pub timestamp: String,
    /// Queried domain name
    pub query_name: String,
    /// Source address of the packet
    pub source_ip: String,
    /// Destination address of the packet
    pub destination_ip: String,
    /// Whether the packet is a response (`is_response == "1"`)
    pub is_response: bool,
}

impl CapturedRecord {
    /// Label used when rendering the packet direction
    pub fn kind_label(&self) -> &'static str {
        if self.is_response {
            "RESPONSE"
        } else {
            "QUERY"
        }
    }
}

/// One classified row of the predictions file
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
    /// Domain name the prediction refers to
    pub query_name: String,
    /// Free-text label written by the classifier
    pub prediction_label: String,
    /// Classifier confidence in percent, absent when the cell was empty
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Confidence exactly as the classifier wrote it, without a trailing `%`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_text: Option<String>,
}

impl PredictionRecord {
    /// Confidence rendered for display, `N/A` when absent
    pub fn confidence_display(&self) -> String {
        match (&self.confidence_text, self.confidence) {
            (Some(text), _) => text.clone(),
            (None, Some(value)) => format!("{}", value),
            (None, None) => MISSING_FIELD.to_string(),
        }
    }
}

/// A prediction together with its suspicious classification
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionEntry {
    /// The parsed row
    pub record: PredictionRecord,
    /// Whether the label carried a positive marker
    pub suspicious: bool,
}

/// Result of one full read of the predictions file
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictionReport {
    /// Every row in file order
    pub entries: Vec<PredictionEntry>,
    /// Number of rows analyzed
    pub total_count: usize,
    /// Number of rows classified as suspicious
    pub suspicious_count: usize,
}

impl PredictionReport {
    /// Build a report from classified entries, deriving the counters
    pub fn from_entries(entries: Vec<PredictionEntry>) -> Self {
        let total_count = entries.len();
        let suspicious_count = entries.iter().filter(|e| e.suspicious).count();
        Self {
            entries,
            total_count,
            suspicious_count,
        }
    }

    /// Iterate over the suspicious rows only
    pub fn suspicious(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.entries
            .iter()
            .filter(|e| e.suspicious)
            .map(|e| &e.record)
    }
}

/// Outcome of reading the predictions file
///
/// `NotAnalyzed` means the file does not exist yet, which is different from an
/// analysis that found nothing suspicious.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum PredictionSnapshot {
    /// No analysis has produced a predictions file yet
    NotAnalyzed,
    /// A predictions file was read in full
    Analyzed(PredictionReport),
}

impl PredictionSnapshot {
    /// Whether an analysis result is available
    pub fn is_analyzed(&self) -> bool {
        matches!(self, Self::Analyzed(_))
    }

    /// Total rows analyzed (0 when not analyzed)
    pub fn total_count(&self) -> usize {
        match self {
            Self::NotAnalyzed => 0,
            Self::Analyzed(report) => report.total_count,
        }
    }

    /// Suspicious rows found (0 when not analyzed)
    pub fn suspicious_count(&self) -> usize {
        match self {
            Self::NotAnalyzed => 0,
            Self::Analyzed(report) => report.suspicious_count,
        }
    }
}
