//! Text rendering for the live capture view and the suspicious-query view

use schema::{CapturedRecord, PredictionReport, PredictionSnapshot};
use std::fmt::Write;

/// Two-line entry for one captured packet, followed by a blank line
pub fn render_captured(record: &CapturedRecord) -> String {
    format!(
        "[{}] {}: {}\n    Source: {} → Destination: {}\n",
        record.timestamp,
        record.kind_label(),
        record.query_name,
        record.source_ip,
        record.destination_ip
    )
}

/// Status line under the live view
pub fn capture_summary(total_rows: usize) -> String {
    if total_rows == 0 {
        "No queries captured yet".to_string()
    } else {
        format!("Total queries captured: {}", total_rows)
    }
}

/// Status line under the suspicious view
pub fn suspicious_summary(snapshot: &PredictionSnapshot) -> String {
    match snapshot {
        PredictionSnapshot::NotAnalyzed => "No analysis performed yet".to_string(),
        PredictionSnapshot::Analyzed(report) if report.suspicious_count == 0 => format!(
            "Analysis complete: {} queries analyzed, 0 suspicious",
            report.total_count
        ),
        PredictionSnapshot::Analyzed(report) => format!(
            "⚠️  Found {} suspicious queries out of {} analyzed",
            report.suspicious_count, report.total_count
        ),
    }
}

fn render_report(report: &PredictionReport, out: &mut String) {
    if report.suspicious_count == 0 {
        let _ = writeln!(out, "✅ No suspicious queries detected!\n");
        let _ = writeln!(
            out,
            "Analyzed {} queries. All appear safe.",
            report.total_count
        );
        return;
    }
    for record in report.suspicious() {
        let _ = writeln!(out, "⚠️  {}", record.query_name);
        match record.confidence {
            Some(_) => {
                let _ = writeln!(out, "   Confidence: {}%\n", record.confidence_display());
            }
            None => {
                let _ = writeln!(out, "   Confidence: {}\n", record.confidence_display());
            }
        }
    }
}

/// Full suspicious view: the flagged queries followed by the status line
pub fn render_suspicious(snapshot: &PredictionSnapshot) -> String {
    let mut out = String::new();
    match snapshot {
        PredictionSnapshot::NotAnalyzed => {
            out.push_str("No analysis results available.\n\nRun 'analyze' to detect suspicious queries.\n");
        }
        PredictionSnapshot::Analyzed(report) => render_report(report, &mut out),
    }
    out.push('\n');
    out.push_str(&suspicious_summary(snapshot));
    out.push('\n');
    out
}
