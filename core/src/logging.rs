//! Logging utilities: bounded ring buffer holding the recent output of a
//! supervised process

use std::collections::VecDeque;

/// Which pipe a line was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output
    Stdout,
    /// Standard error
    Stderr,
}

/// A single line captured from a process's stdout/stderr
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Stream the line came from
    pub stream: OutputStream,
    /// Raw content of the line, without trailing newline
    pub content: String,
    /// Timestamp in RFC3339 format
    pub timestamp: String,
}

impl OutputLine {
    /// Build a line for the given stream, stamped with the current time
    pub fn new(stream: OutputStream, content: impl Into<String>) -> Self {
        Self {
            stream,
            content: content.into(),
            timestamp: schema::current_timestamp(),
        }
    }
}

/// A bounded-capacity ring buffer to store recent output lines.
///
/// When capacity is exceeded, oldest entries are dropped and counted so the
/// diagnostics can say how much is missing.
#[derive(Debug)]
pub struct LogRing {
    capacity: usize,
    total_dropped: u64,
    entries: VecDeque<OutputLine>,
}

impl LogRing {
    /// Create a new `LogRing` with the given capacity (must be > 0)
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "LogRing capacity must be > 0");
        Self {
            capacity,
            total_dropped: 0,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Push a new entry into the ring.
    /// If the ring is full, evicts the oldest entry and increments the drop counter.
    pub fn push(&mut self, entry: OutputLine) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.total_dropped = self.total_dropped.saturating_add(1);
        }
        self.entries.push_back(entry);
    }

    /// Clone the retained entries, oldest first
    pub fn lines(&self) -> Vec<OutputLine> {
        self.entries.iter().cloned().collect()
    }

    /// Render retained output for an error report: stderr lines first, then
    /// stdout, separated by a blank line. Empty when nothing was captured.
    pub fn render_diagnostics(&self) -> String {
        let collect = |stream: OutputStream| {
            self.entries
                .iter()
                .filter(|e| e.stream == stream)
                .map(|e| e.content.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        };
        let stderr = collect(OutputStream::Stderr);
        let stdout = collect(OutputStream::Stdout);

        let mut out = stderr;
        if !stdout.is_empty() {
            if !out.is_empty() {
                out.push_str("\n\n");
            }
            out.push_str(&stdout);
        }
        if self.total_dropped > 0 {
            out.push_str(&format!("\n({} earlier lines dropped)", self.total_dropped));
        }
        out
    }
}
