//! Incremental reader for the append-only capture log
//!
//! The reader keeps a byte cursor into the file and only parses bytes written
//! since the previous poll. Only complete rows are consumed; a row the
//! producer is still writing stays in the file until its newline arrives. A
//! newline inside a quoted field does not end a row. Bytes that are not valid
//! UTF-8 are replaced with U+FFFD.
//!
//! If the file shrinks below the cursor it has been rewritten. The reader then
//! rescans from the start but only emits rows whose index is beyond the number
//! of rows already delivered, so the delivered row count never goes backwards.

use crate::{CoreError, Result};
use schema::{CapturedRecord, MISSING_FIELD};
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

const UTF8_BOM: &str = "\u{feff}";

/// Length of the prefix of `buf` made of complete rows: everything up to the
/// last newline that is not inside a quoted field
fn complete_rows_len(buf: &[u8]) -> Option<usize> {
    let mut in_quotes = false;
    let mut end = None;
    for (i, &b) in buf.iter().enumerate() {
        match b {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => end = Some(i + 1),
            _ => {}
        }
    }
    end
}

/// Records delivered by one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TailBatch {
    /// Rows appended since the previous poll, in file order
    pub records: Vec<CapturedRecord>,
    /// Total rows delivered since the last reset
    pub total_rows: usize,
}

impl TailBatch {
    /// Whether the poll found nothing new
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Column positions resolved from a CSV header row
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HeaderIndex {
    names: Vec<String>,
}

impl HeaderIndex {
    pub(crate) fn from_record(record: &csv::StringRecord) -> Self {
        let names = record
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let name = if i == 0 {
                    name.trim_start_matches(UTF8_BOM)
                } else {
                    name
                };
                name.trim().to_string()
            })
            .collect();
        Self { names }
    }

    /// Value of `column` in `row`, `None` when the column or cell is absent
    pub(crate) fn get<'r>(&self, row: &'r csv::StringRecord, column: &str) -> Option<&'r str> {
        let idx = self.names.iter().position(|n| n == column)?;
        row.get(idx)
    }

    /// Value of `column` in `row`, `N/A` when absent
    pub(crate) fn get_or_missing(&self, row: &csv::StringRecord, column: &str) -> String {
        self.get(row, column).unwrap_or(MISSING_FIELD).to_string()
    }
}

fn captured_from_row(header: &HeaderIndex, row: &csv::StringRecord) -> CapturedRecord {
    CapturedRecord {
        timestamp: header.get_or_missing(row, "timestamp"),
        query_name: header.get_or_missing(row, "qname"),
        source_ip: header.get_or_missing(row, "src_ip"),
        destination_ip: header.get_or_missing(row, "dst_ip"),
        is_response: header
            .get(row, "is_response")
            .map(|v| v.trim() == "1")
            .unwrap_or(false),
    }
}

/// Tails the capture log
#[derive(Debug)]
pub struct TailReader {
    path: PathBuf,
    cursor: u64,
    header: Option<HeaderIndex>,
    file_rows: usize,
    last_row_count: usize,
}

impl TailReader {
    /// Create a reader positioned at the start of `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cursor: 0,
            header: None,
            file_rows: 0,
            last_row_count: 0,
        }
    }

    /// File being tailed
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows delivered since the last reset
    pub fn row_count(&self) -> usize {
        self.last_row_count
    }

    /// Forget everything read so far; the next poll starts from byte 0
    pub fn reset(&mut self) {
        debug!("Resetting tail reader for {}", self.path.display());
        self.cursor = 0;
        self.header = None;
        self.file_rows = 0;
        self.last_row_count = 0;
    }

    /// Poll for new rows, swallowing read failures
    pub fn poll(&mut self) -> TailBatch {
        match self.try_poll() {
            Ok(batch) => batch,
            Err(e) => {
                debug!("Tail poll of {} failed: {}", self.path.display(), e);
                self.unchanged()
            }
        }
    }

    /// Poll for new rows. On error the reader state is left untouched.
    pub fn try_poll(&mut self) -> Result<TailBatch> {
        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(self.unchanged()),
            Err(e) => return Err(self.read_failure(e)),
        };
        let len = file.metadata().map_err(|e| self.read_failure(e))?.len();

        let (mut cursor, mut header, mut file_rows) =
            (self.cursor, self.header.clone(), self.file_rows);
        if len < cursor {
            debug!(
                "{} shrank from {} to {} bytes, rescanning",
                self.path.display(),
                cursor,
                len
            );
            cursor = 0;
            header = None;
            file_rows = 0;
        }
        if len == cursor {
            return Ok(self.unchanged());
        }

        file.seek(SeekFrom::Start(cursor))
            .map_err(|e| self.read_failure(e))?;
        let mut buf = Vec::with_capacity((len - cursor) as usize);
        file.take(len - cursor)
            .read_to_end(&mut buf)
            .map_err(|e| self.read_failure(e))?;

        let Some(complete_len) = complete_rows_len(&buf) else {
            return Ok(self.unchanged());
        };
        let complete = &buf[..complete_len];
        let text = String::from_utf8_lossy(complete);

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let mut records = Vec::new();
        for result in reader.records() {
            let row = result.map_err(|e| {
                CoreError::TransientReadFailure(format!(
                    "Malformed row in {}: {}",
                    self.path.display(),
                    e
                ))
            })?;
            let Some(columns) = header.as_ref() else {
                header = Some(HeaderIndex::from_record(&row));
                continue;
            };
            file_rows += 1;
            if file_rows > self.last_row_count {
                records.push(captured_from_row(columns, &row));
            }
        }

        self.cursor = cursor + complete_len as u64;
        self.header = header;
        self.file_rows = file_rows;
        self.last_row_count = self.last_row_count.max(file_rows);

        if !records.is_empty() {
            debug!(
                "Read {} new rows from {} (total {})",
                records.len(),
                self.path.display(),
                self.last_row_count
            );
        }
        Ok(TailBatch {
            records,
            total_rows: self.last_row_count,
        })
    }

    fn unchanged(&self) -> TailBatch {
        TailBatch {
            records: Vec::new(),
            total_rows: self.last_row_count,
        }
    }

    fn read_failure(&self, e: std::io::Error) -> CoreError {
        CoreError::TransientReadFailure(format!("Cannot read {}: {}", self.path.display(), e))
    }
}
