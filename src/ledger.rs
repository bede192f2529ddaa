//! Append-only CSV ledger of recorded detections.
//!
//! Every append opens the file, writes one complete row and closes it again,
//! so external readers and log rotation never contend with a held handle. If
//! the file is missing (first run, or rotated away) it is recreated with the
//! header row first.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Local};

use crate::error::{PipelineError, PipelineResult};

pub const LEDGER_FILE_NAME: &str = "metadata.csv";
pub const LEDGER_HEADER: [&str; 5] = [
    "Timestamp",
    "OriginalImagePath",
    "AnnotatedImagePath",
    "Confidence",
    "Category",
];
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// One recorded detection. Immutable once written.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionRecord {
    pub timestamp: DateTime<Local>,
    pub original_image: PathBuf,
    pub annotated_image: PathBuf,
    pub confidence: f32,
    pub category: String,
}

impl DetectionRecord {
    /// Render as one CSV line, newline included.
    pub fn to_csv_row(&self) -> String {
        let timestamp = self.timestamp.format(TIMESTAMP_FORMAT).to_string();
        let original = self.original_image.display().to_string();
        let annotated = self.annotated_image.display().to_string();
        let confidence = self.confidence.to_string();
        csv_line(&[
            timestamp.as_str(),
            original.as_str(),
            annotated.as_str(),
            confidence.as_str(),
            self.category.as_str(),
        ])
    }
}

pub struct MetadataLedger {
    path: PathBuf,
    // Serialises appends from the two workers so rows never interleave.
    write_lock: Mutex<()>,
}

impl MetadataLedger {
    /// Open (or create) the ledger at `path`. Creates parent directories and
    /// writes the header if the file does not exist yet; an existing file is
    /// left untouched.
    pub fn open(path: impl Into<PathBuf>) -> PipelineResult<Self> {
        let ledger = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        if let Some(parent) = ledger.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| PipelineError::persist(parent, e))?;
        }
        ledger.write_with_header("")?;
        Ok(ledger)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record.
    pub fn append(&self, record: &DetectionRecord) -> PipelineResult<()> {
        self.write_with_header(&record.to_csv_row())
    }

    fn write_with_header(&self, row: &str) -> PipelineResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let persist = |e: std::io::Error| PipelineError::persist(&self.path, e);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(persist)?;
        let mut buf = String::new();
        if file.metadata().map_err(persist)?.len() == 0 {
            buf.push_str(&csv_line(&LEDGER_HEADER));
        }
        buf.push_str(row);
        if !buf.is_empty() {
            file.write_all(buf.as_bytes()).map_err(persist)?;
            file.flush().map_err(persist)?;
        }
        Ok(())
    }
}

fn csv_line(fields: &[&str]) -> String {
    let mut line = fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",");
    line.push_str("\r\n");
    line
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\r', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
