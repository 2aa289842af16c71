//! Append-safe CSV sink
//!
//! One row per record, every field quoted, header written only when the file
//! is new or empty. Resumed runs reopen the same file in append mode and the
//! header is never emitted twice.

use crate::extract::Record;
use crate::output::traits::{OutputResult, RecordSink};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

/// Column order of the output file
pub const CSV_HEADERS: [&str; 7] = [
    "Title",
    "Price",
    "Condition",
    "Description",
    "Post Date",
    "URL",
    "Scraped at",
];

/// Timestamp format for the "Scraped at" column
const CAPTURED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// CSV sink writing to one append-only file
pub struct CsvSink {
    writer: Mutex<csv::Writer<std::fs::File>>,
}

impl CsvSink {
    /// Opens the sink, creating the file and header if needed
    ///
    /// An existing non-empty file is appended to as-is; the caller is
    /// expected to pair it with the matching checkpoint log so no job's rows
    /// are written twice.
    pub fn open(path: &Path) -> OutputResult<Self> {
        let needs_header = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(file);

        if needs_header {
            writer.write_record(CSV_HEADERS)?;
            writer.flush()?;
        }

        Ok(Self {
            writer: Mutex::new(writer),
        })
    }
}

impl RecordSink for CsvSink {
    fn write(&self, record: &Record) -> OutputResult<()> {
        let captured = record.captured_at.format(CAPTURED_AT_FORMAT).to_string();
        let mut writer = self.writer.lock().unwrap();
        writer.write_record([
            record.title.as_str(),
            record.price.as_str(),
            record.condition.as_str(),
            record.description.as_str(),
            record.posted_at.as_str(),
            record.url.as_str(),
            captured.as_str(),
        ])?;
        // Flush per row so an interrupted run keeps everything it checkpointed
        writer.flush()?;
        Ok(())
    }

    fn flush(&self) -> OutputResult<()> {
        self.writer.lock().unwrap().flush()?;
        Ok(())
    }
}
