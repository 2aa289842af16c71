//! Output abstractions for finished records

use crate::extract::Record;
use thiserror::Error;

/// Output-specific errors
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type alias for output operations
pub type OutputResult<T> = std::result::Result<T, OutputError>;

/// Receives finished records from the workers
///
/// Workers finish jobs in no particular order, so implementations must
/// tolerate out-of-order delivery and be callable from many tasks at once.
/// Duplicate suppression is not the sink's job: the checkpoint store
/// guarantees an already-done job never reaches the sink again.
pub trait RecordSink: Send + Sync {
    /// Appends one record
    fn write(&self, record: &Record) -> OutputResult<()>;

    /// Pushes buffered rows out to stable storage
    fn flush(&self) -> OutputResult<()>;
}
