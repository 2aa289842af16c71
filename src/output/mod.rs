//! Output module for record persistence and run reporting
//!
//! This module handles:
//! - Appending extracted records to the CSV output file
//! - Tallying per-category outcomes into the final run summary

mod csv;
mod summary;
mod traits;

pub use self::csv::{CsvSink, CSV_HEADERS};
pub use summary::{print_summary, CategoryTally, RunSummary};
pub use traits::{OutputError, OutputResult, RecordSink};
