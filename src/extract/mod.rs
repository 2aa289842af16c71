//! Extraction module: response bodies to structured records
//!
//! The engine is polymorphic over the `Extractor` capability and never
//! branches on site identity itself. `CssExtractor` is the selector-driven
//! implementation; tests supply stubs.

mod css;

pub use css::{CssExtractor, SelectorSpec};

use chrono::{DateTime, Utc};
use thiserror::Error;
use url::Url;

/// Extraction-specific errors
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid selector '{0}'")]
    Selector(String),

    #[error("Page structure mismatch: {0}")]
    StructureMismatch(String),
}

/// One extracted product listing
///
/// Immutable once produced; ownership moves from the extractor to the
/// output sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub title: String,
    pub price: String,
    pub condition: String,
    pub description: String,
    pub posted_at: String,
    /// Absolute URL of the listed item
    pub url: String,
    /// When this record was captured
    pub captured_at: DateTime<Utc>,
}

/// Turns one fetched listing page into zero or more records
///
/// An empty result on a well-formed page is the page-termination signal for
/// the enumerator, not an error. A structure mismatch (cards present but
/// unreadable) is an error: retrying will not help, the job fails permanently.
pub trait Extractor: Send + Sync {
    fn extract(&self, body: &str, page_url: &Url) -> Result<Vec<Record>, ExtractError>;
}
