//! Fetch module: one HTTP request per call
//!
//! The `Fetcher` trait is the engine's seam to the network. Status-code
//! anomalies are not fetch errors: they come back inside `FetchedPage` for
//! the block detector to judge. A `FetchError` always means the network
//! itself failed (timeout, refused connection, broken transfer).

mod http;

pub use http::HttpFetcher;

use crate::engine::Session;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Network-level fetch errors; all of them are retryable
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Request failed for {url}: {message}")]
    Request { url: String, message: String },
}

/// One fetched listing page, before block classification
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the response actually came from, after redirects
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    /// Wall time the request took
    pub elapsed: Duration,
}

/// Performs one HTTP request with a borrowed session identity
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, session: &Session, url: &Url) -> Result<FetchedPage, FetchError>;
}
