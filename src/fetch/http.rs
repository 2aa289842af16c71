//! HTTP fetcher implementation over reqwest
//!
//! Each request runs on the borrowed session's own `reqwest::Client`, so the
//! session's headers, cookies, and proxy travel with it. The fetcher itself
//! only owns the deadline.

use crate::engine::Session;
use crate::fetch::{FetchError, FetchedPage, Fetcher};
use async_trait::async_trait;
use std::time::{Duration, Instant};
use url::Url;

/// Fetcher that performs real HTTP requests
pub struct HttpFetcher {
    /// Per-request deadline; exceeding it is a network error
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a fetcher with the given per-request deadline
    ///
    /// # Example
    ///
    /// ```
    /// use souk_scrape::fetch::HttpFetcher;
    /// use std::time::Duration;
    ///
    /// let fetcher = HttpFetcher::new(Duration::from_secs(15));
    /// ```
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, session: &Session, url: &Url) -> Result<FetchedPage, FetchError> {
        let started = Instant::now();

        let response = session
            .client()
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| classify_error(url, e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        // A broken body transfer is a network error like any other
        let body = response.text().await.map_err(|e| classify_error(url, e))?;

        Ok(FetchedPage {
            final_url,
            status,
            content_type,
            body,
            elapsed: started.elapsed(),
        })
    }
}

/// Classifies a reqwest error into the engine's network-error kinds
fn classify_error(url: &Url, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        FetchError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else {
        FetchError::Request {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}
