use crate::extract::SelectorSpec;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Souk-Scrape
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub categories: Vec<CategoryEntry>,
}

/// Engine behavior configuration
///
/// Every knob has a default so a minimal config file only needs categories.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Starting inter-request delay per target (milliseconds)
    #[serde(rename = "base-delay-ms", default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Floor the adaptive delay never drops below (milliseconds)
    #[serde(rename = "min-delay-ms", default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Ceiling the adaptive delay never exceeds (milliseconds)
    #[serde(rename = "max-delay-ms", default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum fetches per job before it is marked failed
    #[serde(rename = "max-attempts", default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Maximum pages enumerated per category
    #[serde(rename = "max-pages", default = "default_max_pages")]
    pub max_pages: u32,

    /// Number of rotating client identities in the session pool
    #[serde(rename = "session-pool-size", default = "default_session_pool_size")]
    pub session_pool_size: usize,

    /// Bounded job queue capacity (backpressure against enumeration)
    #[serde(rename = "queue-capacity", default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Per-request deadline (seconds); exceeding it is a network error
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Base wait before re-enqueueing a retryable job (milliseconds);
    /// doubles with each attempt
    #[serde(rename = "retry-backoff-ms", default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_base_delay_ms() -> u64 {
    800
}

fn default_min_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    6000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_max_pages() -> u32 {
    50
}

fn default_session_pool_size() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    32
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_retry_backoff_ms() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            base_delay_ms: default_base_delay_ms(),
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            max_pages: default_max_pages(),
            session_pool_size: default_session_pool_size(),
            queue_capacity: default_queue_capacity(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl EngineConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Client identity material for the session pool
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    /// Browser user-agent strings sessions rotate through
    #[serde(rename = "user-agents", default = "default_user_agents")]
    pub user_agents: Vec<String>,

    /// Accept-Language header sent with every request
    #[serde(rename = "accept-language", default = "default_accept_language")]
    pub accept_language: String,

    /// Optional proxy URLs; sessions take the next one on construction
    #[serde(default)]
    pub proxies: Vec<String>,
}

fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Safari/605.1.15".to_string(),
    ]
}

fn default_accept_language() -> String {
    "fr-FR,fr;q=0.9,en-US;q=0.8,en;q=0.7".to_string()
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            user_agents: default_user_agents(),
            accept_language: default_accept_language(),
            proxies: Vec::new(),
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the CSV file records are appended to
    #[serde(rename = "csv-path", default = "default_csv_path")]
    pub csv_path: String,

    /// Path to the append-only checkpoint log
    #[serde(rename = "checkpoint-path", default = "default_checkpoint_path")]
    pub checkpoint_path: String,
}

fn default_csv_path() -> String {
    "products.csv".to_string()
}

fn default_checkpoint_path() -> String {
    "progress.jsonl".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_path: default_csv_path(),
            checkpoint_path: default_checkpoint_path(),
        }
    }
}

/// One marketplace category to scrape
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    /// Short identifier used in logs, the checkpoint log, and the summary
    pub id: String,

    /// Base listing URL (page 1)
    pub url: String,

    /// Query parameter appended for pages beyond the first
    #[serde(rename = "page-param", default = "default_page_param")]
    pub page_param: String,

    /// CSS selectors the extractor uses for this category's site
    pub selectors: SelectorSpec,
}

fn default_page_param() -> String {
    "page".to_string()
}
