//! Souk-Scrape: a resilient marketplace listing scraper
//!
//! This crate implements a concurrent scraping engine for paginated product
//! listings, combining adaptive rate limiting, rotating client identities,
//! block detection, and crash-safe checkpointed resume.

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod extract;
pub mod fetch;
pub mod output;
pub mod state;

use thiserror::Error;

/// Main error type for Souk-Scrape operations
#[derive(Debug, Error)]
pub enum SoukError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] fetch::FetchError),

    #[error("Extraction error: {0}")]
    Extract(#[from] extract::ExtractError),

    #[error("Output error: {0}")]
    Output(#[from] output::OutputError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] checkpoint::CheckpointError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Invalid state transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: state::JobStatus,
        to: state::JobStatus,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine error: {0}")]
    Engine(String),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid CSS selector in config: {0}")]
    InvalidSelector(String),
}

/// Result type alias for Souk-Scrape operations
pub type Result<T> = std::result::Result<T, SoukError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use engine::{run_scrape, Engine};
pub use extract::Record;
pub use output::RunSummary;
pub use state::{Job, JobId, JobStatus, RateState};
