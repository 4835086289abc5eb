//! Contrib-Harvest: a rate-limited contributor harvester
//!
//! This crate pages through the Libraries.io project contributors endpoint
//! for every package name queued in a SQLite record store, staying under the
//! API's requests-per-minute ceiling, and records each page's payload or
//! error so that later runs resume where the previous one stopped.

pub mod config;
pub mod contributors;
pub mod fetcher;
pub mod harvest;
pub mod output;
pub mod ratelimit;
pub mod storage;

use thiserror::Error;

/// Main error type for Contrib-Harvest operations
///
/// Only setup-time faults surface here. Per-request failures are recorded
/// in the store as [`fetcher::FetchFailure`] values and never end a batch.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment variable '{var}' holding the API key is not set")]
    MissingCredential { var: String },

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Invalid project name for request URL: {0}")]
    InvalidProjectName(String),

    #[error("Export error: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
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
}

/// Result type alias for Contrib-Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::{ApiKey, Config};
pub use fetcher::{FetchFailure, FetchOutcome};
pub use harvest::{BatchReport, Harvester, ShutdownSignal};
pub use ratelimit::{BackoffPolicy, RateLimiter};
pub use storage::{FetchRecord, FetchStatus, RecordStore, SqliteStorage};
