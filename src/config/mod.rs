//! Configuration module for Contrib-Harvest
//!
//! This module handles loading, parsing, and validating the optional TOML
//! configuration file, and reading the API credential from the environment.
//!
//! # Example
//!
//! ```no_run
//! use contrib_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Requests per window: {}", config.rate_limit.calls);
//! ```

mod credentials;
mod parser;
mod types;
mod validation;

pub use credentials::ApiKey;
pub use types::{ApiConfig, Config, HarvestConfig, RateLimitConfig, RetryConfig, StoreConfig};

pub use parser::{compute_config_hash, load_config, load_config_with_hash};
pub use validation::{validate, MAX_PER_PAGE};
