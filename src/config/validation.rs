use crate::config::types::{
    ApiConfig, Config, HarvestConfig, RateLimitConfig, RetryConfig, StoreConfig,
};
use crate::ConfigError;
use url::Url;

/// Largest page size the contributors endpoint accepts
pub const MAX_PER_PAGE: u32 = 100;

/// Upper bound on concurrent workers; they all share one call window anyway
pub const MAX_WORKERS: u32 = 16;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_rate_limit_config(&config.rate_limit)?;
    validate_retry_config(&config.retry_429)?;
    validate_store_config(&config.store)?;
    validate_harvest_config(&config.harvest)?;
    Ok(())
}

/// Validates the remote endpoint configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base-url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' must use http or https",
            config.base_url
        )));
    }

    if url.cannot_be_a_base() {
        return Err(ConfigError::InvalidUrl(format!(
            "base-url '{}' cannot carry path segments",
            config.base_url
        )));
    }

    if config.per_page < 1 || config.per_page > MAX_PER_PAGE {
        return Err(ConfigError::Validation(format!(
            "per-page must be between 1 and {}, got {}",
            MAX_PER_PAGE, config.per_page
        )));
    }

    if config.timeout_secs == 0 || config.connect_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "timeout-secs and connect-timeout-secs must be >= 1".to_string(),
        ));
    }

    if config.api_key_env.trim().is_empty() {
        return Err(ConfigError::Validation(
            "api-key-env cannot be empty".to_string(),
        ));
    }

    if config.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates the local call window
fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<(), ConfigError> {
    if config.calls < 1 {
        return Err(ConfigError::Validation(format!(
            "rate-limit.calls must be >= 1, got {}",
            config.calls
        )));
    }

    if config.period_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "rate-limit.period-secs must be >= 1, got {}",
            config.period_secs
        )));
    }

    validate_backoff("rate-limit", config.max_attempts, config.multiplier)
}

fn validate_retry_config(config: &RetryConfig) -> Result<(), ConfigError> {
    validate_backoff("retry-429", config.max_attempts, config.multiplier)
}

fn validate_backoff(section: &str, max_attempts: u32, multiplier: f64) -> Result<(), ConfigError> {
    if max_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "{}.max-attempts must be >= 1, got {}",
            section, max_attempts
        )));
    }

    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(ConfigError::Validation(format!(
            "{}.multiplier must be a finite number >= 1.0, got {}",
            section, multiplier
        )));
    }

    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.write_attempts < 1 {
        return Err(ConfigError::Validation(format!(
            "store.write-attempts must be >= 1, got {}",
            config.write_attempts
        )));
    }
    Ok(())
}

fn validate_harvest_config(config: &HarvestConfig) -> Result<(), ConfigError> {
    if config.workers < 1 || config.workers > MAX_WORKERS {
        return Err(ConfigError::Validation(format!(
            "harvest.workers must be between 1 and {}, got {}",
            MAX_WORKERS, config.workers
        )));
    }
    Ok(())
}
