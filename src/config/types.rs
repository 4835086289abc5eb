use serde::{Deserialize, Serialize};

/// Main configuration structure for Contrib-Harvest
///
/// Every section is optional in the TOML file; missing keys take the
/// defaults below, which match the Libraries.io published limits.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    #[serde(rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    #[serde(rename = "retry-429")]
    pub retry_429: RetryConfig,
    pub store: StoreConfig,
    pub harvest: HarvestConfig,
}

/// Remote contributors endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Platform-scoped API root; `<base>/<project>/contributors` is requested
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Results per page (the API allows at most 100)
    #[serde(rename = "per-page")]
    pub per_page: u32,

    /// Whole-request timeout in seconds
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Connection establishment timeout in seconds
    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    /// Name of the environment variable holding the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    #[serde(rename = "user-agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://libraries.io/api/Pypi".to_string(),
            per_page: 100,
            timeout_secs: 30,
            connect_timeout_secs: 10,
            api_key_env: "APIKEY".to_string(),
            user_agent: format!("contrib-harvest/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Local call-window limits
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Calls admitted per window; kept just under the documented 60/min
    pub calls: u32,

    #[serde(rename = "period-secs")]
    pub period_secs: u64,

    /// Refusals tolerated before a call is reported as exhausted
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    pub multiplier: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls: 59,
            period_secs: 60,
            max_attempts: 10,
            base_delay_ms: 500,
            multiplier: 2.0,
        }
    }
}

/// Retry policy for HTTP 429 responses from the remote
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Record store behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Attempts per record write before the record is skipped
    #[serde(rename = "write-attempts")]
    pub write_attempts: u32,

    /// How long SQLite waits on a locked database (seconds)
    #[serde(rename = "busy-timeout-secs")]
    pub busy_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            write_attempts: 3,
            busy_timeout_secs: 10,
        }
    }
}

/// Orchestrator behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Concurrent workers sharing the rate limiter
    pub workers: u32,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}
