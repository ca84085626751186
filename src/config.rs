//! Configuration types for wayback-dl

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::{Error, Result};

/// Default CDX search endpoint
pub const DEFAULT_ENDPOINT: &str = "https://web.archive.org/cdx/search/cdx";

/// Longest single backoff wait; computed delays saturate here
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Largest accepted `retry.backoff_multiplier`
pub const MAX_BACKOFF_MULTIPLIER: f64 = 10.0;

/// CDX index API settings
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// CDX search endpoint, without query string (default: [`DEFAULT_ENDPOINT`])
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Per-request deadline (default: 180 seconds)
    ///
    /// Pages of a large domain can take minutes to assemble server-side.
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Records requested per page (default: 1000)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Referer header sent with every request
    #[serde(default = "default_referer")]
    pub referer: String,

    /// Approximate records per index page used by the record-count estimate (default: 3000)
    #[serde(default = "default_records_per_estimate_page")]
    pub records_per_estimate_page: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout: default_timeout(),
            page_size: default_page_size(),
            user_agent: default_user_agent(),
            referer: default_referer(),
            records_per_estimate_page: default_records_per_estimate_page(),
        }
    }
}

/// Retry configuration for rate-limited or timed-out page requests
///
/// Backoff is a fixed exponential schedule: `initial_delay`, then multiplied by
/// `backoff_multiplier` for each further attempt. There is no jitter.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries for a single page (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 10 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

/// Data storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./wayback-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for wayback-dl
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// CDX API settings
    #[serde(default)]
    pub api: ApiConfig,

    /// Retry policy for page requests
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Check the configuration for values the fetch engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.api.endpoint.trim().is_empty() {
            return Err(config_error("endpoint must not be empty", "api.endpoint"));
        }
        if self.api.endpoint.contains('?') {
            return Err(config_error(
                "endpoint must not contain a query string",
                "api.endpoint",
            ));
        }
        if self.api.page_size == 0 {
            return Err(config_error("page size must be at least 1", "api.page_size"));
        }
        if self.api.timeout.is_zero() {
            return Err(config_error("timeout must be non-zero", "api.timeout"));
        }
        let multiplier = self.retry.backoff_multiplier;
        if !(1.0..=MAX_BACKOFF_MULTIPLIER).contains(&multiplier) {
            return Err(config_error(
                "backoff multiplier must be between 1.0 and 10.0",
                "retry.backoff_multiplier",
            ));
        }
        if self.retry.initial_delay > MAX_RETRY_DELAY {
            return Err(config_error(
                "initial retry delay must not exceed one hour",
                "retry.initial_delay",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_page_size() -> u32 {
    1000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string()
}

fn default_referer() -> String {
    "https://web.archive.org/".to_string()
}

fn default_records_per_estimate_page() -> u64 {
    3000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_database_path() -> PathBuf {
    PathBuf::from("wayback-dl.db")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
