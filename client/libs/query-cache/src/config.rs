//! Cache configuration
//!
//! Loaded from environment variables with defaults for development.

use crate::error::ConfigError;
use resilience::{Retries, RetryConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Retry policy for query fetches (mutations never retry)
    pub query_retry: RetryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            query_retry: RetryConfig::new(Retries::Once, Duration::from_millis(1000)),
        }
    }
}

impl CacheConfig {
    /// Load configuration from environment variables
    ///
    /// - `QUERY_CACHE_RETRIES`: 0 or 1 (default 1)
    /// - `QUERY_CACHE_BACKOFF_MS`: delay before the retry (default 1000)
    /// - `QUERY_CACHE_RETRY_JITTER`: true/false (default false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let retries = match env::var("QUERY_CACHE_RETRIES") {
            Ok(raw) => {
                let count: u32 = raw.trim().parse().map_err(|_| ConfigError::InvalidVar {
                    var: "QUERY_CACHE_RETRIES",
                    reason: format!("'{}' is not a number", raw),
                })?;
                Retries::try_from(count)?
            }
            Err(_) => defaults.query_retry.retries,
        };

        let backoff = match env::var("QUERY_CACHE_BACKOFF_MS") {
            Ok(raw) => Duration::from_millis(raw.trim().parse().map_err(|_| {
                ConfigError::InvalidVar {
                    var: "QUERY_CACHE_BACKOFF_MS",
                    reason: format!("'{}' is not a number of milliseconds", raw),
                }
            })?),
            Err(_) => defaults.query_retry.backoff,
        };

        let jitter = env::var("QUERY_CACHE_RETRY_JITTER")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.query_retry.jitter);

        Ok(Self {
            query_retry: RetryConfig::new(retries, backoff).with_jitter(jitter),
        })
    }

    pub fn with_query_retry(mut self, retry: RetryConfig) -> Self {
        self.query_retry = retry;
        self
    }
}
