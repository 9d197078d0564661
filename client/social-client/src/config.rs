/// Configuration management for the social client
///
/// Loads configuration from environment variables.
use anyhow::{Context, Result};
use query_cache::CacheConfig;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    pub app: AppConfig,
    /// Query cache retry policy
    pub cache: CacheConfig,
}

/// Application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application environment (development, staging, production)
    pub env: String,
    /// Principal of the signed-in user; anonymous when unset
    pub identity: Option<String>,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let app = AppConfig {
            env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
            identity: std::env::var("CLIENT_IDENTITY")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            log_format: match std::env::var("LOG_FORMAT") {
                Ok(raw) => parse_log_format(&raw)?,
                Err(_) => LogFormat::Text,
            },
        };

        let cache = CacheConfig::from_env().context("Invalid query cache configuration")?;

        Ok(Self { app, cache })
    }
}

fn parse_log_format(raw: &str) -> Result<LogFormat> {
    match raw.trim().to_lowercase().as_str() {
        "text" | "pretty" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use query_cache::Retries;
    use serial_test::serial;

    fn clear_env() {
        for var in [
            "APP_ENV",
            "CLIENT_IDENTITY",
            "LOG_FORMAT",
            "QUERY_CACHE_RETRIES",
            "QUERY_CACHE_BACKOFF_MS",
            "QUERY_CACHE_RETRY_JITTER",
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        let config = Config::from_env().unwrap();
        assert_eq!(config.app.env, "development");
        assert_eq!(config.app.identity, None);
        assert_eq!(config.app.log_format, LogFormat::Text);
        assert_eq!(config.cache.query_retry.retries, Retries::Once);
    }

    #[test]
    #[serial]
    fn test_overrides_and_errors() {
        clear_env();
        std::env::set_var("CLIENT_IDENTITY", " alice ");
        std::env::set_var("LOG_FORMAT", "JSON");
        std::env::set_var("QUERY_CACHE_RETRIES", "0");
        let config = Config::from_env().unwrap();
        assert_eq!(config.app.identity.as_deref(), Some("alice"));
        assert_eq!(config.app.log_format, LogFormat::Json);
        assert_eq!(config.cache.query_retry.retries, Retries::Never);

        std::env::set_var("QUERY_CACHE_RETRIES", "3");
        assert!(Config::from_env().is_err());
        clear_env();
    }
}
