//! Environment-driven settings. `.env` is honoured through `dotenvy` by the binary.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";
pub const DEFAULT_CEP_URL: &str = "https://viacep.com.br/ws";
pub const DEFAULT_DATA_DIR: &str = ".storefront";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2500;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the storefront API, including the version prefix.
    pub api_url: String,
    /// Base URL of the postal-code service.
    pub cep_url: String,
    /// Where the cart and session tokens are persisted.
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            cep_url: DEFAULT_CEP_URL.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let millis = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                Some(raw) => parse_positive(key, &raw).map(Duration::from_millis),
                None => Ok(default),
            }
        };
        let secs = |key: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(key) {
                Some(raw) => parse_positive(key, &raw).map(Duration::from_secs),
                None => Ok(default),
            }
        };

        Ok(Self {
            api_url: get("STOREFRONT_API_URL").unwrap_or(defaults.api_url),
            cep_url: get("STOREFRONT_CEP_URL").unwrap_or(defaults.cep_url),
            data_dir: get("STOREFRONT_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            poll_interval: millis("STOREFRONT_POLL_INTERVAL_MS", defaults.poll_interval)?,
            http_timeout: secs("STOREFRONT_HTTP_TIMEOUT_SECS", defaults.http_timeout)?,
        })
    }
}

fn parse_positive(key: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(ConfigError::Invalid { key, value: raw.to_string() }),
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value `{value}` for {key}: expected a positive integer")]
    Invalid { key: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("STOREFRONT_API_URL", "https://shop.example.com/api/v1"),
            ("STOREFRONT_DATA_DIR", "/tmp/shop"),
            ("STOREFRONT_POLL_INTERVAL_MS", "500"),
            ("STOREFRONT_CEP_URL", "  "),
        ]))
        .unwrap();
        assert_eq!(config.api_url, "https://shop.example.com/api/v1");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/shop"));
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert_eq!(config.cep_url, DEFAULT_CEP_URL);
    }

    #[test]
    fn test_invalid_interval() {
        let err = Config::from_lookup(lookup(&[("STOREFRONT_POLL_INTERVAL_MS", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::Invalid { key: "STOREFRONT_POLL_INTERVAL_MS", value: "0".into() });
    }
}
