//! Configuration for batching and uploading traces.
//!
//! Every setting is required. Configs come from a JSON document or from
//! `FIELDTRACE_*` environment variables; nothing falls back to a hidden
//! default.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Public trace ingress of the hosted collector.
pub const DEFAULT_ENDPOINT: &str = "https://engine-report.apollodata.com/api/ingress/traces";

/// Header carrying the collector API key.
pub const API_KEY_HEADER: &str = "X-Api-Key";

const ENV_PREFIX: &str = "FIELDTRACE_";

// ─────────────────────────────────────────────────────────────────────────────
// Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {name}: {value:?}")]
    InvalidVar { name: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Structs
// ─────────────────────────────────────────────────────────────────────────────

/// Settings of the batch queue and its flush scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Interval between scheduled flushes.
    pub batching_window_ms: u64,
    /// Maximum number of traces buffered between flushes.
    pub queue_capacity: usize,
    /// Number of flush workers.
    pub workers: usize,
    /// Upper bound on the wait for in-flight uploads at shutdown.
    pub shutdown_timeout_ms: u64,
}

impl BatchConfig {
    pub fn batching_window(&self) -> Duration {
        Duration::from_millis(self.batching_window_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Settings of the HTTP uploader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadConfig {
    pub endpoint: String,
    pub api_key: String,
    /// Retries after the first attempt before a report is dropped.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Maximum number of reports being transmitted at once.
    pub pool_size: usize,
}

impl UploadConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    pub batch: BatchConfig,
    pub upload: UploadConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// Loading
// ─────────────────────────────────────────────────────────────────────────────

impl TracingConfig {
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: TracingConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Reads the config from the process environment, honouring a `.env`
    /// file in the working directory.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the config through `lookup`, which maps a full variable name
    /// such as `FIELDTRACE_API_KEY` to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let config = TracingConfig {
            batch: BatchConfig {
                batching_window_ms: vars.parse("BATCHING_WINDOW_MS")?,
                queue_capacity: vars.parse("QUEUE_CAPACITY")?,
                workers: vars.parse("WORKERS")?,
                shutdown_timeout_ms: vars.parse("SHUTDOWN_TIMEOUT_MS")?,
            },
            upload: UploadConfig {
                endpoint: vars.get("ENDPOINT")?,
                api_key: vars.get("API_KEY")?,
                max_retries: vars.parse("MAX_RETRIES")?,
                retry_delay_ms: vars.parse("RETRY_DELAY_MS")?,
                connect_timeout_ms: vars.parse("CONNECT_TIMEOUT_MS")?,
                read_timeout_ms: vars.parse("READ_TIMEOUT_MS")?,
                pool_size: vars.parse("POOL_SIZE")?,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.batch.validate()?;
        self.upload.validate()
    }
}

impl BatchConfig {
    /// Rejects settings the queue cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.batching_window_ms > 0, "batch.batching_window_ms must be positive")?;
        ensure(self.queue_capacity > 0, "batch.queue_capacity must be positive")?;
        ensure(self.workers > 0, "batch.workers must be positive")
    }
}

impl UploadConfig {
    /// Rejects settings the uploader cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(self.pool_size > 0, "upload.pool_size must be positive")?;
        ensure(!self.endpoint.trim().is_empty(), "upload.endpoint must not be empty")?;
        ensure(!self.api_key.trim().is_empty(), "upload.api_key must not be empty")
    }
}

fn ensure(valid: bool, reason: &str) -> Result<(), ConfigError> {
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid(reason.to_string()))
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Result<String, ConfigError> {
        let name = format!("{}{}", ENV_PREFIX, key);
        (self.lookup)(&name).ok_or(ConfigError::MissingVar(name))
    }

    fn parse<T: FromStr>(&self, key: &str) -> Result<T, ConfigError> {
        let value = self.get(key)?;
        value.trim().parse().map_err(|_| ConfigError::InvalidVar {
            name: format!("{}{}", ENV_PREFIX, key),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"{
        "batch": {
            "batching_window_ms": 10000,
            "queue_capacity": 4096,
            "workers": 2,
            "shutdown_timeout_ms": 30000
        },
        "upload": {
            "endpoint": "http://127.0.0.1:9999/traces",
            "api_key": "service:key",
            "max_retries": 2,
            "retry_delay_ms": 1000,
            "connect_timeout_ms": 500,
            "read_timeout_ms": 3000,
            "pool_size": 10
        }
    }"#;

    fn env_map() -> HashMap<String, String> {
        [
            ("BATCHING_WINDOW_MS", "1000"),
            ("QUEUE_CAPACITY", "16"),
            ("WORKERS", "1"),
            ("SHUTDOWN_TIMEOUT_MS", "5000"),
            ("ENDPOINT", DEFAULT_ENDPOINT),
            ("API_KEY", "abc"),
            ("MAX_RETRIES", "3"),
            ("RETRY_DELAY_MS", "250"),
            ("CONNECT_TIMEOUT_MS", "500"),
            ("READ_TIMEOUT_MS", "3000"),
            ("POOL_SIZE", "4"),
        ]
        .into_iter()
        .map(|(k, v)| (format!("{}{}", ENV_PREFIX, k), v.to_string()))
        .collect()
    }

    #[test]
    fn test_parse_json() {
        let config = TracingConfig::from_json_str(SAMPLE).unwrap();
        assert_eq!(config.batch.batching_window(), Duration::from_secs(10));
        assert_eq!(config.batch.queue_capacity, 4096);
        assert_eq!(config.upload.max_retries, 2);
        assert_eq!(config.upload.connect_timeout(), Duration::from_millis(500));
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let without_key = SAMPLE.replace("\"api_key\": \"service:key\",", "");
        assert!(matches!(
            TracingConfig::from_json_str(&without_key),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_capacity() {
        let zero = SAMPLE.replace("\"queue_capacity\": 4096", "\"queue_capacity\": 0");
        let err = TracingConfig::from_json_str(&zero).unwrap_err();
        assert!(err.to_string().contains("queue_capacity"));
    }

    #[test]
    fn test_section_validation() {
        let config = TracingConfig::from_json_str(SAMPLE).unwrap();

        let mut batch = config.batch.clone();
        batch.batching_window_ms = 0;
        let err = batch.validate().unwrap_err();
        assert!(err.to_string().contains("batching_window_ms"));

        let mut upload = config.upload.clone();
        upload.api_key = "  ".into();
        let err = upload.validate().unwrap_err();
        assert!(err.to_string().contains("api_key"));

        assert!(config.batch.validate().is_ok());
        assert!(config.upload.validate().is_ok());
    }

    #[test]
    fn test_from_lookup() {
        let vars = env_map();
        let config = TracingConfig::from_lookup(|name| vars.get(name).cloned()).unwrap();
        assert_eq!(config.upload.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(config.upload.pool_size, 4);
        assert_eq!(config.batch.workers, 1);
        assert_eq!(config.upload.retry_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_lookup_reports_missing_and_invalid() {
        let mut vars = env_map();
        vars.remove("FIELDTRACE_API_KEY");
        let err = TracingConfig::from_lookup(|name| vars.get(name).cloned()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar(ref n) if n == "FIELDTRACE_API_KEY"));

        let mut vars = env_map();
        vars.insert("FIELDTRACE_WORKERS".into(), "many".into());
        let err = TracingConfig::from_lookup(|name| vars.get(name).cloned()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidVar { ref name, .. } if name == "FIELDTRACE_WORKERS"
        ));
    }
}
