//! TOML-based configuration with environment variable override support.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    ValidationError(String),
}

/// Root configuration for the update runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub sink: SinkConfig,
    pub source: SourceConfig,
    pub fetcher: FetcherConfig,
    pub distributor: DistributorConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            sink: SinkConfig::default(),
            source: SourceConfig::default(),
            fetcher: FetcherConfig::default(),
            distributor: DistributorConfig::default(),
        }
    }
}

impl RunnerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: RunnerConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Maximum in-flight updates under the concurrent sink mode.
    pub concurrency: usize,
    /// Per-task timeout in milliseconds. `None` disables timeouts.
    pub timeout_ms: Option<u64>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            concurrency: 500,
            timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Trade latency for reduced call volume, in [0, 1].
    pub speed_traffic_balance: f64,
    /// Hard cap on the inter-batch pacing wait.
    pub max_delay_milliseconds: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            speed_traffic_balance: 0.0,
            max_delay_milliseconds: 500,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryInterval {
    Exponential,
    Quadratic,
    Fixed(u64),
}

impl Default for RetryInterval {
    fn default() -> Self {
        RetryInterval::Exponential
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetcherConfig {
    /// Total retry budget in milliseconds before giving up. Default 15h.
    pub max_retry_time_ms: u64,
    pub retry_interval: RetryInterval,
    /// Suppress warn-level retry logging.
    pub silent: bool,
    /// Forwarded verbatim into `Supplier::supply`'s `extras` argument.
    pub fetch: serde_json::Value,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            max_retry_time_ms: 54_000_000,
            retry_interval: RetryInterval::Exponential,
            silent: false,
            fetch: serde_json::json!({}),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributorConfig {
    pub worker_count: usize,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self { worker_count: 4 }
    }
}
