//! Configuration loader with file and environment variable support.

use crate::{ConfigError, RetryInterval, RunnerConfig};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "runner.toml",
    "update-runner.toml",
    "./config/runner.toml",
    "/etc/update-runner/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<RunnerConfig, ConfigError> {
        let mut config = RunnerConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading update runner configuration from file");
            config = RunnerConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("UPDATE_RUNNER_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut RunnerConfig) {
        if let Ok(val) = env::var("UPDATE_RUNNER_SINK_CONCURRENCY") {
            if let Ok(n) = val.parse() {
                config.sink.concurrency = n;
            }
        }
        if let Ok(val) = env::var("UPDATE_RUNNER_SINK_TIMEOUT_MS") {
            config.sink.timeout_ms = val.parse().ok();
        }
        if let Ok(val) = env::var("UPDATE_RUNNER_SOURCE_SPEED_TRAFFIC_BALANCE") {
            if let Ok(n) = val.parse() {
                config.source.speed_traffic_balance = n;
            }
        }
        if let Ok(val) = env::var("UPDATE_RUNNER_SOURCE_MAX_DELAY_MS") {
            if let Ok(n) = val.parse() {
                config.source.max_delay_milliseconds = n;
            }
        }
        if let Ok(val) = env::var("UPDATE_RUNNER_FETCHER_MAX_RETRY_TIME_MS") {
            if let Ok(n) = val.parse() {
                config.fetcher.max_retry_time_ms = n;
            }
        }
        if let Ok(val) = env::var("UPDATE_RUNNER_FETCHER_RETRY_INTERVAL") {
            config.fetcher.retry_interval = match val.as_str() {
                "exponential" => RetryInterval::Exponential,
                "quadratic" => RetryInterval::Quadratic,
                fixed => fixed
                    .strip_prefix("fixed:")
                    .and_then(|ms| ms.parse().ok())
                    .map(RetryInterval::Fixed)
                    .unwrap_or(config.fetcher.retry_interval),
            };
        }
        if let Ok(val) = env::var("UPDATE_RUNNER_FETCHER_SILENT") {
            if let Ok(b) = val.parse() {
                config.fetcher.silent = b;
            }
        }
        if let Ok(val) = env::var("UPDATE_RUNNER_DISTRIBUTOR_WORKER_COUNT") {
            if let Ok(n) = val.parse() {
                config.distributor.worker_count = n;
            }
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
