//! Configuration management for taskhive.
//!
//! Configuration can be set via environment variables:
//! - `OPENROUTER_API_KEY` - Optional. Without it, LLM-backed agents run in offline mode.
//! - `ASSISTANT_MODEL` - Optional. Model for the assistant agent. Defaults to `openai/gpt-4o-mini`.
//! - `TASK_QUEUE_CAPACITY` - Optional. Pending tasks held under backpressure. Defaults to `64`. `0` disables queueing.
//! - `DEFAULT_TASK_TIMEOUT_SECS` - Optional. Timeout applied to requests without one. Defaults to `60`.
//! - `RESULT_TTL_SECS` - Optional. How long completed results are retained. Defaults to `3600`.
//! - `MONITOR_INTERVAL_MS` - Optional. Health monitor tick interval. Defaults to `5000`.
//! - `UNHEALTHY_AFTER_FAILURES` - Optional. Consecutive failures before cooldown. Defaults to `3`.
//! - `RECOVERY_COOLDOWN_SECS` - Optional. Cooldown before an unhealthy instance is routable again. Defaults to `30`.
//! - `CHECKPOINT_STORE` - Optional. `memory` or `file`. Defaults to `memory`.
//! - `CHECKPOINT_DIR` - Optional. Directory for the file checkpoint store. Defaults to `./checkpoints`.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::bus::CheckpointStoreType;
use crate::pool::PoolConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// OpenRouter API key; None enables offline mode for LLM-backed agents
    pub api_key: Option<String>,

    /// Model used by the assistant agent
    pub assistant_model: String,

    /// Pool tuning
    pub pool: PoolConfig,

    /// Health monitor tick interval
    pub monitor_interval: Duration,

    /// Default timeout for requests that don't specify one
    pub default_task_timeout: Duration,

    /// Checkpoint store backend
    pub checkpoint_store: CheckpointStoreType,

    /// Directory for the file checkpoint store
    pub checkpoint_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            assistant_model: "openai/gpt-4o-mini".to_string(),
            pool: PoolConfig::default(),
            monitor_interval: Duration::from_millis(5000),
            default_task_timeout: Duration::from_secs(60),
            checkpoint_store: CheckpointStoreType::Memory,
            checkpoint_dir: PathBuf::from("./checkpoints"),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` for unparseable numeric values.
    /// A missing API key is not an error — agents degrade to offline mode.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_key = std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty());

        let assistant_model =
            std::env::var("ASSISTANT_MODEL").unwrap_or(defaults.assistant_model);

        let pool = PoolConfig {
            queue_capacity: parse_env("TASK_QUEUE_CAPACITY", defaults.pool.queue_capacity)?,
            unhealthy_after_failures: parse_env(
                "UNHEALTHY_AFTER_FAILURES",
                defaults.pool.unhealthy_after_failures,
            )?,
            recovery_cooldown: Duration::from_secs(parse_env(
                "RECOVERY_COOLDOWN_SECS",
                defaults.pool.recovery_cooldown.as_secs(),
            )?),
            heartbeat_stale_after: defaults.pool.heartbeat_stale_after,
            result_ttl: Duration::from_secs(parse_env(
                "RESULT_TTL_SECS",
                defaults.pool.result_ttl.as_secs(),
            )?),
        };

        let monitor_interval = Duration::from_millis(parse_env(
            "MONITOR_INTERVAL_MS",
            defaults.monitor_interval.as_millis() as u64,
        )?);

        let default_task_timeout = Duration::from_secs(parse_env(
            "DEFAULT_TASK_TIMEOUT_SECS",
            defaults.default_task_timeout.as_secs(),
        )?);

        let checkpoint_store = std::env::var("CHECKPOINT_STORE")
            .map(|s| CheckpointStoreType::parse(&s))
            .unwrap_or(defaults.checkpoint_store);

        let checkpoint_dir = std::env::var("CHECKPOINT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.checkpoint_dir);

        Ok(Self {
            api_key,
            assistant_model,
            pool,
            monitor_interval,
            default_task_timeout,
            checkpoint_store,
            checkpoint_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert!(config.api_key.is_none());
        assert_eq!(config.pool.queue_capacity, 64);
        assert_eq!(config.checkpoint_store, CheckpointStoreType::Memory);
    }
}
