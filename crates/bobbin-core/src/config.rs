//! Queue configuration.
//!
//! Defaults are usable as-is. `QueueConfig::from_env` overlays `BOBBIN_*`
//! environment variables; `serde` lets callers embed the struct in a larger
//! config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const ENV_IDLE_POLL_MS: &str = "BOBBIN_IDLE_POLL_MS";
pub const ENV_ERROR_BACKOFF_MS: &str = "BOBBIN_ERROR_BACKOFF_MS";
pub const ENV_WORKER_PREFIX: &str = "BOBBIN_WORKER_PREFIX";
pub const ENV_RETRY_PRIORITY_STEP: &str = "BOBBIN_RETRY_PRIORITY_STEP";
pub const ENV_LOG: &str = "BOBBIN_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Sleep after a polling pass that found no work.
    pub idle_poll_interval_ms: u64,

    /// Sleep after a polling pass that hit a store error.
    pub error_backoff_ms: u64,

    /// Worker ids are `{prefix}-{n}`.
    pub worker_name_prefix: String,

    /// Each retry is requeued `step` lower than the previous attempt.
    pub retry_priority_step: i64,

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            idle_poll_interval_ms: 100,
            error_backoff_ms: 1_000,
            worker_name_prefix: "worker".to_string(),
            retry_priority_step: 1,
            log_filter: "info".to_string(),
        }
    }
}

impl QueueConfig {
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Defaults overlaid with `BOBBIN_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup(ENV_IDLE_POLL_MS) {
            config.idle_poll_interval_ms = parse(ENV_IDLE_POLL_MS, v)?;
        }
        if let Some(v) = lookup(ENV_ERROR_BACKOFF_MS) {
            config.error_backoff_ms = parse(ENV_ERROR_BACKOFF_MS, v)?;
        }
        if let Some(v) = lookup(ENV_WORKER_PREFIX) {
            if v.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: ENV_WORKER_PREFIX,
                    value: v,
                    reason: "must not be empty".to_string(),
                });
            }
            config.worker_name_prefix = v;
        }
        if let Some(v) = lookup(ENV_RETRY_PRIORITY_STEP) {
            config.retry_priority_step = parse(ENV_RETRY_PRIORITY_STEP, v)?;
        }
        if let Some(v) = lookup(ENV_LOG) {
            config.log_filter = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// 値の範囲チェック。serde 経由で組み立てた設定もここを通す
    pub fn validate(&self) -> Result<(), ConfigError> {
        // step が 1 未満だとリトライのスコアが下がらない
        if self.retry_priority_step < 1 {
            return Err(ConfigError::InvalidValue {
                key: ENV_RETRY_PRIORITY_STEP,
                value: self.retry_priority_step.to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.worker_name_prefix.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: ENV_WORKER_PREFIX,
                value: self.worker_name_prefix.clone(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

fn parse<T>(key: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key,
            reason: e.to_string(),
            value,
        })
}
