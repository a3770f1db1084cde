//! Pipeline configuration.
//!
//! Loaded from an optional JSON file, then overridden from `HERALD_*`
//! environment variables.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::domain::{Inbox, RetryPolicy};

pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid value for {key}: {value:?}")]
    InvalidOverride { key: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Default tracing level; `RUST_LOG` wins when set.
    pub log_level: String,
    /// Follower inboxes per follower-batch step.
    pub batch_size: usize,
    pub continuation_delay_secs: u64,
    /// Delay before re-running a step that found its lock held.
    pub contention_delay_secs: u64,
    pub lock_stale_after_secs: u64,
    /// Total deliveries per endpoint and cycle, the initial one included.
    pub retry_max_attempts: u32,
    pub retry_base_delay_secs: u64,
    pub retry_ttl_secs: u64,
    pub delivery_timeout_secs: u64,
    pub max_response_bytes: usize,
    /// Relay inboxes that receive every public activity.
    pub relays: Vec<String>,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub visibility_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    /// Minimum idle time of a pending item before the sweep re-triggers it.
    pub stuck_after_secs: u64,
    pub retention_days: u32,
    pub purge_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            batch_size: 100,
            continuation_delay_secs: 30,
            contention_delay_secs: 60,
            lock_stale_after_secs: 30 * 60,
            retry_max_attempts: 3,
            retry_base_delay_secs: 60 * 60,
            retry_ttl_secs: 7 * 24 * 60 * 60,
            delivery_timeout_secs: 100,
            max_response_bytes: 1024 * 1024,
            relays: Vec::new(),
            workers: 1,
            poll_interval_ms: 1000,
            visibility_timeout_secs: 600,
            sweep_interval_secs: 900,
            stuck_after_secs: 60 * 60,
            retention_days: 30,
            purge_batch_size: 500,
        }
    }
}

impl PipelineConfig {
    /// Reads `path` if it exists (defaults otherwise), then applies the
    /// process environment and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from_file(path)?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Applies `HERALD_*` overrides looked up through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("HERALD_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(raw) = lookup("HERALD_BATCH_SIZE") {
            self.batch_size = parse_override("HERALD_BATCH_SIZE", raw)?;
        }
        if let Some(raw) = lookup("HERALD_WORKERS") {
            self.workers = parse_override("HERALD_WORKERS", raw)?;
        }
        if let Some(raw) = lookup("HERALD_RELAYS") {
            self.relays = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry_max_attempts must be at least 1".into(),
            ));
        }
        if self.purge_batch_size == 0 {
            return Err(ConfigError::Invalid(
                "purge_batch_size must be at least 1".into(),
            ));
        }
        if self.visibility_timeout_secs < self.delivery_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "visibility_timeout_secs ({}) is shorter than one delivery ({}s)",
                self.visibility_timeout_secs, self.delivery_timeout_secs
            )));
        }
        // A redelivered step must meet a held lock, not a stale one.
        if self.lock_stale_after_secs < self.visibility_timeout_secs {
            return Err(ConfigError::Invalid(format!(
                "lock_stale_after_secs ({}) is shorter than visibility_timeout_secs ({})",
                self.lock_stale_after_secs, self.visibility_timeout_secs
            )));
        }
        let budget = self.step_budget();
        if self.lock_stale_after() < budget {
            warn!(
                step_budget_secs = budget.as_secs(),
                lock_stale_after_secs = self.lock_stale_after_secs,
                "a follower batch of timeouts can outlast its lock"
            );
        }
        for relay in &self.relays {
            url::Url::parse(relay)
                .map_err(|e| ConfigError::Invalid(format!("relay {relay:?}: {e}")))?;
        }
        Ok(())
    }

    /// Worst-case run time of one follower batch: every delivery times out.
    pub fn step_budget(&self) -> Duration {
        let deliveries = u32::try_from(self.batch_size).unwrap_or(u32::MAX);
        self.delivery_timeout().saturating_mul(deliveries)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(self.retry_base_delay_secs),
            max_attempts: self.retry_max_attempts,
            ttl: Duration::from_secs(self.retry_ttl_secs),
        }
    }

    pub fn relay_inboxes(&self) -> Vec<Inbox> {
        self.relays.iter().map(|r| Inbox::new(r.as_str())).collect()
    }

    pub fn continuation_delay(&self) -> Duration {
        Duration::from_secs(self.continuation_delay_secs)
    }

    pub fn contention_delay(&self) -> Duration {
        Duration::from_secs(self.contention_delay_secs)
    }

    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::from_secs(self.stuck_after_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(u64::from(self.retention_days) * 24 * 60 * 60)
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride { key, value: raw })
}
