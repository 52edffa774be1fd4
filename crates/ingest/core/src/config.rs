//! Typed configuration of the ingestion pipeline.

use crate::PublishPolicy;
use backon::ExponentialBuilder;
use hotchain_primitives::{BufferWindow, WindowError};
use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use thiserror::Error;

/// Errors raised while loading or validating an [`IngestConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// The configuration file is not valid TOML for [`IngestConfig`].
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    /// The buffer window invariant does not hold.
    #[error(transparent)]
    Window(#[from] WindowError),
    /// An option is out of range.
    #[error("invalid `{option}`: {reason}")]
    Invalid {
        /// The offending option, as spelled in the config file.
        option: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Every option recognised by the pipeline.
///
/// Keys are kebab-case in TOML. Missing keys take their default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct IngestConfig {
    /// Buffer rows older than this many hours are evicted.
    pub retention_hours: u64,
    /// Reads older than this many hours are served by the historical store.
    pub lag_hours: u64,
    /// Minimum gap between `retention_hours` and `lag_hours`.
    pub safety_margin_hours: u64,
    /// Heights per backfill chunk.
    pub backfill_batch_size: u64,
    /// Backfill workers per job.
    pub backfill_concurrency: usize,
    /// Deepest reorg the reconciler repairs automatically.
    pub max_reorg_depth: u64,
    /// First retry delay for source and storage calls.
    pub retry_backoff_base_ms: u64,
    /// Upper bound of the retry delay.
    pub retry_backoff_max_ms: u64,
    /// Attempts per call, the first one included.
    pub retry_max_attempts: usize,
    /// Delay between two polls of the chain tip.
    pub poll_interval_secs: u64,
    /// Delay between two retention sweeps.
    pub sweep_interval_secs: u64,
    /// Capacity of the block event channel.
    pub publish_capacity: usize,
    /// Behaviour of the block event channel when full.
    pub publish_policy: PublishPolicy,
    /// Fetch and store transactions, inputs and outputs.
    pub include_transactions: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retention_hours: 48,
            lag_hours: 24,
            safety_margin_hours: 6,
            backfill_batch_size: 500,
            backfill_concurrency: 4,
            max_reorg_depth: 100,
            retry_backoff_base_ms: 500,
            retry_backoff_max_ms: 30_000,
            retry_max_attempts: 5,
            poll_interval_secs: 10,
            sweep_interval_secs: 6 * 60 * 60,
            publish_capacity: 1024,
            publish_policy: PublishPolicy::Block,
            include_transactions: true,
        }
    }
}

impl IngestConfig {
    /// Parses a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Checks every option. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.window()?;
        let checks = [
            (self.backfill_batch_size == 0, "backfill-batch-size", "must be non-zero"),
            (self.backfill_concurrency == 0, "backfill-concurrency", "must be non-zero"),
            (self.poll_interval_secs == 0, "poll-interval-secs", "must be non-zero"),
            (self.sweep_interval_secs == 0, "sweep-interval-secs", "must be non-zero"),
            (self.publish_capacity == 0, "publish-capacity", "must be non-zero"),
            (self.retry_max_attempts == 0, "retry-max-attempts", "must be at least 1"),
            (
                self.retry_backoff_base_ms > self.retry_backoff_max_ms,
                "retry-backoff-base-ms",
                "must not exceed retry-backoff-max-ms",
            ),
        ];
        match checks.into_iter().find(|(failed, _, _)| *failed) {
            Some((_, option, reason)) => Err(ConfigError::Invalid { option, reason }),
            None => Ok(()),
        }
    }

    /// The buffer window, checked against the safety margin.
    pub const fn window(&self) -> Result<BufferWindow, WindowError> {
        BufferWindow::new(self.lag_hours, self.retention_hours, self.safety_margin_hours)
    }

    /// Retry policy for source and storage calls.
    pub const fn retry(&self) -> RetryConfig {
        RetryConfig {
            base: Duration::from_millis(self.retry_backoff_base_ms),
            max: Duration::from_millis(self.retry_backoff_max_ms),
            max_attempts: self.retry_max_attempts,
        }
    }

    /// Delay between two polls of the chain tip.
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Delay between two retention sweeps.
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// First delay.
    pub base: Duration,
    /// Largest delay.
    pub max: Duration,
    /// Attempts, the first one included.
    pub max_attempts: usize,
}

impl RetryConfig {
    /// Builds the backoff for one retried call.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.base)
            .with_max_delay(self.max)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        config.validate().unwrap();
        assert_eq!(config.window().unwrap().boundary(100 * 3_600), 76 * 3_600);
        assert_eq!(config.retry().max_attempts, 5);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = IngestConfig::from_toml(
            r#"
            retention-hours = 72
            lag-hours = 12
            publish-policy = "drop-oldest"
            "#,
        )
        .unwrap();
        assert_eq!(config.retention_hours, 72);
        assert_eq!(config.lag_hours, 12);
        assert_eq!(config.publish_policy, PublishPolicy::DropOldest);
        assert_eq!(config.backfill_batch_size, 500);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(matches!(
            IngestConfig::from_toml("retention = 1"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[rstest]
    #[case(IngestConfig { retention_hours: 25, ..Default::default() }, "window")]
    #[case(IngestConfig { backfill_batch_size: 0, ..Default::default() }, "backfill-batch-size")]
    #[case(IngestConfig { backfill_concurrency: 0, ..Default::default() }, "backfill-concurrency")]
    #[case(IngestConfig { retry_max_attempts: 0, ..Default::default() }, "retry-max-attempts")]
    #[case(IngestConfig { retry_backoff_base_ms: 60_000, ..Default::default() }, "retry-backoff-base-ms")]
    fn test_validate_rejects(#[case] config: IngestConfig, #[case] option: &str) {
        match config.validate().unwrap_err() {
            ConfigError::Window(_) => assert_eq!(option, "window"),
            ConfigError::Invalid { option: got, .. } => assert_eq!(got, option),
            other => panic!("unexpected error: {other}"),
        }
    }
}
