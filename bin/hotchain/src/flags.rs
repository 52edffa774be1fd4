//! Flags shared by the subcommands.

use anyhow::{Context, Result};
use clap::Args;
use hotchain_cli::{LogArgs, MetricsArgs};
use hotchain_core::{IngestConfig, PublishPolicy};
use hotchain_source::RpcChainSource;
use hotchain_storage::RocksStore;
use std::{path::PathBuf, sync::Arc, time::Duration};
use url::Url;

/// Global arguments.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Logging arguments.
    #[command(flatten)]
    pub log: LogArgs,
    /// Prometheus arguments.
    #[command(flatten)]
    pub metrics: MetricsArgs,
    /// Pipeline configuration.
    #[command(flatten)]
    pub config: ConfigArgs,
}

/// Pipeline configuration: an optional TOML file, then per-option overrides.
#[derive(Args, Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigArgs {
    /// TOML configuration file.
    #[arg(long, global = true, env = "HOTCHAIN_CONFIG")]
    pub config: Option<PathBuf>,
    /// Hours of blocks kept in the buffer.
    #[arg(long, global = true, env = "HOTCHAIN_RETENTION_HOURS")]
    pub retention_hours: Option<u64>,
    /// Age in hours past which reads go to the historical store.
    #[arg(long, global = true, env = "HOTCHAIN_LAG_HOURS")]
    pub lag_hours: Option<u64>,
    /// Required gap in hours between retention and lag.
    #[arg(long, global = true, env = "HOTCHAIN_SAFETY_MARGIN_HOURS")]
    pub safety_margin_hours: Option<u64>,
    /// Heights per backfill chunk.
    #[arg(long, global = true, env = "HOTCHAIN_BACKFILL_BATCH_SIZE")]
    pub backfill_batch_size: Option<u64>,
    /// Backfill workers per job.
    #[arg(long, global = true, env = "HOTCHAIN_BACKFILL_CONCURRENCY")]
    pub backfill_concurrency: Option<usize>,
    /// Deepest reorg repaired without operator action.
    #[arg(long, global = true, env = "HOTCHAIN_MAX_REORG_DEPTH")]
    pub max_reorg_depth: Option<u64>,
    /// Initial delay of retried node and storage calls, in milliseconds.
    #[arg(long, global = true, env = "HOTCHAIN_RETRY_BACKOFF_BASE_MS")]
    pub retry_backoff_base_ms: Option<u64>,
    /// Longest delay between two retries, in milliseconds.
    #[arg(long, global = true, env = "HOTCHAIN_RETRY_BACKOFF_MAX_MS")]
    pub retry_backoff_max_ms: Option<u64>,
    /// Attempts before a retried call gives up.
    #[arg(long, global = true, env = "HOTCHAIN_RETRY_MAX_ATTEMPTS")]
    pub retry_max_attempts: Option<usize>,
    /// Seconds between two polls of the chain tip.
    #[arg(long, global = true, env = "HOTCHAIN_POLL_INTERVAL_SECS")]
    pub poll_interval_secs: Option<u64>,
    /// Seconds between two retention sweeps.
    #[arg(long, global = true, env = "HOTCHAIN_SWEEP_INTERVAL_SECS")]
    pub sweep_interval_secs: Option<u64>,
    /// Behaviour of the block event channel when full: `block` or `drop-oldest`.
    #[arg(long, global = true, env = "HOTCHAIN_PUBLISH_POLICY")]
    pub publish_policy: Option<PublishPolicy>,
}

impl ConfigArgs {
    /// Loads the configuration file, applies the overrides and validates the result.
    pub fn load(&self) -> Result<IngestConfig> {
        let mut config = match &self.config {
            Some(path) => IngestConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => IngestConfig::default(),
        };

        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = self.$field { config.$field = value; })*
            };
        }
        apply!(
            retention_hours,
            lag_hours,
            safety_margin_hours,
            backfill_batch_size,
            backfill_concurrency,
            max_reorg_depth,
            retry_backoff_base_ms,
            retry_backoff_max_ms,
            retry_max_attempts,
            poll_interval_secs,
            sweep_interval_secs,
            publish_policy,
        );

        config.validate()?;
        Ok(config)
    }
}

/// Connection to the Bitcoin node.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// JSON-RPC endpoint of Bitcoin Core, credentials included.
    #[arg(long = "bitcoin.rpc", env = "HOTCHAIN_BITCOIN_RPC")]
    pub bitcoin_rpc: Url,
    /// Per-request timeout in seconds.
    #[arg(long = "bitcoin.timeout", default_value_t = 30, env = "HOTCHAIN_BITCOIN_TIMEOUT")]
    pub timeout_secs: u64,
}

impl SourceArgs {
    /// Builds the chain source.
    pub fn source(&self) -> Result<RpcChainSource> {
        Ok(RpcChainSource::new(self.bitcoin_rpc.clone(), Duration::from_secs(self.timeout_secs))?)
    }
}

/// Location of the stores.
#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Directory of the hot buffer database.
    #[arg(long, default_value = "./hotchain-data", env = "HOTCHAIN_DATADIR")]
    pub datadir: PathBuf,
    /// Directory of the historical database, opened read-only.
    #[arg(long, env = "HOTCHAIN_HISTORICAL")]
    pub historical: Option<PathBuf>,
}

impl StoreArgs {
    /// Opens the hot buffer.
    pub fn buffer(&self) -> Result<Arc<RocksStore>> {
        let store = RocksStore::open(&self.datadir)
            .with_context(|| format!("opening buffer at {}", self.datadir.display()))?;
        Ok(Arc::new(store))
    }
}
