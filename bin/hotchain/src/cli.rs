//! The `hotchain` CLI.

use crate::{
    commands::{BackfillCommand, NodeCommand, StatusCommand},
    flags::GlobalArgs,
};
use anyhow::Result;
use clap::{Parser, Subcommand};
use hotchain_cli::cli_styles;
use hotchain_core::Metrics;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Runs live ingestion, retention, backfill and the control surface.
    Node(NodeCommand),
    /// Runs one backfill job in the foreground.
    Backfill(BackfillCommand),
    /// Queries a running node.
    Status(StatusCommand),
}

/// Bitcoin hot buffer ingestion node.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, styles = cli_styles(), long_about = None)]
pub struct Cli {
    /// Global arguments.
    #[command(flatten)]
    pub global: GlobalArgs,
    /// The subcommand to run.
    #[command(subcommand)]
    pub subcommand: Commands,
}

impl Cli {
    /// Runs the CLI.
    pub fn run(self) -> Result<()> {
        self.global.log.init_tracing_subscriber()?;

        match self.subcommand {
            Commands::Node(node) => {
                Self::init_metrics(&self.global)?;
                Self::run_until_ctrl_c(|shutdown| node.run(&self.global, shutdown))
            }
            Commands::Backfill(backfill) => {
                Self::init_metrics(&self.global)?;
                Self::run_until_ctrl_c(|shutdown| backfill.run(&self.global, shutdown))
            }
            Commands::Status(status) => Self::tokio_runtime()?.block_on(status.run()),
        }
    }

    fn init_metrics(global: &GlobalArgs) -> Result<()> {
        if global.metrics.init_metrics()?.is_some() {
            Metrics::init();
        }
        Ok(())
    }

    /// Runs the future built by `start` on a fresh runtime. Ctrl-C cancels the
    /// token handed to `start`; the future is expected to wind down on its own.
    pub fn run_until_ctrl_c<F, Fut>(start: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let runtime = Self::tokio_runtime()?;
        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        runtime.spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!(target: "cli", "Received Ctrl-C, shutting down");
            }
            signal.cancel();
        });
        runtime.block_on(start(shutdown))
    }

    /// Creates a multi-thread runtime with every driver enabled.
    pub fn tokio_runtime() -> Result<tokio::runtime::Runtime, std::io::Error> {
        tokio::runtime::Builder::new_multi_thread().enable_all().build()
    }
}
