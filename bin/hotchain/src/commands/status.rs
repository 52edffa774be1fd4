//! The `status` subcommand.

use anyhow::{Result, bail};
use clap::Parser;
use hotchain_rpc::IngestApiClient;
use jsonrpsee::http_client::HttpClientBuilder;
use serde::Serialize;
use url::Url;

/// Queries the control surface of a running node and prints the answer as JSON.
#[derive(Parser, Debug, Clone)]
#[command(about = "Queries a running node")]
pub struct StatusCommand {
    /// Control surface of the node.
    #[arg(long = "rpc.url", default_value = "http://127.0.0.1:8645", env = "HOTCHAIN_RPC_URL")]
    pub rpc_url: Url,
    /// Reports one backfill job.
    #[arg(long, conflicts_with_all = ["list", "cursor"])]
    pub job: Option<u64>,
    /// Lists every backfill job.
    #[arg(long, conflicts_with = "cursor")]
    pub list: bool,
    /// Reports the ingestion cursor.
    #[arg(long)]
    pub cursor: bool,
}

impl StatusCommand {
    /// Runs the subcommand.
    pub async fn run(self) -> Result<()> {
        let client = HttpClientBuilder::default().build(self.rpc_url.as_str())?;
        if let Some(job_id) = self.job {
            print(&client.backfill_status(job_id).await?)
        } else if self.list {
            print(&client.list_backfills().await?)
        } else if self.cursor {
            print(&client.cursor().await?)
        } else {
            bail!("nothing to query: pass --job <ID>, --list or --cursor")
        }
    }
}

pub(crate) fn print<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
