//! The `backfill` subcommand.

use super::status::print;
use crate::flags::{GlobalArgs, SourceArgs, StoreArgs};
use anyhow::{Result, bail};
use clap::Parser;
use hotchain_core::BackfillOrchestrator;
use hotchain_primitives::{BackfillRange, BackfillRequest, JobStatus, JobStatusReport};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Runs one backfill job in the foreground and prints its final status.
///
/// Ctrl-C pauses the job with its progress persisted; `--resume <ID>` picks it up
/// again. Do not run against a data directory that a node has open.
///
/// # Usage
///
/// ```sh
/// hotchain backfill --bitcoin.rpc <URL> --start 0 --end 10000
/// hotchain backfill --bitcoin.rpc <URL> --last 1000
/// hotchain backfill --bitcoin.rpc <URL> --resume 3
/// ```
#[derive(Parser, Debug, Clone)]
#[command(about = "Runs a backfill job in the foreground")]
pub struct BackfillCommand {
    /// Bitcoin node connection.
    #[command(flatten)]
    pub source: SourceArgs,
    /// Store locations.
    #[command(flatten)]
    pub store: StoreArgs,
    /// First height.
    #[arg(long, requires = "end", conflicts_with_all = ["last", "from_genesis", "resume"])]
    pub start: Option<u64>,
    /// Last height, inclusive.
    #[arg(long, requires = "start")]
    pub end: Option<u64>,
    /// Backfills the last N blocks up to the tip.
    #[arg(long, conflicts_with_all = ["from_genesis", "resume"])]
    pub last: Option<u64>,
    /// Backfills everything from genesis to the tip.
    #[arg(long, conflicts_with = "resume")]
    pub from_genesis: bool,
    /// Heights per chunk for this job.
    #[arg(long)]
    pub batch_size: Option<u64>,
    /// Workers for this job.
    #[arg(long)]
    pub concurrency: Option<usize>,
    /// Resumes a persisted job instead of planning a new one.
    #[arg(long, value_name = "JOB_ID")]
    pub resume: Option<u64>,
}

impl BackfillCommand {
    /// The requested range.
    pub fn range(&self) -> Result<BackfillRange> {
        Ok(match (self.start, self.end, self.last, self.from_genesis) {
            (Some(start), Some(end), None, false) => BackfillRange::Explicit { start, end },
            (None, None, Some(count), false) => BackfillRange::LastN { count },
            (None, None, None, true) => BackfillRange::FromGenesis,
            _ => bail!("pass exactly one of --start/--end, --last or --from-genesis"),
        })
    }

    /// Runs the subcommand.
    pub async fn run(self, global: &GlobalArgs, shutdown: CancellationToken) -> Result<()> {
        let config = global.config.load()?;
        let orchestrator = BackfillOrchestrator::new(
            self.source.source()?,
            self.store.buffer()?,
            &config,
            shutdown,
        );

        let job = match self.resume {
            Some(job_id) => orchestrator.reopen(job_id)?,
            None => {
                let request = BackfillRequest {
                    range: self.range()?,
                    batch_size: self.batch_size,
                    concurrency: self.concurrency,
                };
                orchestrator.submit(request).await?
            }
        };
        info!(target: "cli", job_id = job.id, "Running backfill job");

        let job = orchestrator.run(job).await?;
        match job.status {
            JobStatus::Completed => {}
            JobStatus::Paused => warn!(target: "cli", job_id = job.id, "Interrupted, resumable"),
            status => warn!(target: "cli", job_id = job.id, %status, "Backfill had failures"),
        }
        print(&JobStatusReport::new(&job, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Parser, Debug)]
    struct Cli {
        #[command(flatten)]
        backfill: BackfillCommand,
    }

    fn parse(args: &[&str]) -> Result<BackfillCommand, clap::Error> {
        let base = ["hotchain", "--bitcoin.rpc", "http://127.0.0.1:8332"];
        Cli::try_parse_from(base.iter().chain(args)).map(|cli| cli.backfill)
    }

    #[rstest]
    #[case(&["--start", "0", "--end", "10"], BackfillRange::Explicit { start: 0, end: 10 })]
    #[case(&["--last", "144"], BackfillRange::LastN { count: 144 })]
    #[case(&["--from-genesis"], BackfillRange::FromGenesis)]
    fn test_range(#[case] args: &[&str], #[case] expected: BackfillRange) {
        assert_eq!(parse(args).unwrap().range().unwrap(), expected);
    }

    #[rstest]
    #[case(&["--start", "0"])]
    #[case(&["--start", "0", "--end", "10", "--last", "5"])]
    #[case(&["--last", "5", "--resume", "1"])]
    fn test_conflicting_ranges_are_rejected(#[case] args: &[&str]) {
        assert!(parse(args).is_err());
    }

    #[test]
    fn test_resume_needs_no_range() {
        let command = parse(&["--resume", "7"]).unwrap();
        assert_eq!(command.resume, Some(7));
        assert!(command.range().is_err());
    }
}
