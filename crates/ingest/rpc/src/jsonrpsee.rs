//! The [`IngestApi`] trait.

use hotchain_primitives::{
    BackfillRequest, Block, IngestionCursor, JobStatusReport, ReadOrder,
};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};

/// Control and query endpoints of a running node.
///
/// Methods are exposed as `hotchain_<name>`.
#[cfg_attr(not(feature = "client"), rpc(server, namespace = "hotchain"))]
#[cfg_attr(feature = "client", rpc(server, client, namespace = "hotchain"))]
pub trait IngestApi {
    /// Plans and starts a backfill job. Returns the job id.
    #[method(name = "startBackfill")]
    async fn start_backfill(&self, request: BackfillRequest) -> RpcResult<u64>;

    /// Reports progress of a job.
    #[method(name = "backfillStatus")]
    async fn backfill_status(&self, job_id: u64) -> RpcResult<JobStatusReport>;

    /// Requests cooperative cancellation of a running job.
    /// Returns `false` if the job was not running.
    #[method(name = "cancelBackfill")]
    async fn cancel_backfill(&self, job_id: u64) -> RpcResult<bool>;

    /// Resumes a paused or partially failed job from its committed progress.
    #[method(name = "resumeBackfill")]
    async fn resume_backfill(&self, job_id: u64) -> RpcResult<JobStatusReport>;

    /// Lists every job known to the node.
    #[method(name = "listBackfills")]
    async fn list_backfills(&self) -> RpcResult<Vec<JobStatusReport>>;

    /// Reads blocks with a timestamp in `[start, end]` across the historical store and
    /// the hot buffer.
    #[method(name = "blocksInRange")]
    async fn blocks_in_range(
        &self,
        start: u64,
        end: u64,
        order: Option<ReadOrder>,
    ) -> RpcResult<Vec<Block>>;

    /// The ingestion cursor, if live ingestion has accepted a block.
    #[method(name = "cursor")]
    async fn cursor(&self) -> RpcResult<Option<IngestionCursor>>;
}
