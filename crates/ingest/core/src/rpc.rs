//! The [`IngestApiServer`] implementation.

use crate::{BackfillError, BackfillOrchestrator, CursorReader, QueryRouter, RouterError};
use async_trait::async_trait;
use hotchain_primitives::{
    BackfillRequest, Block, IngestionCursor, JobStatusReport, ReadOrder, TimeRange,
};
use hotchain_rpc::IngestApiServer;
use hotchain_source::ChainSource;
use hotchain_storage::{BufferWriter, HistoricalReader, JobStorage};
use jsonrpsee::{
    core::RpcResult,
    types::{ErrorCode, ErrorObject, ErrorObjectOwned},
};

/// Error code for an unknown backfill job.
pub const UNKNOWN_JOB_CODE: i32 = -32001;
/// Error code for a job that is already running.
pub const JOB_RUNNING_CODE: i32 = -32002;
/// Error code for a job that cannot be resumed.
pub const NOT_RESUMABLE_CODE: i32 = -32003;

/// Serves the node's control and query endpoints.
#[derive(Debug)]
pub struct IngestRpc<C, S, H> {
    orchestrator: BackfillOrchestrator<C, S>,
    router: QueryRouter<H, S>,
    cursor: CursorReader,
}

impl<C, S, H> IngestRpc<C, S, H> {
    /// Creates the handler.
    pub const fn new(
        orchestrator: BackfillOrchestrator<C, S>,
        router: QueryRouter<H, S>,
        cursor: CursorReader,
    ) -> Self {
        Self { orchestrator, router, cursor }
    }
}

impl From<BackfillError> for ErrorObjectOwned {
    fn from(err: BackfillError) -> Self {
        let code = match &err {
            BackfillError::Plan(_) => ErrorCode::InvalidParams.code(),
            BackfillError::UnknownJob(_) => UNKNOWN_JOB_CODE,
            BackfillError::AlreadyRunning(_) => JOB_RUNNING_CODE,
            BackfillError::NotResumable { .. } => NOT_RESUMABLE_CODE,
            BackfillError::Source(_) | BackfillError::Storage(_) => {
                ErrorCode::InternalError.code()
            }
        };
        ErrorObject::owned(code, err.to_string(), None::<()>)
    }
}

impl From<RouterError> for ErrorObjectOwned {
    fn from(err: RouterError) -> Self {
        let code = match err {
            RouterError::InvalidRange(_) => ErrorCode::InvalidParams.code(),
            RouterError::Historical(_) | RouterError::Buffer(_) => ErrorCode::InternalError.code(),
        };
        ErrorObject::owned(code, err.to_string(), None::<()>)
    }
}

#[async_trait]
impl<C, S, H> IngestApiServer for IngestRpc<C, S, H>
where
    C: ChainSource + 'static,
    S: BufferWriter + JobStorage + 'static,
    H: HistoricalReader + 'static,
{
    async fn start_backfill(&self, request: BackfillRequest) -> RpcResult<u64> {
        Ok(self.orchestrator.start(request).await?)
    }

    async fn backfill_status(&self, job_id: u64) -> RpcResult<JobStatusReport> {
        Ok(self.orchestrator.status(job_id)?)
    }

    async fn cancel_backfill(&self, job_id: u64) -> RpcResult<bool> {
        Ok(self.orchestrator.cancel(job_id)?)
    }

    async fn resume_backfill(&self, job_id: u64) -> RpcResult<JobStatusReport> {
        Ok(self.orchestrator.resume(job_id)?)
    }

    async fn list_backfills(&self) -> RpcResult<Vec<JobStatusReport>> {
        Ok(self.orchestrator.list()?)
    }

    async fn blocks_in_range(
        &self,
        start: u64,
        end: u64,
        order: Option<ReadOrder>,
    ) -> RpcResult<Vec<Block>> {
        let range = TimeRange::new(start, end);
        Ok(self.router.blocks_in_range(range, order.unwrap_or_default())?)
    }

    async fn cursor(&self) -> RpcResult<Option<IngestionCursor>> {
        Ok(self.cursor.current().await)
    }
}
