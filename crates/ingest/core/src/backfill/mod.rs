//! The backfill orchestrator.
//!
//! A job is planned into chunks and persisted before any height is fetched.
//! Workers claim chunks from a shared queue and persist the chunk after every
//! committed height, so a job interrupted at any point resumes from storage.

use crate::{HotBufferWriter, IngestConfig, RetryConfig, retry::fetch_tip};
use hotchain_primitives::{
    BackfillJob, BackfillRequest, ChunkStatus, JobStatus, JobStatusReport, PlanError, unix_now,
};
use hotchain_source::{ChainSource, SourceError};
use hotchain_storage::{BufferWriter, JobStorage, StorageError};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

mod worker;

/// Errors returned by the [`BackfillOrchestrator`].
#[derive(Debug, Error)]
pub enum BackfillError {
    /// The request does not describe a valid job.
    #[error(transparent)]
    Plan(#[from] PlanError),
    /// No job with this id exists.
    #[error("unknown backfill job {0}")]
    UnknownJob(u64),
    /// The job is already running.
    #[error("backfill job {0} is already running")]
    AlreadyRunning(u64),
    /// The job has nothing left to do.
    #[error("backfill job {job_id} is {status} and cannot be resumed")]
    NotResumable {
        /// The job.
        job_id: u64,
        /// Its status.
        status: JobStatus,
    },
    /// The chain tip could not be fetched.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// The job record could not be read or written.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug)]
struct RunningJob {
    cancel: CancellationToken,
    started: Instant,
    committed: Arc<AtomicU64>,
}

impl RunningJob {
    fn rate_per_sec(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed > 0.0 { self.committed.load(Ordering::Relaxed) as f64 / elapsed } else { 0.0 }
    }
}

#[derive(Debug)]
struct Inner<C, S> {
    source: C,
    store: Arc<S>,
    writer: HotBufferWriter<S>,
    retry: RetryConfig,
    include_transactions: bool,
    batch_size: u64,
    concurrency: usize,
    cancellation: CancellationToken,
    running: Mutex<HashMap<u64, RunningJob>>,
    tasks: TaskTracker,
}

impl<C, S> Inner<C, S> {
    fn running(&self) -> MutexGuard<'_, HashMap<u64, RunningJob>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a job from the registry when its run ends, however it ends.
#[derive(Debug)]
struct Registration<C, S> {
    inner: Arc<Inner<C, S>>,
    job_id: u64,
    cancel: CancellationToken,
    committed: Arc<AtomicU64>,
}

impl<C, S> Drop for Registration<C, S> {
    fn drop(&mut self) {
        self.inner.running().remove(&self.job_id);
    }
}

/// Plans, runs, pauses and resumes backfill jobs.
///
/// Backfill writes go straight to the hot buffer through an idempotent upsert.
/// They take no part in reorg handling and publish no events.
#[derive(Debug)]
pub struct BackfillOrchestrator<C, S> {
    inner: Arc<Inner<C, S>>,
}

impl<C, S> Clone for BackfillOrchestrator<C, S> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<C, S> BackfillOrchestrator<C, S>
where
    C: ChainSource + 'static,
    S: BufferWriter + JobStorage + 'static,
{
    /// Creates an orchestrator. Cancelling `cancellation` pauses every running job.
    pub fn new(
        source: C,
        store: Arc<S>,
        config: &IngestConfig,
        cancellation: CancellationToken,
    ) -> Self {
        let retry = config.retry();
        let inner = Inner {
            source,
            writer: HotBufferWriter::new(store.clone(), retry, None),
            store,
            retry,
            include_transactions: config.include_transactions,
            batch_size: config.backfill_batch_size,
            concurrency: config.backfill_concurrency,
            cancellation,
            running: Mutex::new(HashMap::new()),
            tasks: TaskTracker::new(),
        };
        Self { inner: Arc::new(inner) }
    }

    /// Resolves `request` against the chain tip, plans the job and persists it as pending.
    pub async fn submit(&self, request: BackfillRequest) -> Result<BackfillJob, BackfillError> {
        let tip = fetch_tip(&self.inner.source, &self.inner.retry).await?;
        let (start, end) = request.range.resolve(tip)?;
        let job = BackfillJob::plan(
            self.inner.store.next_job_id()?,
            start,
            end,
            request.batch_size.unwrap_or(self.inner.batch_size),
            request.concurrency.unwrap_or(self.inner.concurrency),
            unix_now(),
        )?;
        self.inner.store.save_job(&job)?;
        info!(
            target: "backfill",
            job_id = job.id,
            start,
            end,
            chunks = job.chunks.len(),
            concurrency = job.concurrency,
            "Planned backfill job"
        );
        Ok(job)
    }

    /// Submits `request` and runs it in the background. Returns the job id.
    pub async fn start(&self, request: BackfillRequest) -> Result<u64, BackfillError> {
        let job = self.submit(request).await?;
        let job_id = job.id;
        self.spawn(job)?;
        Ok(job_id)
    }

    /// Prepares a paused or partially failed job for another run.
    ///
    /// Failed chunks are reset to pending; their committed progress is kept.
    pub fn reopen(&self, job_id: u64) -> Result<BackfillJob, BackfillError> {
        if self.inner.running().contains_key(&job_id) {
            return Err(BackfillError::AlreadyRunning(job_id));
        }
        let mut job =
            self.inner.store.load_job(job_id)?.ok_or(BackfillError::UnknownJob(job_id))?;
        if job.status == JobStatus::Completed {
            return Err(BackfillError::NotResumable { job_id, status: job.status });
        }

        for chunk in job.chunks.iter_mut().filter(|c| c.status != ChunkStatus::Completed) {
            chunk.status = ChunkStatus::Pending;
            chunk.error = None;
        }
        job.status = JobStatus::Pending;
        job.error = None;
        job.updated_at = unix_now();
        self.inner.store.save_job(&job)?;
        info!(
            target: "backfill",
            job_id,
            remaining_chunks = job.unfinished_chunks().len(),
            resume_from = ?job.last_committed_height(),
            "Reopened backfill job"
        );
        Ok(job)
    }

    /// Reopens a job and runs it in the background.
    pub fn resume(&self, job_id: u64) -> Result<JobStatusReport, BackfillError> {
        let job = self.reopen(job_id)?;
        let report = JobStatusReport::new(&job, 0.0);
        self.spawn(job)?;
        Ok(report)
    }

    /// Runs `job` in the background.
    pub fn spawn(
        &self,
        job: BackfillJob,
    ) -> Result<JoinHandle<Result<BackfillJob, BackfillError>>, BackfillError> {
        let registration = self.register(job.id)?;
        let this = self.clone();
        Ok(self.inner.tasks.spawn(async move { this.execute(job, registration).await }))
    }

    /// Pauses every running job and waits for background jobs to persist their state.
    pub async fn shutdown(&self) {
        self.inner.cancellation.cancel();
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        debug!(target: "backfill", "Background jobs stopped");
    }

    /// Marks jobs left `running` by a previous process as paused.
    ///
    /// Their running chunks go back to pending; committed progress is kept.
    /// Returns the ids of the recovered jobs.
    pub fn recover_interrupted(&self) -> Result<Vec<u64>, BackfillError> {
        let mut recovered = Vec::new();
        for mut job in self.inner.store.list_jobs()? {
            if job.status != JobStatus::Running || self.inner.running().contains_key(&job.id) {
                continue;
            }
            for chunk in job.chunks.iter_mut().filter(|c| c.status == ChunkStatus::Running) {
                chunk.status = ChunkStatus::Pending;
            }
            job.status = JobStatus::Paused;
            job.updated_at = unix_now();
            self.inner.store.save_job(&job)?;
            warn!(
                target: "backfill",
                job_id = job.id,
                resume_from = ?job.last_committed_height(),
                "Job was interrupted, marked paused"
            );
            recovered.push(job.id);
        }
        Ok(recovered)
    }

    /// Runs `job` to the end and returns its final state.
    pub async fn run(&self, job: BackfillJob) -> Result<BackfillJob, BackfillError> {
        let registration = self.register(job.id)?;
        self.execute(job, registration).await
    }

    /// Requests cooperative cancellation. Returns `false` if the job is not running.
    pub fn cancel(&self, job_id: u64) -> Result<bool, BackfillError> {
        if let Some(running) = self.inner.running().get(&job_id) {
            running.cancel.cancel();
            info!(target: "backfill", job_id, "Cancellation requested");
            return Ok(true);
        }
        match self.inner.store.load_job(job_id)? {
            Some(_) => Ok(false),
            None => Err(BackfillError::UnknownJob(job_id)),
        }
    }

    /// Progress of a job. Rate and ETA are those of the current run.
    pub fn status(&self, job_id: u64) -> Result<JobStatusReport, BackfillError> {
        let job = self.inner.store.load_job(job_id)?.ok_or(BackfillError::UnknownJob(job_id))?;
        Ok(self.report(&job))
    }

    /// Progress of every known job, oldest first.
    pub fn list(&self) -> Result<Vec<JobStatusReport>, BackfillError> {
        Ok(self.inner.store.list_jobs()?.iter().map(|job| self.report(job)).collect())
    }

    fn report(&self, job: &BackfillJob) -> JobStatusReport {
        let rate =
            self.inner.running().get(&job.id).map(RunningJob::rate_per_sec).unwrap_or_default();
        JobStatusReport::new(job, rate)
    }

    fn register(&self, job_id: u64) -> Result<Registration<C, S>, BackfillError> {
        let mut running = self.inner.running();
        if running.contains_key(&job_id) {
            return Err(BackfillError::AlreadyRunning(job_id));
        }
        let cancel = self.inner.cancellation.child_token();
        let committed = Arc::new(AtomicU64::new(0));
        let job = RunningJob {
            cancel: cancel.clone(),
            started: Instant::now(),
            committed: committed.clone(),
        };
        running.insert(job_id, job);
        Ok(Registration { inner: self.inner.clone(), job_id, cancel, committed })
    }

    async fn execute(
        &self,
        mut job: BackfillJob,
        registration: Registration<C, S>,
    ) -> Result<BackfillJob, BackfillError> {
        job.status = JobStatus::Running;
        job.updated_at = unix_now();
        self.inner.store.save_job(&job)?;
        info!(
            target: "backfill",
            job_id = job.id,
            remaining_chunks = job.unfinished_chunks().len(),
            "Backfill job running"
        );

        let finished = self.inner.run_workers(&job, &registration).await;
        for chunk in finished {
            let index = chunk.index as usize;
            if let Some(slot) = job.chunks.get_mut(index) {
                *slot = chunk;
            }
        }

        let cancelled = registration.cancel.is_cancelled();
        job.status = job.settle(cancelled);
        job.error = match job.status {
            JobStatus::CompletedWithErrors | JobStatus::Failed => {
                Some(format!("{} chunk(s) failed", job.failed_ranges().len()))
            }
            _ => None,
        };
        job.updated_at = unix_now();
        self.inner.store.save_job(&job)?;

        info!(
            target: "backfill",
            job_id = job.id,
            status = %job.status,
            heights_done = job.heights_done(),
            heights_total = job.heights_total(),
            failed_chunks = job.failed_ranges().len(),
            "Backfill job finished"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::test_utils::FAST_RETRY;
    use async_trait::async_trait;
    use hotchain_primitives::{BackfillRange, BlockHash, BlockId, RawBlock};
    use hotchain_source::MemoryChainSource;
    use hotchain_storage::{BufferReader, MemoryStore};

    fn config(batch_size: u64, concurrency: usize) -> IngestConfig {
        IngestConfig {
            backfill_batch_size: batch_size,
            backfill_concurrency: concurrency,
            retry_backoff_base_ms: FAST_RETRY.base.as_millis() as u64,
            retry_backoff_max_ms: FAST_RETRY.max.as_millis() as u64,
            retry_max_attempts: FAST_RETRY.max_attempts,
            include_transactions: false,
            ..Default::default()
        }
    }

    fn orchestrator(
        chain: MemoryChainSource,
        store: &Arc<MemoryStore>,
        config: IngestConfig,
    ) -> BackfillOrchestrator<MemoryChainSource, MemoryStore> {
        BackfillOrchestrator::new(chain, store.clone(), &config, CancellationToken::new())
    }

    fn explicit(start: u64, end: u64) -> BackfillRequest {
        BackfillRequest {
            range: BackfillRange::Explicit { start, end },
            batch_size: None,
            concurrency: None,
        }
    }

    /// Cancels `token` when `height` is requested.
    #[derive(Debug, Clone)]
    struct Tripwire {
        inner: MemoryChainSource,
        height: u64,
        token: CancellationToken,
    }

    #[async_trait]
    impl ChainSource for Tripwire {
        async fn tip_height(&self) -> Result<u64, SourceError> {
            self.inner.tip_height().await
        }

        async fn block_hash(&self, height: u64) -> Result<BlockHash, SourceError> {
            if height == self.height {
                self.token.cancel();
            }
            self.inner.block_hash(height).await
        }

        async fn block_at(&self, id: BlockId, txs: bool) -> Result<RawBlock, SourceError> {
            self.inner.block_at(id, txs).await
        }
    }

    #[tokio::test]
    async fn test_submit_resolves_against_tip() {
        let chain = MemoryChainSource::with_blocks(0, 600, 100);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain, &store, config(25, 2));

        let request = BackfillRequest {
            range: BackfillRange::LastN { count: 60 },
            batch_size: Some(20),
            concurrency: None,
        };
        let job = orchestrator.submit(request).await.unwrap();
        assert_eq!((job.start_height, job.end_height), (40, 99));
        assert_eq!(job.chunks.len(), 3);
        assert_eq!(job.concurrency, 2);
        assert_eq!(store.load_job(job.id).unwrap().unwrap().status, JobStatus::Pending);

        let err = orchestrator.submit(explicit(90, 120)).await.unwrap_err();
        assert!(matches!(err, BackfillError::Plan(PlanError::BeyondTip { end: 120, tip: 99 })));
    }

    #[tokio::test]
    async fn test_run_completes_every_chunk() {
        let chain = MemoryChainSource::with_blocks(0, 600, 50);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain, &store, config(10, 3));

        let job = orchestrator.submit(explicit(0, 49)).await.unwrap();
        let job = orchestrator.run(job).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.heights_done(), 50);
        assert_eq!(job.last_committed_height(), Some(49));
        assert_eq!(store.block_count().unwrap(), 50);
        assert_eq!(store.load_job(job.id).unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_only_their_chunk() {
        let chain = MemoryChainSource::with_blocks(0, 600, 30);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain.clone(), &store, config(10, 1));

        let job = orchestrator.submit(explicit(0, 29)).await.unwrap();
        chain.fail_next(FAST_RETRY.max_attempts);
        let job = orchestrator.run(job).await.unwrap();

        assert_eq!(job.status, JobStatus::CompletedWithErrors);
        let failed = job.failed_ranges();
        assert_eq!(failed.len(), 1);
        assert_eq!((failed[0].start_height, failed[0].end_height), (0, 9));
        assert!(failed[0].error.contains("unavailable"));
        assert_eq!(store.block_count().unwrap(), 20);

        let resumed = orchestrator.reopen(job.id).unwrap();
        let resumed = orchestrator.run(resumed).await.unwrap();
        assert_eq!(resumed.status, JobStatus::Completed);
        assert_eq!(store.block_count().unwrap(), 30);
    }

    #[tokio::test]
    async fn test_malformed_heights_are_skipped_and_counted() {
        let chain = MemoryChainSource::with_blocks(0, 600, 20);
        chain.corrupt(5);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain, &store, config(10, 2));

        let job = orchestrator.submit(explicit(0, 19)).await.unwrap();
        let job = orchestrator.run(job).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.chunks[0].skipped, 1);
        assert_eq!(store.block_count().unwrap(), 19);
        assert!(store.block_at_height(5).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_job_pauses_and_resumes() {
        let chain = MemoryChainSource::with_blocks(0, 600, 40);
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let tripwire = Tripwire { inner: chain.clone(), height: 25, token: shutdown.clone() };
        let orchestrator =
            BackfillOrchestrator::new(tripwire, store.clone(), &config(10, 1), shutdown);

        let job = orchestrator.submit(explicit(0, 39)).await.unwrap();
        let job = orchestrator.run(job).await.unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(job.last_committed_height(), Some(25));
        assert_eq!(store.block_count().unwrap(), 26);

        let restarted = self::orchestrator(chain, &store, config(10, 1));
        let job = restarted.reopen(job.id).unwrap();
        assert_eq!(job.chunks[2].next_height(), Some(26));
        let job = restarted.run(job).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(store.block_count().unwrap(), 40);
    }

    #[tokio::test]
    async fn test_control_errors() {
        let chain = MemoryChainSource::with_blocks(0, 600, 10);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain, &store, config(5, 1));

        assert!(matches!(orchestrator.status(42), Err(BackfillError::UnknownJob(42))));
        assert!(matches!(orchestrator.cancel(42), Err(BackfillError::UnknownJob(42))));

        let job = orchestrator.submit(explicit(0, 9)).await.unwrap();
        let job_id = job.id;
        assert!(!orchestrator.cancel(job_id).unwrap());
        orchestrator.run(job).await.unwrap();
        assert!(matches!(
            orchestrator.reopen(job_id),
            Err(BackfillError::NotResumable { status: JobStatus::Completed, .. })
        ));
        assert_eq!(orchestrator.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_spawned_job_can_be_cancelled() {
        let chain = MemoryChainSource::with_blocks(0, 600, 10);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain, &store, config(5, 1));

        let job = orchestrator.submit(explicit(0, 9)).await.unwrap();
        let job_id = job.id;
        let handle = orchestrator.spawn(job.clone()).unwrap();
        assert!(matches!(orchestrator.spawn(job), Err(BackfillError::AlreadyRunning(_))));
        assert!(orchestrator.cancel(job_id).unwrap());

        let job = handle.await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert_eq!(orchestrator.status(job_id).unwrap().status, JobStatus::Paused);
        assert!(!orchestrator.cancel(job_id).unwrap());
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_spawned_jobs_to_pause() {
        let chain = MemoryChainSource::with_blocks(0, 600, 100);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain, &store, config(10, 2));

        let job = orchestrator.submit(explicit(0, 99)).await.unwrap();
        let job_id = job.id;
        let handle = orchestrator.spawn(job).unwrap();
        orchestrator.shutdown().await;

        let stored = store.load_job(job_id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Paused);
        assert!(stored.chunks.iter().all(|c| c.status == ChunkStatus::Pending));
        assert_eq!(handle.await.unwrap().unwrap().status, JobStatus::Paused);
    }

    #[tokio::test]
    async fn test_interrupted_jobs_are_recovered_as_paused() {
        let chain = MemoryChainSource::with_blocks(0, 600, 30);
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(chain, &store, config(10, 1));

        let mut job = orchestrator.submit(explicit(0, 29)).await.unwrap();
        job.status = JobStatus::Running;
        job.chunks[0].status = ChunkStatus::Completed;
        job.chunks[0].last_committed_height = Some(9);
        job.chunks[1].status = ChunkStatus::Running;
        job.chunks[1].last_committed_height = Some(14);
        store.save_job(&job).unwrap();
        let finished = orchestrator.submit(explicit(0, 9)).await.unwrap();

        assert_eq!(orchestrator.recover_interrupted().unwrap(), vec![job.id]);
        let report = orchestrator.status(job.id).unwrap();
        assert_eq!(report.status, JobStatus::Paused);
        let stored = store.load_job(job.id).unwrap().unwrap();
        assert_eq!(stored.chunks[1].status, ChunkStatus::Pending);
        assert_eq!(stored.chunks[1].next_height(), Some(15));
        assert_eq!(stored.chunks[0].status, ChunkStatus::Completed);
        assert_eq!(orchestrator.status(finished.id).unwrap().status, JobStatus::Pending);
        assert!(orchestrator.recover_interrupted().unwrap().is_empty());

        let job = orchestrator.run(orchestrator.reopen(job.id).unwrap()).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(store.block_count().unwrap(), 15);
    }
}
