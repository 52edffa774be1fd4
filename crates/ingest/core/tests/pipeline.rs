//! End to end tests of the ingestion pipeline.

use async_trait::async_trait;
use hotchain_core::{
    BackfillOrchestrator, CursorLease, HotBufferWriter, IngestConfig, IngestService, QueryRouter,
    ReconcileOutcome, Reconciler, RetentionSweeper, RoutePlan, UNKNOWN_JOB_CODE, normalize,
};
use hotchain_primitives::{
    BackfillRange, BackfillRequest, Block, BlockHash, BlockId, BufferWindow, ChunkStatus,
    JobStatus, NormalizedBlock, RawBlock, ReadOrder, SECS_PER_HOUR, TimeRange, unix_now,
};
use hotchain_rpc::IngestApiClient;
use hotchain_source::{ChainSource, MemoryChainSource, SourceError};
use hotchain_storage::{
    BufferReader, BufferWriter, CursorStorage, JobStorage, MemoryStore, NoHistory, RocksStore,
};
use jsonrpsee::{core::ClientError, http_client::HttpClientBuilder};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

const NOW: u64 = 1_700_000_000;

fn config() -> IngestConfig {
    IngestConfig {
        retry_backoff_base_ms: 1,
        retry_backoff_max_ms: 1,
        retry_max_attempts: 3,
        poll_interval_secs: 1,
        include_transactions: false,
        ..Default::default()
    }
}

fn window() -> BufferWindow {
    BufferWindow::new(24, 48, 6).unwrap()
}

async fn block(chain: &MemoryChainSource, height: u64) -> NormalizedBlock {
    let hash = chain.hash_at(height).unwrap();
    normalize(chain.block_at(BlockId::Hash(hash), true).await.unwrap()).unwrap()
}

fn reconciler<S>(chain: &MemoryChainSource, store: Arc<S>) -> Reconciler<MemoryChainSource, S>
where
    S: BufferWriter + CursorStorage + 'static,
{
    let config = config();
    let (cursor, _) = CursorLease::load(store.clone()).unwrap().split();
    let writer = HotBufferWriter::new(store, config.retry(), None);
    Reconciler::new(chain.clone(), writer, cursor, config.max_reorg_depth, config.retry(), true)
}

fn assert_unique(blocks: &[Block]) {
    let hashes: HashSet<_> = blocks.iter().map(|b| b.hash).collect();
    let heights: HashSet<_> = blocks.iter().map(|b| b.height).collect();
    assert_eq!(hashes.len(), blocks.len(), "duplicate hashes");
    assert_eq!(heights.len(), blocks.len(), "duplicate heights");
}

#[tokio::test]
async fn block_extending_the_tip_advances_the_cursor() {
    let chain = MemoryChainSource::with_blocks(NOW, 600, 11);
    let store = MemoryStore::new();
    let reconciler = reconciler(&chain, Arc::new(store.clone()));
    for height in 0..10 {
        reconciler.reconcile(block(&chain, height).await).await.unwrap();
    }

    let outcome = reconciler.reconcile(block(&chain, 10).await).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Accepted);
    let cursor = store.load_cursor().unwrap().unwrap();
    assert_eq!(cursor.last_canonical_height, 10);
    assert_eq!(cursor.last_canonical_hash, chain.hash_at(10).unwrap());
}

#[tokio::test]
async fn competing_block_replaces_everything_above_the_ancestor() {
    let chain = MemoryChainSource::with_blocks(NOW, 600, 11);
    let store = MemoryStore::new();
    let reconciler = reconciler(&chain, Arc::new(store.clone()));
    for height in 0..=10 {
        reconciler.reconcile(block(&chain, height).await).await.unwrap();
    }
    let orphans: Vec<_> = (6..=10).map(|h| chain.hash_at(h).unwrap()).collect();

    chain.fork(5, 5);
    let outcome = reconciler.reconcile(block(&chain, 10).await).await.unwrap();
    let ReconcileOutcome::Reorged { ancestor, depth, invalidated, tip } = outcome else {
        panic!("expected a reorg, got {outcome:?}");
    };
    assert_eq!(ancestor.height, 5);
    assert_eq!(depth, 5);
    assert_eq!(invalidated.iter().map(|b| b.hash).collect::<Vec<_>>(), orphans);
    assert_eq!(tip.hash, chain.hash_at(10).unwrap());

    let stored = store.blocks();
    assert_unique(&stored);
    for block in &stored {
        assert_eq!(Some(block.hash), chain.hash_at(block.height));
    }
    assert!(orphans.iter().all(|hash| store.block_by_hash(hash).unwrap().is_none()));
}

#[tokio::test]
async fn retention_sweep_deletes_exactly_the_expired_rows() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    // One block per hour, from NOW - 60h up to NOW.
    let chain = MemoryChainSource::with_blocks(NOW - 60 * SECS_PER_HOUR, SECS_PER_HOUR, 61);
    let (cursor, reader) = CursorLease::load(store.clone()).unwrap().split();
    let config = config();
    let writer = HotBufferWriter::new(store.clone(), config.retry(), None);
    let reconciler = Reconciler::new(chain.clone(), writer, cursor, 100, config.retry(), false);
    for height in 0..=60 {
        reconciler.reconcile(block(&chain, height).await).await.unwrap();
    }

    let sweeper = RetentionSweeper::new(store.clone(), reader, window(), Duration::from_secs(60));
    let report = sweeper.sweep_at(NOW).await.unwrap();
    let horizon = NOW - 48 * SECS_PER_HOUR;
    assert_eq!(report.cutoff, horizon);
    assert_eq!(report.deleted, 12);

    let remaining = store.blocks_in_range(TimeRange::new(0, u64::MAX)).unwrap();
    assert_eq!(remaining.len(), 49);
    assert!(remaining.iter().all(|b| b.timestamp >= horizon));
    assert_eq!(sweeper.sweep_at(NOW).await.unwrap().deleted, 0);
}

#[tokio::test]
async fn backfill_of_ten_thousand_heights_completes_without_duplicates() {
    let chain = MemoryChainSource::with_blocks(NOW, 600, 10_001);
    let store = Arc::new(MemoryStore::new());
    let orchestrator =
        BackfillOrchestrator::new(chain, store.clone(), &config(), CancellationToken::new());

    let request = BackfillRequest {
        range: BackfillRange::Explicit { start: 0, end: 10_000 },
        batch_size: Some(500),
        concurrency: Some(2),
    };
    let job = orchestrator.submit(request).await.unwrap();
    assert_eq!(job.chunks.len(), 20);

    let job = orchestrator.run(job).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let stored = store.blocks();
    assert_eq!(stored.len(), 10_001);
    assert_unique(&stored);

    let report = orchestrator.status(job.id).unwrap();
    assert_eq!(report.heights_done, 10_001);
    assert_eq!(report.progress_percent, 100.0);
}

#[test]
fn straddling_query_serves_each_hash_once() {
    let historical = MemoryStore::new();
    let buffer = MemoryStore::new();
    let hourly = MemoryChainSource::with_blocks(NOW - 30 * SECS_PER_HOUR, SECS_PER_HOUR, 11);

    let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let blocks: Vec<_> = (0..=10).map(|h| runtime.block_on(block(&hourly, h))).collect();
    // The historical store trails the boundary by a few hours, the buffer overlaps it.
    for block in &blocks {
        if block.block.timestamp <= NOW - 18 * SECS_PER_HOUR {
            historical.upsert(block).unwrap();
        }
        if block.block.timestamp >= NOW - 26 * SECS_PER_HOUR {
            buffer.upsert(block).unwrap();
        }
    }

    let router = QueryRouter::new(Arc::new(historical), Arc::new(buffer), window());
    let range = TimeRange::new(NOW - 30 * SECS_PER_HOUR, NOW - 20 * SECS_PER_HOUR);
    assert_eq!(
        router.plan(range, NOW).unwrap(),
        RoutePlan::Split { boundary: NOW - 24 * SECS_PER_HOUR }
    );

    let served = router.blocks_in_range_at(range, ReadOrder::Timestamp, NOW).unwrap();
    assert_eq!(served.len(), 11);
    assert_unique(&served);
    assert!(served.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn ingesting_twice_changes_nothing() {
    let chain = MemoryChainSource::with_blocks(NOW, 600, 30);
    let store = Arc::new(MemoryStore::new());
    let reconciler = reconciler(&chain, store.clone());
    for height in 0..30 {
        reconciler.reconcile(block(&chain, height).await).await.unwrap();
    }
    let before = store.blocks();
    let cursor = store.load_cursor().unwrap();

    for height in 0..30 {
        let outcome = reconciler.reconcile(block(&chain, height).await).await.unwrap();
        assert_eq!(outcome, ReconcileOutcome::Duplicate, "height {height}");
    }
    let config = IngestConfig { include_transactions: true, ..config() };
    let orchestrator =
        BackfillOrchestrator::new(chain, store.clone(), &config, CancellationToken::new());
    let request = BackfillRequest {
        range: BackfillRange::FromGenesis,
        batch_size: Some(7),
        concurrency: Some(3),
    };
    let job = orchestrator.submit(request).await.unwrap();
    assert_eq!(orchestrator.run(job).await.unwrap().status, JobStatus::Completed);

    assert_eq!(store.blocks(), before);
    assert_eq!(store.load_cursor().unwrap(), cursor);
}

/// Cancels `token` once `height` is requested.
#[derive(Debug, Clone)]
struct Crash {
    inner: MemoryChainSource,
    height: u64,
    token: CancellationToken,
}

#[async_trait]
impl ChainSource for Crash {
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
async fn interrupted_backfill_resumes_to_the_same_result() {
    let chain = MemoryChainSource::with_blocks(NOW, 600, 200);
    let request = BackfillRequest {
        range: BackfillRange::Explicit { start: 0, end: 199 },
        batch_size: Some(30),
        concurrency: Some(3),
    };

    let reference = Arc::new(MemoryStore::new());
    let orchestrator =
        BackfillOrchestrator::new(chain.clone(), reference.clone(), &config(), Default::default());
    orchestrator.run(orchestrator.submit(request).await.unwrap()).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let job_id = {
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let token = CancellationToken::new();
        let crash = Crash { inner: chain.clone(), height: 117, token: token.clone() };
        let orchestrator = BackfillOrchestrator::new(crash, store, &config(), token);
        let job = orchestrator.run(orchestrator.submit(request).await.unwrap()).await.unwrap();
        assert_eq!(job.status, JobStatus::Paused);
        assert!(job.heights_done() < 200);
        job.id
    };

    let store = Arc::new(RocksStore::open(dir.path()).unwrap());
    let orchestrator =
        BackfillOrchestrator::new(chain, store.clone(), &config(), Default::default());
    let job = orchestrator.reopen(job_id).unwrap();
    let job = orchestrator.run(job).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.heights_done(), 200);

    let mut resumed = store.blocks_in_range(TimeRange::new(0, u64::MAX)).unwrap();
    resumed.sort_by_key(|b| b.height);
    assert_eq!(resumed, reference.blocks());
}

#[tokio::test(flavor = "multi_thread")]
async fn node_serves_the_control_surface() {
    // Recent enough to be served by the buffer.
    let chain = MemoryChainSource::with_blocks(unix_now() - 50 * 600, 600, 50);
    let store = MemoryStore::new();
    let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let service =
        IngestService::new(config(), chain, Arc::new(store.clone()), Arc::new(NoHistory))
            .unwrap()
            .with_rpc(addr)
            .with_cancellation(shutdown.clone());
    let node = tokio::spawn(service.start());

    let client = HttpClientBuilder::default().build(format!("http://{addr}")).unwrap();
    let mut cursor = None;
    for _ in 0..100 {
        if let Ok(Some(current)) = client.cursor().await {
            cursor = Some(current);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(cursor.unwrap().last_canonical_height, 49);

    let request = BackfillRequest {
        range: BackfillRange::Explicit { start: 0, end: 48 },
        batch_size: Some(10),
        concurrency: Some(2),
    };
    let job_id = client.start_backfill(request).await.unwrap();
    let mut status = client.backfill_status(job_id).await.unwrap();
    for _ in 0..100 {
        if status.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = client.backfill_status(job_id).await.unwrap();
    }
    assert_eq!(status.status, JobStatus::Completed);
    assert_eq!(client.list_backfills().await.unwrap().len(), 1);

    let blocks = client.blocks_in_range(0, u64::MAX, None).await.unwrap();
    assert_eq!(blocks.len(), 50);
    assert!(blocks.windows(2).all(|w| w[0].height < w[1].height));

    let Err(ClientError::Call(err)) = client.backfill_status(job_id + 1).await else {
        panic!("expected an rpc error");
    };
    assert_eq!(err.code(), UNKNOWN_JOB_CODE);
    let Err(ClientError::Call(err)) = client.blocks_in_range(10, 9, None).await else {
        panic!("expected an rpc error");
    };
    assert_eq!(err.code(), jsonrpsee::types::ErrorCode::InvalidParams.code());

    shutdown.cancel();
    node.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn node_shutdown_pauses_running_backfills() {
    let chain = MemoryChainSource::with_blocks(NOW, 600, 2_000);
    let store = MemoryStore::new();
    let addr = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
    let shutdown = CancellationToken::new();
    let crash = Crash { inner: chain, height: 700, token: shutdown.clone() };
    let service =
        IngestService::new(config(), crash, Arc::new(store.clone()), Arc::new(NoHistory))
            .unwrap()
            .with_rpc(addr)
            .with_cancellation(shutdown.clone());
    let node = tokio::spawn(service.start());

    let client = HttpClientBuilder::default().build(format!("http://{addr}")).unwrap();
    let request = BackfillRequest {
        range: BackfillRange::Explicit { start: 0, end: 1_500 },
        batch_size: Some(100),
        concurrency: Some(2),
    };
    for _ in 0..100 {
        if client.start_backfill(request).await.is_ok() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    node.await.unwrap().unwrap();

    let jobs = store.list_jobs().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Paused);
    assert!(jobs[0].chunks.iter().all(|c| c.status != ChunkStatus::Running));
    assert!(jobs[0].heights_done() < 1_501);
}
