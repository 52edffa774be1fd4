//! The live ingestion loop.

use crate::{
    ReconcileError, ReconcileOutcome, Reconciler, RetryConfig, normalize,
    retry::{fetch_block_at_height, fetch_hash, fetch_tip},
};
use hotchain_source::ChainSource;
use hotchain_storage::BufferWriter;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Polls the node for new blocks and feeds them to the [`Reconciler`] in height order.
///
/// There is exactly one live loop per buffer store.
#[derive(Debug)]
pub struct LiveIngestion<C, S> {
    source: C,
    reconciler: Reconciler<C, S>,
    retry: RetryConfig,
    include_transactions: bool,
    poll_interval: Duration,
    cancellation: CancellationToken,
}

impl<C, S> LiveIngestion<C, S>
where
    C: ChainSource,
    S: BufferWriter,
{
    /// Creates the loop. `source` should be the reconciler's source.
    pub const fn new(
        source: C,
        reconciler: Reconciler<C, S>,
        retry: RetryConfig,
        include_transactions: bool,
        poll_interval: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        Self { source, reconciler, retry, include_transactions, poll_interval, cancellation }
    }

    /// The reconciler fed by this loop.
    pub const fn reconciler(&self) -> &Reconciler<C, S> {
        &self.reconciler
    }

    /// Runs until cancelled.
    ///
    /// A reorg deeper than the configured bound stops the loop, cancels the shared
    /// token and is returned. Every other error is logged and retried at the next poll.
    pub async fn run(self) -> Result<(), ReconcileError> {
        info!(target: "ingest", interval = ?self.poll_interval, "Starting live ingestion");
        loop {
            match self.step().await {
                Ok(0) => {}
                Ok(processed) => debug!(target: "ingest", processed, "Ingested new blocks"),
                Err(err) if err.is_fatal() => {
                    error!(
                        target: "ingest",
                        %err,
                        "Unrecoverable reorg, live ingestion stopped. Resync the buffer."
                    );
                    self.cancellation.cancel();
                    return Err(err);
                }
                Err(err) => warn!(target: "ingest", %err, "Ingestion step failed"),
            }

            tokio::select! {
                _ = self.cancellation.cancelled() => {
                    info!(target: "ingest", "Live ingestion cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// Ingests every height between the cursor and the node's tip.
    ///
    /// Without a cursor, ingestion starts at the tip. When the node replaced the
    /// cursor block, its height is reconciled again. Returns the number of blocks
    /// reconciled.
    pub async fn step(&self) -> Result<usize, ReconcileError> {
        let tip = fetch_tip(&self.source, &self.retry).await?;
        let from = match self.reconciler.cursor().await {
            Some(cursor) if cursor.last_canonical_height <= tip => {
                let height = cursor.last_canonical_height;
                let canonical = fetch_hash(&self.source, height, &self.retry).await?;
                if canonical == cursor.last_canonical_hash {
                    height + 1
                } else {
                    warn!(
                        target: "ingest",
                        height,
                        stale = %cursor.last_canonical_hash,
                        %canonical,
                        "Cursor block was replaced"
                    );
                    height
                }
            }
            Some(cursor) => cursor.last_canonical_height + 1,
            None => tip,
        };

        let mut processed = 0;
        for height in from..=tip {
            if self.cancellation.is_cancelled() {
                break;
            }
            let raw =
                fetch_block_at_height(&self.source, height, self.include_transactions, &self.retry)
                    .await?;
            let block = match normalize(raw) {
                Ok(block) => block,
                Err(err) => {
                    warn!(target: "ingest", height, %err, "Malformed block, retrying next poll");
                    break;
                }
            };
            if let ReconcileOutcome::Reorged { depth, .. } =
                self.reconciler.reconcile(block).await?
            {
                debug!(target: "ingest", height, depth, "Continuing after reorg");
            }
            processed += 1;
        }
        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CursorLease, HotBufferWriter, retry::test_utils::FAST_RETRY};
    use hotchain_source::MemoryChainSource;
    use hotchain_storage::{BufferReader, MemoryStore};
    use std::sync::Arc;

    fn live(
        chain: &MemoryChainSource,
        store: &MemoryStore,
        max_reorg_depth: u64,
    ) -> LiveIngestion<MemoryChainSource, MemoryStore> {
        let (cursor, _) = CursorLease::load(Arc::new(store.clone())).unwrap().split();
        let writer = HotBufferWriter::new(Arc::new(store.clone()), FAST_RETRY, None);
        let reconciler =
            Reconciler::new(chain.clone(), writer, cursor, max_reorg_depth, FAST_RETRY, false);
        LiveIngestion::new(
            chain.clone(),
            reconciler,
            FAST_RETRY,
            false,
            Duration::from_secs(10),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn test_starts_at_tip_then_follows() {
        let chain = MemoryChainSource::with_blocks(0, 600, 10);
        let store = MemoryStore::new();
        let live = live(&chain, &store, 10);

        assert_eq!(live.step().await.unwrap(), 1);
        assert_eq!(store.block_count().unwrap(), 1);

        chain.mine(3);
        assert_eq!(live.step().await.unwrap(), 3);
        assert_eq!(live.step().await.unwrap(), 0);
        assert_eq!(live.reconciler().cursor().await.unwrap().last_canonical_height, 12);
    }

    #[tokio::test]
    async fn test_reorg_right_after_bootstrap_is_repaired() {
        let chain = MemoryChainSource::with_blocks(0, 600, 10);
        let store = MemoryStore::new();
        let live = live(&chain, &store, 100);
        live.step().await.unwrap();
        let orphan = chain.hash_at(9).unwrap();

        let new = chain.fork(8, 2);
        assert_eq!(live.step().await.unwrap(), 2);
        assert!(store.block_by_hash(&orphan).unwrap().is_none());
        assert_eq!(store.block_at_height(9).unwrap().unwrap().hash, new[0]);
        let cursor = live.reconciler().cursor().await.unwrap();
        assert_eq!((cursor.last_canonical_height, cursor.last_canonical_hash), (10, new[1]));
    }

    #[tokio::test]
    async fn test_replaced_tip_is_invalidated_without_a_new_height() {
        let chain = MemoryChainSource::with_blocks(0, 600, 4);
        let store = MemoryStore::new();
        let live = live(&chain, &store, 10);
        live.step().await.unwrap();
        chain.mine(2);
        live.step().await.unwrap();
        let orphan = chain.hash_at(5).unwrap();

        let new = chain.fork(4, 1);
        assert_eq!(live.step().await.unwrap(), 1);
        assert!(store.block_by_hash(&orphan).unwrap().is_none());
        assert_eq!(store.block_at_height(5).unwrap().unwrap().hash, new[0]);
        assert_eq!(live.reconciler().cursor().await.unwrap().last_canonical_hash, new[0]);

        assert_eq!(live.step().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_malformed_block_is_retried_next_poll() {
        let chain = MemoryChainSource::with_blocks(0, 600, 1);
        let store = MemoryStore::new();
        let live = live(&chain, &store, 10);
        live.step().await.unwrap();

        chain.mine(3);
        chain.corrupt(2);
        assert_eq!(live.step().await.unwrap(), 1);
        assert_eq!(live.reconciler().cursor().await.unwrap().last_canonical_height, 1);

        chain.repair(2);
        assert_eq!(live.step().await.unwrap(), 2);
        assert_eq!(store.block_count().unwrap(), 4);
    }

    #[tokio::test]
    async fn test_outage_fails_step_without_progress() {
        let chain = MemoryChainSource::with_blocks(0, 600, 1);
        let store = MemoryStore::new();
        let live = live(&chain, &store, 10);
        chain.fail_next(3);
        assert!(matches!(live.step().await, Err(ReconcileError::Source(_))));
        assert_eq!(store.block_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deep_reorg_stops_and_cancels() {
        let chain = MemoryChainSource::with_blocks(0, 600, 1);
        let store = MemoryStore::new();
        let live = live(&chain, &store, 1);
        live.step().await.unwrap();
        chain.mine(4);
        live.step().await.unwrap();
        chain.fork(0, 6);

        let cancellation = live.cancellation.clone();
        let err = live.run().await.unwrap_err();
        assert!(err.is_fatal());
        assert!(cancellation.is_cancelled());
        assert_eq!(store.block_count().unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_returns_when_cancelled() {
        let chain = MemoryChainSource::with_blocks(0, 600, 3);
        let store = MemoryStore::new();
        let live = live(&chain, &store, 10);
        let cancellation = live.cancellation.clone();

        let handle = tokio::spawn(live.run());
        tokio::time::sleep(Duration::from_secs(25)).await;
        cancellation.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(store.block_count().unwrap(), 1);
    }
}
