//! The retention sweeper.

use crate::{CursorReader, Metrics};
use hotchain_primitives::{BufferWindow, unix_now};
use hotchain_storage::{BufferWriter, StorageError};
use std::{sync::Arc, time::Duration};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Result of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Blocks older than this timestamp were eligible.
    pub cutoff: u64,
    /// Highest height eligible for eviction, `None` without a cursor.
    pub max_height: Option<u64>,
    /// Blocks deleted.
    pub deleted: usize,
}

/// Evicts buffered blocks older than the retention horizon.
///
/// Blocks above the ingestion cursor are never evicted. The sweeper holds the
/// cursor read lease while deleting.
#[derive(Debug)]
pub struct RetentionSweeper<S> {
    store: Arc<S>,
    cursor: CursorReader,
    window: BufferWindow,
    interval: Duration,
}

impl<S: BufferWriter> RetentionSweeper<S> {
    /// Creates a sweeper that runs every `interval`.
    pub const fn new(
        store: Arc<S>,
        cursor: CursorReader,
        window: BufferWindow,
        interval: Duration,
    ) -> Self {
        Self { store, cursor, window, interval }
    }

    /// Sweeps with `now` as the current time.
    pub async fn sweep_at(&self, now: u64) -> Result<SweepReport, StorageError> {
        let cutoff = self.window.eviction_horizon(now);
        let lease = self.cursor.lock().await;
        let max_height = lease.cursor().map(|cursor| cursor.last_canonical_height);
        let deleted = self.store.delete_older_than(cutoff, max_height)?;
        drop(lease);

        metrics::counter!(Metrics::ROWS_SWEPT).increment(deleted as u64);
        Ok(SweepReport { cutoff, max_height, deleted })
    }

    /// Sweeps now.
    pub async fn sweep(&self) -> Result<SweepReport, StorageError> {
        self.sweep_at(unix_now()).await
    }

    /// Sweeps on every tick until cancelled. Failures are logged and retried next tick.
    pub async fn run(self, cancellation: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(target: "retention", interval = ?self.interval, "Starting retention sweeper");

        loop {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    info!(target: "retention", "Retention sweeper cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            match self.sweep().await {
                Ok(report) => info!(
                    target: "retention",
                    cutoff = report.cutoff,
                    max_height = ?report.max_height,
                    deleted = report.deleted,
                    "Swept hot buffer"
                ),
                Err(err) => {
                    metrics::counter!(Metrics::SWEEP_FAILURES).increment(1);
                    warn!(target: "retention", %err, "Retention sweep failed, retrying next cycle");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CursorLease;
    use alloy_primitives::B256;
    use hotchain_primitives::{Block, IngestionCursor, NormalizedBlock, SECS_PER_HOUR};
    use hotchain_storage::{BufferReader, MemoryStore};

    const NOW: u64 = 1_700_000_000;

    fn block(height: u64, age_hours: u64) -> NormalizedBlock {
        NormalizedBlock::header_only(Block {
            hash: B256::with_last_byte(height as u8),
            height,
            parent_hash: B256::ZERO,
            timestamp: NOW - age_hours * SECS_PER_HOUR,
            size: 1,
            weight: 4,
            transaction_count: 1,
        })
    }

    fn sweeper(store: &MemoryStore) -> (RetentionSweeper<MemoryStore>, crate::CursorWriter) {
        let (writer, reader) = CursorLease::load(Arc::new(store.clone())).unwrap().split();
        let window = BufferWindow::new(24, 48, 6).unwrap();
        let sweeper =
            RetentionSweeper::new(Arc::new(store.clone()), reader, window, Duration::from_secs(60));
        (sweeper, writer)
    }

    #[tokio::test]
    async fn test_evicts_only_behind_horizon_and_cursor() {
        let store = MemoryStore::new();
        for (height, age) in [(1, 72), (2, 50), (3, 49), (4, 47), (5, 1)] {
            store.upsert(&block(height, age)).unwrap();
        }
        let (sweeper, writer) = sweeper(&store);
        writer
            .lock()
            .await
            .advance(IngestionCursor::at(&block(2, 50).block, NOW))
            .unwrap();

        let report = sweeper.sweep_at(NOW).await.unwrap();
        assert_eq!(report, SweepReport {
            cutoff: NOW - 48 * SECS_PER_HOUR,
            max_height: Some(2),
            deleted: 2,
        });
        let left: Vec<_> = store.blocks().iter().map(|b| b.height).collect();
        assert_eq!(left, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let store = MemoryStore::new();
        store.upsert(&block(1, 100)).unwrap();
        let (sweeper, _writer) = sweeper(&store);
        assert_eq!(sweeper.sweep_at(NOW).await.unwrap().deleted, 1);
        assert_eq!(sweeper.sweep_at(NOW).await.unwrap().deleted, 0);
        assert_eq!(store.block_count().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sweep_is_retried_next_tick() {
        let store = MemoryStore::new();
        store.upsert(&block(1, 100)).unwrap();
        let (sweeper, _writer) = sweeper(&store);
        store.fail_next_writes(1);

        let cancellation = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(cancellation.clone()));
        tokio::time::sleep(Duration::from_secs(90)).await;
        cancellation.cancel();
        handle.await.unwrap();

        assert_eq!(store.block_count().unwrap(), 0);
        assert_eq!(store.writes(), 3);
    }
}
