//! The hot buffer writer.

use crate::{EventPublisher, RetryConfig, retry::with_retry};
use hotchain_primitives::{Block, BlockEvent, NormalizedBlock};
use hotchain_storage::{BufferWriter, StorageError, UpsertOutcome};
use std::sync::Arc;

/// Writes blocks to the hot buffer and announces the changes.
///
/// Storage failures are retried with backoff. Writes are idempotent, so a retry
/// after a partially observed failure is safe.
#[derive(Debug)]
pub struct HotBufferWriter<S> {
    store: Arc<S>,
    retry: RetryConfig,
    publisher: Option<EventPublisher>,
}

impl<S> Clone for HotBufferWriter<S> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone(), retry: self.retry, publisher: self.publisher.clone() }
    }
}

impl<S: BufferWriter> HotBufferWriter<S> {
    /// A writer that publishes to `publisher`, if any.
    pub const fn new(store: Arc<S>, retry: RetryConfig, publisher: Option<EventPublisher>) -> Self {
        Self { store, retry, publisher }
    }

    /// The underlying store.
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Stores `block`.
    ///
    /// Publishes [`BlockEvent::Invalidated`] for a block displaced at the same
    /// height, then [`BlockEvent::Accepted`] if `block` was not stored before.
    pub async fn upsert(&self, block: &NormalizedBlock) -> Result<UpsertOutcome, StorageError> {
        let outcome =
            with_retry(&self.retry, "buffer upsert", StorageError::is_retryable, || async {
                self.store.upsert(block)
            })
            .await?;

        match &outcome {
            UpsertOutcome::Unchanged => {
                trace!(target: "writer", hash = %block.block.hash, "Block already buffered");
                return Ok(outcome);
            }
            UpsertOutcome::Replaced(previous) => {
                debug!(
                    target: "writer",
                    height = previous.height,
                    old = %previous.hash,
                    new = %block.block.hash,
                    "Replaced buffered block"
                );
                self.publish(BlockEvent::invalidated(previous)).await;
            }
            UpsertOutcome::Inserted => {}
        }
        self.publish(BlockEvent::accepted(&block.block)).await;
        Ok(outcome)
    }

    /// Deletes every block above `height` and announces each removal.
    pub async fn delete_from_height(&self, height: u64) -> Result<Vec<Block>, StorageError> {
        let removed =
            with_retry(&self.retry, "buffer delete", StorageError::is_retryable, || async {
                self.store.delete_above(height)
            })
            .await?;
        for block in &removed {
            self.publish(BlockEvent::invalidated(block)).await;
        }
        Ok(removed)
    }

    async fn publish(&self, event: BlockEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event).await;
        }
    }
}
