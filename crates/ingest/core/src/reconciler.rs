//! The reorg and dedup reconciler.

use crate::{
    CursorWriteGuard, CursorWriter, HotBufferWriter, Metrics, NormalizeError, RetryConfig,
    normalize, retry::fetch_block,
};
use hotchain_primitives::{Block, BlockHash, BlockRef, IngestionCursor, NormalizedBlock, unix_now};
use hotchain_source::{ChainSource, SourceError};
use hotchain_storage::{BufferWriter, StorageError};
use thiserror::Error;

/// Errors raised while reconciling a block.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// No common ancestor within `max_depth` blocks of the cursor. Requires a resync.
    #[error("no common ancestor within {max_depth} blocks of height {height}")]
    DeepReorgUnrecoverable {
        /// Height of the block that triggered the reorg.
        height: u64,
        /// The configured bound.
        max_depth: u64,
    },
    /// The block is more than one height above the cursor.
    #[error("block {height} does not follow the cursor at height {cursor}")]
    OutOfOrder {
        /// Height of the rejected block.
        height: u64,
        /// Height of the cursor.
        cursor: u64,
    },
    /// Fetching an ancestor failed.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// An ancestor payload is malformed.
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    /// The buffer or the cursor could not be written.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ReconcileError {
    /// Returns `true` if live ingestion must stop.
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::DeepReorgUnrecoverable { .. })
    }
}

/// What the reconciler did with a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// There was no cursor; the block became the starting point.
    Bootstrapped,
    /// The block extends the cursor.
    Accepted,
    /// The block is already canonical.
    Duplicate,
    /// The buffered chain above `ancestor` was replaced.
    Reorged {
        /// The last block both chains share.
        ancestor: BlockRef,
        /// Number of buffered blocks invalidated.
        depth: u64,
        /// The invalidated blocks, in height order.
        invalidated: Vec<Block>,
        /// The new cursor tip.
        tip: BlockRef,
    },
}

/// Keeps the hot buffer on the node's canonical chain.
///
/// The reconciler is the only writer of the ingestion cursor. Every call runs
/// under the cursor write lease.
#[derive(Debug)]
pub struct Reconciler<C, S> {
    source: C,
    writer: HotBufferWriter<S>,
    cursor: CursorWriter,
    max_reorg_depth: u64,
    retry: RetryConfig,
    include_transactions: bool,
}

impl<C, S> Reconciler<C, S>
where
    C: ChainSource,
    S: BufferWriter,
{
    /// Creates a reconciler. Ancestors fetched during a reorg use `include_transactions`.
    pub const fn new(
        source: C,
        writer: HotBufferWriter<S>,
        cursor: CursorWriter,
        max_reorg_depth: u64,
        retry: RetryConfig,
        include_transactions: bool,
    ) -> Self {
        Self { source, writer, cursor, max_reorg_depth, retry, include_transactions }
    }

    /// The current cursor.
    pub async fn cursor(&self) -> Option<IngestionCursor> {
        self.cursor.lock().await.cursor()
    }

    /// Reconciles `block` against the cursor.
    pub async fn reconcile(
        &self,
        block: NormalizedBlock,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let mut lease = self.cursor.lock().await;

        let Some(cursor) = lease.cursor() else {
            self.writer.upsert(&block).await?;
            lease.advance(IngestionCursor::at(&block.block, unix_now()))?;
            info!(
                target: "reconciler",
                height = block.block.height,
                hash = %block.block.hash,
                "Bootstrapped ingestion cursor"
            );
            return Ok(ReconcileOutcome::Bootstrapped);
        };

        if cursor.is_parent_of(&block.block) {
            self.accept(&mut lease, &block).await?;
            return Ok(ReconcileOutcome::Accepted);
        }

        let height = block.block.height;
        if height <= cursor.last_canonical_height &&
            self.writer.store().block_by_hash(&block.block.hash)?.is_some()
        {
            trace!(target: "reconciler", height, hash = %block.block.hash, "Duplicate block");
            return Ok(ReconcileOutcome::Duplicate);
        }
        if height > cursor.last_canonical_height + 1 {
            return Err(ReconcileError::OutOfOrder {
                height,
                cursor: cursor.last_canonical_height,
            });
        }

        warn!(
            target: "reconciler",
            height,
            hash = %block.block.hash,
            parent = %block.block.parent_hash,
            cursor = %cursor.last_canonical_hash,
            "Parent mismatch, walking back to a common ancestor"
        );
        let (ancestor, new_chain) = self.find_common_ancestor(&cursor, block).await?;

        let invalidated = self.writer.delete_from_height(ancestor.height).await?;
        lease.advance(IngestionCursor::at(&ancestor, unix_now()))?;
        for block in &new_chain {
            self.accept(&mut lease, block).await?;
        }

        let depth = cursor.last_canonical_height - ancestor.height;
        let tip = new_chain.last().map(|b| b.block.block_ref()).unwrap_or(ancestor.block_ref());
        metrics::counter!(Metrics::REORGS).increment(1);
        metrics::histogram!(Metrics::REORG_DEPTH).record(depth as f64);
        info!(
            target: "reconciler",
            ancestor = ancestor.height,
            depth,
            new_tip = tip.height,
            "Reorg repaired"
        );
        Ok(ReconcileOutcome::Reorged { ancestor: ancestor.block_ref(), depth, invalidated, tip })
    }

    async fn accept(
        &self,
        lease: &mut CursorWriteGuard<'_>,
        block: &NormalizedBlock,
    ) -> Result<(), ReconcileError> {
        let outcome = self.writer.upsert(block).await?;
        lease.advance(IngestionCursor::at(&block.block, unix_now()))?;
        if outcome.is_new() {
            metrics::counter!(Metrics::BLOCKS_INGESTED).increment(1);
        }
        debug!(
            target: "reconciler",
            height = block.block.height,
            hash = %block.block.hash,
            "Accepted block"
        );
        Ok(())
    }

    /// Follows parent hashes from `block` until one matches the buffered block at
    /// the same height. Returns the ancestor and the new chain above it in height
    /// order. Nothing is written.
    async fn find_common_ancestor(
        &self,
        cursor: &IngestionCursor,
        block: NormalizedBlock,
    ) -> Result<(Block, Vec<NormalizedBlock>), ReconcileError> {
        let tip_height = block.block.height;
        let deep = || {
            metrics::counter!(Metrics::DEEP_REORGS).increment(1);
            ReconcileError::DeepReorgUnrecoverable {
                height: tip_height,
                max_depth: self.max_reorg_depth,
            }
        };

        let mut new_chain = vec![block];
        loop {
            let Some(child) = new_chain.last().map(|b| b.block.clone()) else {
                return Err(deep());
            };
            let Some(height) = child.height.checked_sub(1) else {
                return Err(deep());
            };
            if cursor.last_canonical_height.saturating_sub(height) > self.max_reorg_depth {
                return Err(deep());
            }

            match self.writer.store().block_at_height(height)? {
                Some(stored) if stored.hash == child.parent_hash => {
                    new_chain.reverse();
                    return Ok((stored, new_chain));
                }
                Some(_) => {}
                None => {
                    // Below the buffer. The lowest buffered block still proves the
                    // ancestor when it shares a parent with the new chain.
                    let shares_parent = self
                        .writer
                        .store()
                        .block_at_height(child.height)?
                        .is_some_and(|stored| stored.parent_hash == child.parent_hash);
                    if !shares_parent {
                        return Err(deep());
                    }
                    let ancestor = self.fetch_at(child.parent_hash, height, false).await?.block;
                    debug!(target: "reconciler", height, "Common ancestor predates the buffer");
                    new_chain.reverse();
                    return Ok((ancestor, new_chain));
                }
            }

            let parent =
                self.fetch_at(child.parent_hash, height, self.include_transactions).await?;
            trace!(target: "reconciler", height, hash = %parent.block.hash, "Walked back");
            new_chain.push(parent);
        }
    }

    /// Fetches the block `hash`, which must sit at `height`.
    async fn fetch_at(
        &self,
        hash: BlockHash,
        height: u64,
        include_transactions: bool,
    ) -> Result<NormalizedBlock, ReconcileError> {
        let raw = fetch_block(&self.source, hash, include_transactions, &self.retry).await?;
        let block = normalize(raw)?;
        if block.block.height != height {
            return Err(SourceError::Malformed(format!(
                "block {hash} expected at height {height}, reported at {}",
                block.block.height
            ))
            .into());
        }
        Ok(block)
    }
}
