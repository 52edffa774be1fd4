//! Storage traits shared by the buffer and historical stores.

use crate::StorageError;
use hotchain_primitives::{
    BackfillJob, Block, BlockHash, ChunkProgress, IngestionCursor, NormalizedBlock, TimeRange,
};
use std::{fmt::Debug, sync::Arc};

/// Result of a buffer upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The block was not stored before.
    Inserted,
    /// The block was already stored; nothing changed.
    Unchanged,
    /// The block took the height of a different block, which was removed.
    Replaced(Block),
}

impl UpsertOutcome {
    /// Returns `true` if the block was not stored before this upsert.
    pub const fn is_new(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Read access to the hot buffer.
pub trait BufferReader: Debug + Send + Sync {
    /// Gets a block by hash.
    fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Block>, StorageError>;

    /// Gets the block stored at `height`.
    fn block_at_height(&self, height: u64) -> Result<Option<Block>, StorageError>;

    /// Gets a block together with its transactions, inputs and outputs.
    fn normalized_block(&self, hash: &BlockHash) -> Result<Option<NormalizedBlock>, StorageError>;

    /// Returns the blocks whose timestamp lies in `range`, in no particular order.
    fn blocks_in_range(&self, range: TimeRange) -> Result<Vec<Block>, StorageError>;

    /// Returns the number of stored blocks.
    fn block_count(&self) -> Result<usize, StorageError>;
}

/// Write access to the hot buffer.
///
/// Every write is an idempotent upsert or delete and is atomic per call.
pub trait BufferWriter: BufferReader {
    /// Stores a block with its transactions, keyed by block hash.
    ///
    /// A different block stored at the same height is removed.
    fn upsert(&self, block: &NormalizedBlock) -> Result<UpsertOutcome, StorageError>;

    /// Deletes every block above `height` and returns them in height order.
    fn delete_above(&self, height: u64) -> Result<Vec<Block>, StorageError>;

    /// Deletes blocks with `timestamp < cutoff`, skipping blocks above `max_height`.
    /// Returns the number of deleted blocks.
    fn delete_older_than(&self, cutoff: u64, max_height: Option<u64>)
    -> Result<usize, StorageError>;
}

/// Persistence of the ingestion cursor.
pub trait CursorStorage: Debug + Send + Sync {
    /// Loads the cursor, if one was saved.
    fn load_cursor(&self) -> Result<Option<IngestionCursor>, StorageError>;

    /// Saves the cursor.
    fn save_cursor(&self, cursor: &IngestionCursor) -> Result<(), StorageError>;
}

/// Persistence of backfill jobs.
pub trait JobStorage: Debug + Send + Sync {
    /// Allocates a new job id.
    fn next_job_id(&self) -> Result<u64, StorageError>;

    /// Saves a job and all of its chunks.
    fn save_job(&self, job: &BackfillJob) -> Result<(), StorageError>;

    /// Saves the progress of a single chunk of `job_id`.
    fn save_chunk(&self, job_id: u64, chunk: &ChunkProgress) -> Result<(), StorageError>;

    /// Loads a job.
    fn load_job(&self, job_id: u64) -> Result<Option<BackfillJob>, StorageError>;

    /// Lists every job, oldest first.
    fn list_jobs(&self) -> Result<Vec<BackfillJob>, StorageError>;
}

/// Read access to the historical append-only store.
pub trait HistoricalReader: Debug + Send + Sync {
    /// Returns the blocks whose timestamp lies in `range`, in no particular order.
    fn blocks_between(&self, range: TimeRange) -> Result<Vec<Block>, StorageError>;
}

/// A historical store with no data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHistory;

impl HistoricalReader for NoHistory {
    fn blocks_between(&self, _: TimeRange) -> Result<Vec<Block>, StorageError> {
        Ok(Vec::new())
    }
}

impl<T: HistoricalReader + ?Sized> HistoricalReader for Arc<T> {
    fn blocks_between(&self, range: TimeRange) -> Result<Vec<Block>, StorageError> {
        (**self).blocks_between(range)
    }
}
