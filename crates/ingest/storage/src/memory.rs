//! An in-memory implementation of every storage trait.

use crate::{
    BufferReader, BufferWriter, CursorStorage, HistoricalReader, JobStorage, StorageError,
    UpsertOutcome,
};
use hotchain_primitives::{
    BackfillJob, Block, BlockHash, ChunkProgress, IngestionCursor, NormalizedBlock, TimeRange,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

#[derive(Debug, Default)]
struct MemoryState {
    blocks: HashMap<BlockHash, NormalizedBlock>,
    heights: BTreeMap<u64, BlockHash>,
    cursor: Option<IngestionCursor>,
    jobs: BTreeMap<u64, BackfillJob>,
    job_seq: u64,
    failing_writes: usize,
    writes: usize,
}

impl MemoryState {
    fn check_write(&mut self) -> Result<(), StorageError> {
        self.writes += 1;
        if self.failing_writes > 0 {
            self.failing_writes -= 1;
            return Err(StorageError::Database("write stalled".into()));
        }
        Ok(())
    }

    fn remove(&mut self, hash: &BlockHash) -> Option<Block> {
        let removed = self.blocks.remove(hash)?.block;
        if self.heights.get(&removed.height) == Some(hash) {
            self.heights.remove(&removed.height);
        }
        Some(removed)
    }
}

/// Blocks, cursor and jobs held in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, MemoryState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, MemoryState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next `count` writes fail with [`StorageError::Database`].
    pub fn fail_next_writes(&self, count: usize) {
        self.write().failing_writes = count;
    }

    /// Number of write calls seen so far, failed ones included.
    pub fn writes(&self) -> usize {
        self.read().writes
    }

    /// Every stored block, in height order.
    pub fn blocks(&self) -> Vec<Block> {
        let state = self.read();
        let mut blocks: Vec<_> = state.blocks.values().map(|b| b.block.clone()).collect();
        blocks.sort_by_key(|b| b.height);
        blocks
    }
}

impl BufferReader for MemoryStore {
    fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Block>, StorageError> {
        Ok(self.read().blocks.get(hash).map(|b| b.block.clone()))
    }

    fn block_at_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        let state = self.read();
        let block = state.heights.get(&height).and_then(|hash| state.blocks.get(hash));
        Ok(block.map(|b| b.block.clone()))
    }

    fn normalized_block(&self, hash: &BlockHash) -> Result<Option<NormalizedBlock>, StorageError> {
        Ok(self.read().blocks.get(hash).cloned())
    }

    fn blocks_in_range(&self, range: TimeRange) -> Result<Vec<Block>, StorageError> {
        Ok(self
            .read()
            .blocks
            .values()
            .filter(|b| range.contains(b.block.timestamp))
            .map(|b| b.block.clone())
            .collect())
    }

    fn block_count(&self) -> Result<usize, StorageError> {
        Ok(self.read().blocks.len())
    }
}

impl BufferWriter for MemoryStore {
    fn upsert(&self, block: &NormalizedBlock) -> Result<UpsertOutcome, StorageError> {
        let mut state = self.write();
        state.check_write()?;
        let hash = block.block.hash;
        if state.blocks.contains_key(&hash) {
            return Ok(UpsertOutcome::Unchanged);
        }

        let replaced = state.heights.get(&block.block.height).copied();
        let outcome = match replaced.and_then(|previous| state.remove(&previous)) {
            Some(previous) => UpsertOutcome::Replaced(previous),
            None => UpsertOutcome::Inserted,
        };
        state.heights.insert(block.block.height, hash);
        state.blocks.insert(hash, block.clone());
        Ok(outcome)
    }

    fn delete_above(&self, height: u64) -> Result<Vec<Block>, StorageError> {
        let mut state = self.write();
        state.check_write()?;
        let Some(first) = height.checked_add(1) else { return Ok(Vec::new()) };
        let hashes: Vec<_> = state.heights.range(first..).map(|(_, hash)| *hash).collect();
        Ok(hashes.iter().filter_map(|hash| state.remove(hash)).collect())
    }

    fn delete_older_than(
        &self,
        cutoff: u64,
        max_height: Option<u64>,
    ) -> Result<usize, StorageError> {
        let mut state = self.write();
        state.check_write()?;
        let expired: Vec<_> = state
            .blocks
            .values()
            .filter(|b| b.block.timestamp < cutoff)
            .filter(|b| max_height.is_none_or(|max| b.block.height <= max))
            .map(|b| b.block.hash)
            .collect();
        for hash in &expired {
            state.remove(hash);
        }
        Ok(expired.len())
    }
}

impl CursorStorage for MemoryStore {
    fn load_cursor(&self) -> Result<Option<IngestionCursor>, StorageError> {
        Ok(self.read().cursor)
    }

    fn save_cursor(&self, cursor: &IngestionCursor) -> Result<(), StorageError> {
        let mut state = self.write();
        state.check_write()?;
        state.cursor = Some(*cursor);
        Ok(())
    }
}

impl JobStorage for MemoryStore {
    fn next_job_id(&self) -> Result<u64, StorageError> {
        let mut state = self.write();
        state.job_seq += 1;
        Ok(state.job_seq)
    }

    fn save_job(&self, job: &BackfillJob) -> Result<(), StorageError> {
        self.write().jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn save_chunk(&self, job_id: u64, chunk: &ChunkProgress) -> Result<(), StorageError> {
        let mut state = self.write();
        let job = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| StorageError::NotFound(format!("backfill job {job_id}")))?;
        let slot = job.chunks.get_mut(chunk.index as usize).ok_or_else(|| {
            StorageError::NotFound(format!("chunk {} of job {job_id}", chunk.index))
        })?;
        *slot = chunk.clone();
        Ok(())
    }

    fn load_job(&self, job_id: u64) -> Result<Option<BackfillJob>, StorageError> {
        Ok(self.read().jobs.get(&job_id).cloned())
    }

    fn list_jobs(&self) -> Result<Vec<BackfillJob>, StorageError> {
        Ok(self.read().jobs.values().cloned().collect())
    }
}

impl HistoricalReader for MemoryStore {
    fn blocks_between(&self, range: TimeRange) -> Result<Vec<Block>, StorageError> {
        self.blocks_in_range(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn block(height: u64, tag: u8) -> NormalizedBlock {
        NormalizedBlock::header_only(Block {
            hash: B256::left_padding_from(&[tag, height as u8]),
            height,
            parent_hash: B256::ZERO,
            timestamp: height * 10,
            size: 1,
            weight: 4,
            transaction_count: 0,
        })
    }

    #[test]
    fn test_memory_store_matches_buffer_semantics() {
        let store = MemoryStore::new();
        for height in 0..4 {
            assert_eq!(store.upsert(&block(height, 0)).unwrap(), UpsertOutcome::Inserted);
        }
        assert_eq!(store.upsert(&block(2, 0)).unwrap(), UpsertOutcome::Unchanged);
        assert_eq!(
            store.upsert(&block(3, 1)).unwrap(),
            UpsertOutcome::Replaced(block(3, 0).block)
        );
        assert_eq!(store.delete_above(1).unwrap().len(), 2);
        assert_eq!(store.delete_older_than(100, Some(0)).unwrap(), 1);
        assert_eq!(store.blocks(), vec![block(1, 0).block]);
    }

    #[test]
    fn test_injected_write_failures() {
        let store = MemoryStore::new();
        store.fail_next_writes(1);
        assert!(store.upsert(&block(0, 0)).unwrap_err().is_retryable());
        assert!(store.upsert(&block(0, 0)).is_ok());
        assert_eq!(store.writes(), 2);
    }
}
