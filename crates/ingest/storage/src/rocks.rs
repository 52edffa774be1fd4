//! RocksDB implementation of the hot buffer.

use crate::{
    BufferReader, BufferWriter, CursorStorage, JobStorage, StorageError, UpsertOutcome,
    keys::{
        CF_BLOCKS, CF_HEIGHTS, CF_JOBS, CF_META, CF_TIMESTAMPS, CF_TRANSACTIONS, COLUMN_FAMILIES,
        META_CURSOR, META_JOB_SEQ, chunk_key, decode_hash, decode_u64, height_key, job_key,
        split_timestamp_key, timestamp_key, transaction_key,
    },
};
use hotchain_primitives::{
    BackfillJob, Block, BlockHash, ChunkProgress, IngestionCursor, Input, NormalizedBlock, Output,
    TimeRange, Transaction, TxHash,
};
use rocksdb::{ColumnFamily, DB, Direction, IteratorMode, Options, WriteBatch};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{
    path::Path,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

/// A transaction row with its inputs and outputs.
#[derive(Debug, Serialize, Deserialize)]
struct StoredTransaction {
    transaction: Transaction,
    inputs: Vec<Input>,
    outputs: Vec<Output>,
}

pub(crate) fn cf<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily, StorageError> {
    db.cf_handle(name)
        .ok_or_else(|| StorageError::Corrupted(format!("column family '{name}' not found")))
}

fn get_json<T: DeserializeOwned>(
    db: &DB,
    family: &str,
    key: &[u8],
) -> Result<Option<T>, StorageError> {
    db.get_cf(cf(db, family)?, key)?
        .map(|bytes| serde_json::from_slice(&bytes))
        .transpose()
        .map_err(Into::into)
}

pub(crate) fn read_block(db: &DB, hash: &BlockHash) -> Result<Option<Block>, StorageError> {
    get_json(db, CF_BLOCKS, hash.as_slice())
}

/// Scans the timestamp index over `range`.
pub(crate) fn scan_range(db: &DB, range: TimeRange) -> Result<Vec<Block>, StorageError> {
    if !range.is_valid() {
        return Ok(Vec::new());
    }
    let start = timestamp_key(range.start, &BlockHash::ZERO);
    let mut blocks = Vec::new();
    let index = cf(db, CF_TIMESTAMPS)?;
    for entry in db.iterator_cf(index, IteratorMode::From(&start[..], Direction::Forward)) {
        let (key, _) = entry?;
        let (timestamp, hash) = split_timestamp_key(&key)?;
        if timestamp > range.end {
            break;
        }
        match read_block(db, &hash)? {
            Some(block) => blocks.push(block),
            None => warn!(target: "storage", %hash, "Timestamp index points at a missing block"),
        }
    }
    Ok(blocks)
}

/// Transaction rows of block `hash`, in block order.
fn read_transactions(db: &DB, hash: &BlockHash) -> Result<Vec<StoredTransaction>, StorageError> {
    let start = transaction_key(hash, &TxHash::ZERO);
    let mut rows = Vec::new();
    for entry in
        db.iterator_cf(cf(db, CF_TRANSACTIONS)?, IteratorMode::From(&start[..], Direction::Forward))
    {
        let (key, value) = entry?;
        if !key.starts_with(hash.as_slice()) {
            break;
        }
        rows.push(serde_json::from_slice::<StoredTransaction>(&value)?);
    }
    rows.sort_by_key(|row| row.transaction.index);
    Ok(rows)
}

/// The hot buffer, backed by RocksDB.
///
/// Each write is a single [`WriteBatch`], so a block and its transactions become
/// visible together. Buffer writes are serialized: each one reads the rows it
/// replaces before committing its batch.
#[derive(Debug, Clone)]
pub struct RocksStore {
    db: Arc<DB>,
    writes: Arc<Mutex<()>>,
    job_seq: Arc<Mutex<()>>,
}

impl RocksStore {
    /// Opens or creates a store at `path`.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut options = Options::default();
        options.create_if_missing(true);
        options.create_missing_column_families(true);
        let db = DB::open_cf(&options, path, COLUMN_FAMILIES)?;
        debug!(target: "storage", path = %path.display(), "Opened buffer store");
        Ok(Self {
            db: Arc::new(db),
            writes: Arc::new(Mutex::new(())),
            job_seq: Arc::new(Mutex::new(())),
        })
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, StorageError> {
        cf(&self.db, name)
    }

    /// Stages the removal of `block`, its index entries and its transactions.
    fn stage_delete(&self, batch: &mut WriteBatch, block: &Block) -> Result<(), StorageError> {
        batch.delete_cf(self.cf(CF_BLOCKS)?, block.hash.as_slice());
        batch.delete_cf(self.cf(CF_TIMESTAMPS)?, timestamp_key(block.timestamp, &block.hash));

        let heights = self.cf(CF_HEIGHTS)?;
        let at_height = self.db.get_cf(heights, height_key(block.height))?;
        if at_height.is_some_and(|hash| hash.as_slice() == block.hash.as_slice()) {
            batch.delete_cf(heights, height_key(block.height));
        }

        let transactions = self.cf(CF_TRANSACTIONS)?;
        let start = transaction_key(&block.hash, &TxHash::ZERO);
        for entry in
            self.db.iterator_cf(transactions, IteratorMode::From(&start[..], Direction::Forward))
        {
            let (key, _) = entry?;
            if !key.starts_with(block.hash.as_slice()) {
                break;
            }
            batch.delete_cf(transactions, key);
        }
        Ok(())
    }

    fn load_chunks(&self, job_id: u64) -> Result<Vec<ChunkProgress>, StorageError> {
        let prefix = job_key(job_id);
        let mut chunks = Vec::new();
        let jobs = self.cf(CF_JOBS)?;
        let mode = IteratorMode::From(&prefix[..], Direction::Forward);
        for entry in self.db.iterator_cf(jobs, mode) {
            let (key, value) = entry?;
            if !key.starts_with(&prefix) {
                break;
            }
            if key.len() == prefix.len() {
                continue;
            }
            chunks.push(serde_json::from_slice(&value)?);
        }
        Ok(chunks)
    }
}

impl BufferReader for RocksStore {
    fn block_by_hash(&self, hash: &BlockHash) -> Result<Option<Block>, StorageError> {
        read_block(&self.db, hash)
    }

    fn block_at_height(&self, height: u64) -> Result<Option<Block>, StorageError> {
        let Some(hash) = self.db.get_cf(self.cf(CF_HEIGHTS)?, height_key(height))? else {
            return Ok(None);
        };
        let hash = decode_hash(&hash)?;
        read_block(&self.db, &hash)?.map(Some).ok_or_else(|| {
            StorageError::Corrupted(format!("height {height} points at missing block {hash}"))
        })
    }

    fn normalized_block(&self, hash: &BlockHash) -> Result<Option<NormalizedBlock>, StorageError> {
        let Some(block) = read_block(&self.db, hash)? else { return Ok(None) };
        let mut normalized = NormalizedBlock::header_only(block);
        for row in read_transactions(&self.db, hash)? {
            normalized.transactions.push(row.transaction);
            normalized.inputs.extend(row.inputs);
            normalized.outputs.extend(row.outputs);
        }
        Ok(Some(normalized))
    }

    fn blocks_in_range(&self, range: TimeRange) -> Result<Vec<Block>, StorageError> {
        scan_range(&self.db, range)
    }

    fn block_count(&self) -> Result<usize, StorageError> {
        let mut count = 0;
        for entry in self.db.iterator_cf(self.cf(CF_BLOCKS)?, IteratorMode::Start) {
            entry?;
            count += 1;
        }
        Ok(count)
    }
}

impl BufferWriter for RocksStore {
    fn upsert(&self, normalized: &NormalizedBlock) -> Result<UpsertOutcome, StorageError> {
        let block = &normalized.block;
        let _writes = self.lock_writes();
        if read_block(&self.db, &block.hash)?.is_some() {
            return Ok(UpsertOutcome::Unchanged);
        }

        let mut batch = WriteBatch::default();
        let mut outcome = UpsertOutcome::Inserted;
        if let Some(previous) = self.block_at_height(block.height)? {
            self.stage_delete(&mut batch, &previous)?;
            outcome = UpsertOutcome::Replaced(previous);
        }

        batch.put_cf(self.cf(CF_BLOCKS)?, block.hash.as_slice(), serde_json::to_vec(block)?);
        batch.put_cf(self.cf(CF_HEIGHTS)?, height_key(block.height), block.hash.as_slice());
        batch.put_cf(self.cf(CF_TIMESTAMPS)?, timestamp_key(block.timestamp, &block.hash), b"");
        let transactions = self.cf(CF_TRANSACTIONS)?;
        for transaction in &normalized.transactions {
            let row = StoredTransaction {
                transaction: transaction.clone(),
                inputs: normalized.inputs_of(&transaction.hash).cloned().collect(),
                outputs: normalized.outputs_of(&transaction.hash).cloned().collect(),
            };
            batch.put_cf(
                transactions,
                transaction_key(&block.hash, &transaction.hash),
                serde_json::to_vec(&row)?,
            );
        }

        self.db.write(batch)?;
        Ok(outcome)
    }

    fn delete_above(&self, height: u64) -> Result<Vec<Block>, StorageError> {
        let Some(first) = height.checked_add(1) else { return Ok(Vec::new()) };
        let _writes = self.lock_writes();
        let start = height_key(first);
        let mut batch = WriteBatch::default();
        let mut removed = Vec::new();
        let heights = self.cf(CF_HEIGHTS)?;
        let mode = IteratorMode::From(&start[..], Direction::Forward);
        for entry in self.db.iterator_cf(heights, mode) {
            let (key, value) = entry?;
            let hash = decode_hash(&value)?;
            match read_block(&self.db, &hash)? {
                Some(block) => {
                    self.stage_delete(&mut batch, &block)?;
                    removed.push(block);
                }
                None => {
                    let height = decode_u64(&key)?;
                    warn!(target: "storage", height, %hash, "Dropping dangling height entry");
                    batch.delete_cf(heights, key);
                }
            }
        }
        self.db.write(batch)?;
        Ok(removed)
    }

    fn delete_older_than(
        &self,
        cutoff: u64,
        max_height: Option<u64>,
    ) -> Result<usize, StorageError> {
        let _writes = self.lock_writes();
        let mut batch = WriteBatch::default();
        let mut deleted = 0;
        for entry in self.db.iterator_cf(self.cf(CF_TIMESTAMPS)?, IteratorMode::Start) {
            let (key, _) = entry?;
            let (timestamp, hash) = split_timestamp_key(&key)?;
            if timestamp >= cutoff {
                break;
            }
            let Some(block) = read_block(&self.db, &hash)? else {
                batch.delete_cf(self.cf(CF_TIMESTAMPS)?, key);
                continue;
            };
            if max_height.is_some_and(|max| block.height > max) {
                continue;
            }
            self.stage_delete(&mut batch, &block)?;
            deleted += 1;
        }
        self.db.write(batch)?;
        Ok(deleted)
    }
}

impl CursorStorage for RocksStore {
    fn load_cursor(&self) -> Result<Option<IngestionCursor>, StorageError> {
        get_json(&self.db, CF_META, META_CURSOR)
    }

    fn save_cursor(&self, cursor: &IngestionCursor) -> Result<(), StorageError> {
        self.db.put_cf(self.cf(CF_META)?, META_CURSOR, serde_json::to_vec(cursor)?)?;
        Ok(())
    }
}

impl JobStorage for RocksStore {
    fn next_job_id(&self) -> Result<u64, StorageError> {
        let _guard = self.job_seq.lock().unwrap_or_else(PoisonError::into_inner);
        let meta = self.cf(CF_META)?;
        let next = match self.db.get_cf(meta, META_JOB_SEQ)? {
            Some(bytes) => decode_u64(&bytes)? + 1,
            None => 1,
        };
        self.db.put_cf(meta, META_JOB_SEQ, next.to_be_bytes())?;
        Ok(next)
    }

    fn save_job(&self, job: &BackfillJob) -> Result<(), StorageError> {
        let jobs = self.cf(CF_JOBS)?;
        let header = BackfillJob { chunks: Vec::new(), ..job.clone() };
        let mut batch = WriteBatch::default();
        batch.put_cf(jobs, job_key(job.id), serde_json::to_vec(&header)?);
        for chunk in &job.chunks {
            batch.put_cf(jobs, chunk_key(job.id, chunk.index), serde_json::to_vec(chunk)?);
        }
        self.db.write(batch)?;
        Ok(())
    }

    fn save_chunk(&self, job_id: u64, chunk: &ChunkProgress) -> Result<(), StorageError> {
        let key = chunk_key(job_id, chunk.index);
        self.db.put_cf(self.cf(CF_JOBS)?, key, serde_json::to_vec(chunk)?)?;
        Ok(())
    }

    fn load_job(&self, job_id: u64) -> Result<Option<BackfillJob>, StorageError> {
        let Some(mut job) = get_json::<BackfillJob>(&self.db, CF_JOBS, &job_key(job_id))? else {
            return Ok(None);
        };
        job.chunks = self.load_chunks(job_id)?;
        Ok(Some(job))
    }

    fn list_jobs(&self) -> Result<Vec<BackfillJob>, StorageError> {
        let mut ids = Vec::new();
        for entry in self.db.iterator_cf(self.cf(CF_JOBS)?, IteratorMode::Start) {
            let (key, _) = entry?;
            if key.len() == 8 {
                ids.push(decode_u64(&key)?);
            }
        }
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.load_job(id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }
}
