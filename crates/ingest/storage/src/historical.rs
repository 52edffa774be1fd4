//! Read-only access to the historical dataset.

use crate::{
    HistoricalReader, StorageError,
    keys::COLUMN_FAMILIES,
    rocks::scan_range,
};
use hotchain_primitives::{Block, TimeRange};
use rocksdb::{DB, Options};
use std::{path::Path, sync::Arc};

/// The historical append-only store, opened read-only.
///
/// The directory must carry the buffer schema; typically it is a buffer store that
/// was exported after its blocks aged past the read boundary.
#[derive(Debug, Clone)]
pub struct HistoricalStore {
    db: Arc<DB>,
}

impl HistoricalStore {
    /// Opens the store at `path` without taking the write lock.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = DB::open_cf_for_read_only(&Options::default(), path, COLUMN_FAMILIES, false)?;
        info!(target: "storage", path = %path.display(), "Opened historical store");
        Ok(Self { db: Arc::new(db) })
    }
}

impl HistoricalReader for HistoricalStore {
    fn blocks_between(&self, range: TimeRange) -> Result<Vec<Block>, StorageError> {
        scan_range(&self.db, range)
    }
}
