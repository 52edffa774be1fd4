//! The cursor lease.
//!
//! The ingestion cursor lives behind one async mutex and is handed out as two
//! typed handles. Only the [`CursorWriter`] can move it; the sweeper holds a
//! [`CursorReader`] so that eviction never runs while the cursor is moving.

use hotchain_primitives::IngestionCursor;
use hotchain_storage::{CursorStorage, StorageError};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Loads the persisted cursor and owns it until split into handles.
#[derive(Debug)]
pub struct CursorLease {
    storage: Arc<dyn CursorStorage>,
    cursor: Arc<Mutex<Option<IngestionCursor>>>,
}

impl CursorLease {
    /// Loads the cursor from `storage`.
    pub fn load(storage: Arc<dyn CursorStorage>) -> Result<Self, StorageError> {
        let cursor = storage.load_cursor()?;
        if let Some(cursor) = &cursor {
            debug!(
                target: "ingest",
                height = cursor.last_canonical_height,
                hash = %cursor.last_canonical_hash,
                "Loaded ingestion cursor"
            );
        }
        Ok(Self { storage, cursor: Arc::new(Mutex::new(cursor)) })
    }

    /// Splits the lease into its single writer and a cloneable reader.
    pub fn split(self) -> (CursorWriter, CursorReader) {
        let reader = CursorReader { cursor: self.cursor.clone() };
        (CursorWriter { storage: self.storage, cursor: self.cursor }, reader)
    }
}

/// The only handle that can move the cursor. Not cloneable.
#[derive(Debug)]
pub struct CursorWriter {
    storage: Arc<dyn CursorStorage>,
    cursor: Arc<Mutex<Option<IngestionCursor>>>,
}

impl CursorWriter {
    /// Takes the lease for writing.
    pub async fn lock(&self) -> CursorWriteGuard<'_> {
        CursorWriteGuard { storage: self.storage.as_ref(), guard: self.cursor.lock().await }
    }

    /// A reader over the same cursor.
    pub fn reader(&self) -> CursorReader {
        CursorReader { cursor: self.cursor.clone() }
    }
}

/// Exclusive write access to the cursor.
#[derive(Debug)]
pub struct CursorWriteGuard<'a> {
    storage: &'a dyn CursorStorage,
    guard: MutexGuard<'a, Option<IngestionCursor>>,
}

impl CursorWriteGuard<'_> {
    /// The current cursor.
    pub fn cursor(&self) -> Option<IngestionCursor> {
        *self.guard
    }

    /// Persists `cursor`, then makes it current.
    ///
    /// On error the in-memory cursor is left unchanged.
    pub fn advance(&mut self, cursor: IngestionCursor) -> Result<(), StorageError> {
        self.storage.save_cursor(&cursor)?;
        *self.guard = Some(cursor);
        metrics::gauge!(crate::Metrics::CURSOR_HEIGHT).set(cursor.last_canonical_height as f64);
        Ok(())
    }
}

/// Read-only access to the cursor.
#[derive(Debug, Clone)]
pub struct CursorReader {
    cursor: Arc<Mutex<Option<IngestionCursor>>>,
}

impl CursorReader {
    /// Takes the lease for reading. The cursor cannot move while the guard lives.
    pub async fn lock(&self) -> CursorReadGuard<'_> {
        CursorReadGuard { guard: self.cursor.lock().await }
    }

    /// A snapshot of the current cursor.
    pub async fn current(&self) -> Option<IngestionCursor> {
        *self.cursor.lock().await
    }
}

/// Holds the cursor still.
#[derive(Debug)]
pub struct CursorReadGuard<'a> {
    guard: MutexGuard<'a, Option<IngestionCursor>>,
}

impl CursorReadGuard<'_> {
    /// The cursor at the time the guard was taken.
    pub fn cursor(&self) -> Option<IngestionCursor> {
        *self.guard
    }
}
