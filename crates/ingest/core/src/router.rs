//! The unified query router.

use hotchain_primitives::{Block, BufferWindow, ReadOrder, TimeRange, unix_now};
use hotchain_storage::{BufferReader, HistoricalReader, StorageError};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

/// Errors raised by the [`QueryRouter`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    /// `start` is after `end`.
    #[error("invalid time range {0}")]
    InvalidRange(TimeRange),
    /// The historical store failed.
    #[error("historical store: {0}")]
    Historical(StorageError),
    /// The hot buffer failed.
    #[error("hot buffer: {0}")]
    Buffer(StorageError),
}

/// Which stores serve a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutePlan {
    /// The range ends before the boundary.
    Historical,
    /// The range starts at or after the boundary.
    Buffer,
    /// The range straddles `boundary`.
    Split {
        /// First timestamp served by the buffer.
        boundary: u64,
    },
}

/// Serves time range reads across the historical store and the hot buffer.
///
/// Reads take no lock. Where both stores hold a block, the buffered copy wins.
#[derive(Debug)]
pub struct QueryRouter<H, B> {
    historical: Arc<H>,
    buffer: Arc<B>,
    window: BufferWindow,
}

impl<H, B> Clone for QueryRouter<H, B> {
    fn clone(&self) -> Self {
        Self {
            historical: self.historical.clone(),
            buffer: self.buffer.clone(),
            window: self.window,
        }
    }
}

impl<H, B> QueryRouter<H, B>
where
    H: HistoricalReader,
    B: BufferReader,
{
    /// Creates a router.
    pub const fn new(historical: Arc<H>, buffer: Arc<B>, window: BufferWindow) -> Self {
        Self { historical, buffer, window }
    }

    /// Decides which stores serve `range` at time `now`.
    pub const fn plan(&self, range: TimeRange, now: u64) -> Result<RoutePlan, RouterError> {
        if !range.is_valid() {
            return Err(RouterError::InvalidRange(range));
        }
        let boundary = self.window.boundary(now);
        Ok(if range.end < boundary {
            RoutePlan::Historical
        } else if range.start >= boundary {
            RoutePlan::Buffer
        } else {
            RoutePlan::Split { boundary }
        })
    }

    /// Returns the blocks with a timestamp in `range`, one per hash.
    pub fn blocks_in_range(
        &self,
        range: TimeRange,
        order: ReadOrder,
    ) -> Result<Vec<Block>, RouterError> {
        self.blocks_in_range_at(range, order, unix_now())
    }

    /// [`Self::blocks_in_range`] with `now` as the current time.
    pub fn blocks_in_range_at(
        &self,
        range: TimeRange,
        order: ReadOrder,
        now: u64,
    ) -> Result<Vec<Block>, RouterError> {
        let plan = self.plan(range, now)?;
        let mut blocks = match plan {
            RoutePlan::Historical => self.historical(range)?,
            RoutePlan::Buffer => self.buffer(range)?,
            RoutePlan::Split { boundary } => {
                let older = self.historical(TimeRange::new(range.start, boundary - 1))?;
                let newer = self.buffer(TimeRange::new(boundary, range.end))?;
                merge(older, newer)
            }
        };

        match order {
            ReadOrder::Height => blocks.sort_by_key(|b| (b.height, b.hash)),
            ReadOrder::Timestamp => blocks.sort_by_key(|b| (b.timestamp, b.height, b.hash)),
        }
        trace!(target: "router", %range, ?plan, count = blocks.len(), "Served range");
        Ok(blocks)
    }

    fn historical(&self, range: TimeRange) -> Result<Vec<Block>, RouterError> {
        self.historical.blocks_between(range).map_err(RouterError::Historical)
    }

    fn buffer(&self, range: TimeRange) -> Result<Vec<Block>, RouterError> {
        self.buffer.blocks_in_range(range).map_err(RouterError::Buffer)
    }
}

/// Merges by hash; entries of `newer` replace entries of `older`.
fn merge(older: Vec<Block>, newer: Vec<Block>) -> Vec<Block> {
    let mut by_hash: HashMap<_, _> = older.into_iter().map(|b| (b.hash, b)).collect();
    by_hash.extend(newer.into_iter().map(|b| (b.hash, b)));
    by_hash.into_values().collect()
}
