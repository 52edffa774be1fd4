//! The ingestion cursor.

use crate::{Block, BlockHash};
use serde::{Deserialize, Serialize};

/// The last block the reconciler accepted as canonical.
///
/// There is exactly one cursor per buffer store. The reconciler is its only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionCursor {
    /// Height of the canonical tip.
    pub last_canonical_height: u64,
    /// Hash of the canonical tip.
    pub last_canonical_hash: BlockHash,
    /// When the cursor last moved, seconds since the Unix epoch.
    pub updated_at: u64,
}

impl IngestionCursor {
    /// Creates a cursor pointing at `block`.
    pub const fn at(block: &Block, updated_at: u64) -> Self {
        Self {
            last_canonical_height: block.height,
            last_canonical_hash: block.hash,
            updated_at,
        }
    }

    /// Returns `true` if `block` is the direct child of the cursor tip.
    pub fn is_parent_of(&self, block: &Block) -> bool {
        block.parent_hash == self.last_canonical_hash &&
            block.height == self.last_canonical_height + 1
    }
}
