//! Events published to downstream consumers.

use crate::{Block, BlockHash};
use serde::{Deserialize, Serialize};

/// A change to the canonical chain held in the hot buffer.
///
/// Delivery is at-least-once; consumers dedupe by block hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum BlockEvent {
    /// A block was newly persisted.
    Accepted {
        /// The block hash.
        hash: BlockHash,
        /// The block height.
        height: u64,
        /// The block time.
        timestamp: u64,
    },
    /// A previously accepted block was removed by a reorg.
    Invalidated {
        /// The block hash.
        hash: BlockHash,
        /// The block height.
        height: u64,
    },
}

impl BlockEvent {
    /// Builds an [`BlockEvent::Accepted`] for `block`.
    pub const fn accepted(block: &Block) -> Self {
        Self::Accepted { hash: block.hash, height: block.height, timestamp: block.timestamp }
    }

    /// Builds an [`BlockEvent::Invalidated`] for `block`.
    pub const fn invalidated(block: &Block) -> Self {
        Self::Invalidated { hash: block.hash, height: block.height }
    }

    /// The hash of the affected block.
    pub const fn hash(&self) -> BlockHash {
        match self {
            Self::Accepted { hash, .. } | Self::Invalidated { hash, .. } => *hash,
        }
    }

    /// The height of the affected block.
    pub const fn height(&self) -> u64 {
        match self {
            Self::Accepted { height, .. } | Self::Invalidated { height, .. } => *height,
        }
    }
}
