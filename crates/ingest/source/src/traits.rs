//! The [`ChainSource`] trait.

use crate::SourceError;
use async_trait::async_trait;
use hotchain_primitives::{BlockHash, BlockId, RawBlock};
use std::{fmt::Debug, sync::Arc};

/// Read access to a trusted Bitcoin full node.
///
/// Implementations are stateless per call; retries are the caller's concern.
#[async_trait]
pub trait ChainSource: Debug + Send + Sync {
    /// Returns the height of the node's best chain tip.
    async fn tip_height(&self) -> Result<u64, SourceError>;

    /// Returns the hash of the block at `height` on the node's active chain.
    async fn block_hash(&self, height: u64) -> Result<BlockHash, SourceError>;

    /// Fetches a block. With `include_transactions`, the payload carries full
    /// transactions including the spent outputs of their inputs.
    async fn block_at(
        &self,
        id: BlockId,
        include_transactions: bool,
    ) -> Result<RawBlock, SourceError>;
}

#[async_trait]
impl<T: ChainSource + ?Sized> ChainSource for Arc<T> {
    async fn tip_height(&self) -> Result<u64, SourceError> {
        (**self).tip_height().await
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, SourceError> {
        (**self).block_hash(height).await
    }

    async fn block_at(
        &self,
        id: BlockId,
        include_transactions: bool,
    ) -> Result<RawBlock, SourceError> {
        (**self).block_at(id, include_transactions).await
    }
}
