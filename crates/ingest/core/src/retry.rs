//! Retried calls against the chain source and the stores.

use crate::RetryConfig;
use backon::Retryable;
use hotchain_primitives::{BlockHash, BlockId, RawBlock};
use hotchain_source::{ChainSource, SourceError};
use std::{fmt::Display, future::Future};

/// Runs `op` until it succeeds, fails with a non-retryable error or runs out of attempts.
pub(crate) async fn with_retry<T, E, F, Fut>(
    retry: &RetryConfig,
    what: &'static str,
    is_retryable: fn(&E) -> bool,
    op: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    op.retry(retry.backoff())
        .when(is_retryable)
        .notify(|err, delay| {
            warn!(target: "ingest", %err, ?delay, "{what} failed, retrying");
        })
        .await
}

pub(crate) async fn fetch_tip<C: ChainSource>(
    source: &C,
    retry: &RetryConfig,
) -> Result<u64, SourceError> {
    with_retry(retry, "getblockcount", SourceError::is_retryable, || source.tip_height()).await
}

pub(crate) async fn fetch_hash<C: ChainSource>(
    source: &C,
    height: u64,
    retry: &RetryConfig,
) -> Result<BlockHash, SourceError> {
    with_retry(retry, "getblockhash", SourceError::is_retryable, || source.block_hash(height))
        .await
}

/// Resolves `height` to a hash, then fetches that block.
pub(crate) async fn fetch_block_at_height<C: ChainSource>(
    source: &C,
    height: u64,
    include_transactions: bool,
    retry: &RetryConfig,
) -> Result<RawBlock, SourceError> {
    let hash = fetch_hash(source, height, retry).await?;
    fetch_block(source, hash, include_transactions, retry).await
}

pub(crate) async fn fetch_block<C: ChainSource>(
    source: &C,
    hash: BlockHash,
    include_transactions: bool,
    retry: &RetryConfig,
) -> Result<RawBlock, SourceError> {
    with_retry(retry, "getblock", SourceError::is_retryable, || {
        source.block_at(BlockId::Hash(hash), include_transactions)
    })
    .await
}


#[cfg(test)]
mod tests {
    use super::{test_utils::FAST_RETRY, *};
    use hotchain_source::MemoryChainSource;

    #[tokio::test]
    async fn test_outage_within_attempts_is_absorbed() {
        let source = MemoryChainSource::with_blocks(0, 600, 3);
        source.fail_next(2);
        assert_eq!(fetch_tip(&source, &FAST_RETRY).await.unwrap(), 2);
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_outage_beyond_attempts_surfaces() {
        let source = MemoryChainSource::with_blocks(0, 600, 3);
        source.fail_next(3);
        let err = fetch_block_at_height(&source, 1, false, &FAST_RETRY).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let source = MemoryChainSource::with_blocks(0, 600, 3);
        let err = fetch_hash(&source, 10, &FAST_RETRY).await.unwrap_err();
        assert_eq!(err, SourceError::NotFound(BlockId::Height(10)));
        assert_eq!(source.calls(), 1);
    }
}
