//! Error types for the chain source.

use hotchain_primitives::BlockId;
use thiserror::Error;

/// Errors returned by a [`ChainSource`](crate::ChainSource).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The node could not be reached, timed out or answered with a server error.
    #[error("chain source unavailable: {0}")]
    Unavailable(String),
    /// The requested block does not exist on the node.
    #[error("block not found: {0}")]
    NotFound(BlockId),
    /// The response could not be decoded.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl SourceError {
    /// Returns `true` if the call may succeed when retried.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(SourceError::Unavailable("timeout".into()).is_retryable());
        assert!(!SourceError::NotFound(BlockId::Height(1)).is_retryable());
        assert!(!SourceError::Malformed("eof".into()).is_retryable());
    }
}
