//! The subset of the Bitcoin Core JSON-RPC API used by the pipeline.

use hotchain_primitives::{BlockHash, RawBlock};
use jsonrpsee::{core::RpcResult, proc_macros::rpc};

/// Bitcoin Core block methods. Bitcoin Core has no method namespace.
#[rpc(client)]
pub trait BitcoinApi {
    /// Height of the most-work fully validated chain.
    #[method(name = "getblockcount")]
    async fn get_block_count(&self) -> RpcResult<u64>;

    /// Hash of the block at `height` on the active chain.
    #[method(name = "getblockhash")]
    async fn get_block_hash(&self, height: u64) -> RpcResult<BlockHash>;

    /// The block with `hash`, hex encoded without prefix.
    ///
    /// Verbosity 1 lists transaction ids, verbosity 3 returns full transactions
    /// with the spent output of every input.
    #[method(name = "getblock")]
    async fn get_block(&self, hash: String, verbosity: u8) -> RpcResult<RawBlock>;
}
