//! Canonical entity shapes produced by normalization and persisted by the stores.

use alloy_primitives::B256;
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// A block hash, as reported by the node.
pub type BlockHash = B256;

/// A transaction id, as reported by the node.
pub type TxHash = B256;

/// Identifies a block either by hash or by height on the node's active chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BlockId {
    /// Look up by block hash.
    #[display("hash {_0}")]
    Hash(BlockHash),
    /// Look up by height on the active chain.
    #[display("height {_0}")]
    Height(u64),
}

impl From<BlockHash> for BlockId {
    fn from(hash: BlockHash) -> Self {
        Self::Hash(hash)
    }
}

impl From<u64> for BlockId {
    fn from(height: u64) -> Self {
        Self::Height(height)
    }
}

/// Minimal header lineage of a block: enough to walk ancestry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("#{height} {hash}")]
#[serde(rename_all = "camelCase")]
pub struct BlockRef {
    /// The block hash.
    pub hash: BlockHash,
    /// The block height.
    pub height: u64,
    /// Hash of the parent block. Zero for genesis.
    pub parent_hash: BlockHash,
    /// Block header time, seconds since the Unix epoch.
    pub timestamp: u64,
}

/// A block as stored in the hot buffer and the historical store.
///
/// The block hash is the dedup key on every ingestion path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// The block hash.
    pub hash: BlockHash,
    /// The block height.
    pub height: u64,
    /// Hash of the parent block. Zero for genesis.
    pub parent_hash: BlockHash,
    /// Block header time, seconds since the Unix epoch.
    pub timestamp: u64,
    /// Serialized size in bytes.
    pub size: u64,
    /// Block weight in weight units.
    pub weight: u64,
    /// Number of transactions in the block.
    pub transaction_count: u64,
}

impl Block {
    /// Returns the lineage reference of this block.
    pub const fn block_ref(&self) -> BlockRef {
        BlockRef {
            hash: self.hash,
            height: self.height,
            parent_hash: self.parent_hash,
            timestamp: self.timestamp,
        }
    }

    /// Returns `true` if `self` directly extends `parent`.
    pub fn extends(&self, parent: &BlockRef) -> bool {
        self.parent_hash == parent.hash && self.height == parent.height + 1
    }
}

/// A transaction, linked to the block that contains it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// The transaction id.
    pub hash: TxHash,
    /// Hash of the containing block.
    pub block_hash: BlockHash,
    /// Height of the containing block.
    pub block_height: u64,
    /// Time of the containing block.
    pub block_timestamp: u64,
    /// Position of the transaction inside the block.
    pub index: u32,
    /// Serialized size in bytes.
    pub size: u64,
    /// Virtual size in vbytes.
    pub virtual_size: u64,
    /// Transaction version.
    pub version: i64,
    /// Transaction lock time.
    pub lock_time: u32,
    /// Whether this is the block's coinbase transaction.
    pub is_coinbase: bool,
    /// Number of inputs.
    pub input_count: u64,
    /// Number of outputs.
    pub output_count: u64,
    /// Sum of spent output values, in satoshis. Zero for coinbase.
    pub input_value: u64,
    /// Sum of output values, in satoshis.
    pub output_value: u64,
    /// `input_value - output_value`, zero for coinbase.
    pub fee: u64,
}

/// A transaction input.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Input {
    /// The spending transaction.
    pub transaction_hash: TxHash,
    /// Hash of the block containing the spending transaction.
    pub block_hash: BlockHash,
    /// Position of the input inside the transaction.
    pub index: u32,
    /// The transaction whose output is spent. `None` for coinbase inputs.
    pub spent_transaction_hash: Option<TxHash>,
    /// The index of the spent output. `None` for coinbase inputs.
    pub spent_output_index: Option<u32>,
    /// Input sequence number.
    pub sequence: u32,
    /// Value of the spent output, in satoshis, when known.
    pub value: Option<u64>,
    /// Raw coinbase data, hex encoded.
    pub coinbase: Option<String>,
}

/// A transaction output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Output {
    /// The creating transaction.
    pub transaction_hash: TxHash,
    /// Hash of the block containing the creating transaction.
    pub block_hash: BlockHash,
    /// Position of the output inside the transaction.
    pub index: u32,
    /// Output value, in satoshis.
    pub value: u64,
    /// Locking script, hex encoded.
    pub script_pubkey: String,
    /// Script template reported by the node (`witness_v0_keyhash`, ...).
    pub script_type: Option<String>,
    /// Decoded address, when the script has one.
    pub address: Option<String>,
}

/// Everything the normalizer produces for a single block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedBlock {
    /// The block row.
    pub block: Block,
    /// Transaction rows, in block order.
    pub transactions: Vec<Transaction>,
    /// Input rows, grouped by transaction in block order.
    pub inputs: Vec<Input>,
    /// Output rows, grouped by transaction in block order.
    pub outputs: Vec<Output>,
}

impl NormalizedBlock {
    /// Wraps a block that was fetched without transaction detail.
    pub const fn header_only(block: Block) -> Self {
        Self { block, transactions: Vec::new(), inputs: Vec::new(), outputs: Vec::new() }
    }

    /// Returns the inputs belonging to `tx`.
    pub fn inputs_of(&self, tx: &TxHash) -> impl Iterator<Item = &Input> {
        self.inputs.iter().filter(move |input| &input.transaction_hash == tx)
    }

    /// Returns the outputs belonging to `tx`.
    pub fn outputs_of(&self, tx: &TxHash) -> impl Iterator<Item = &Output> {
        self.outputs.iter().filter(move |output| &output.transaction_hash == tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(height: u64, hash: u8, parent: u8) -> Block {
        Block {
            hash: B256::repeat_byte(hash),
            height,
            parent_hash: B256::repeat_byte(parent),
            timestamp: 1_700_000_000 + height * 600,
            size: 1_000,
            weight: 4_000,
            transaction_count: 1,
        }
    }

    #[test]
    fn test_extends_requires_hash_and_height() {
        let parent = block(10, 1, 0);
        assert!(block(11, 2, 1).extends(&parent.block_ref()));
        assert!(!block(12, 2, 1).extends(&parent.block_ref()));
        assert!(!block(11, 2, 3).extends(&parent.block_ref()));
    }

    #[test]
    fn test_block_id_display() {
        assert_eq!(BlockId::Height(800_000).to_string(), "height 800000");
        assert!(BlockId::Hash(B256::ZERO).to_string().starts_with("hash 0x"));
    }
}
