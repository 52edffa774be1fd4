//! Column families and key encodings of the RocksDB schema.
//!
//! Integers are big-endian so that lexicographic key order equals numeric order.

use crate::StorageError;
use hotchain_primitives::{BlockHash, TxHash};

/// `hash -> Block`.
pub(crate) const CF_BLOCKS: &str = "blocks";
/// `height -> hash`.
pub(crate) const CF_HEIGHTS: &str = "heights";
/// `timestamp ‖ hash -> ()`.
pub(crate) const CF_TIMESTAMPS: &str = "timestamps";
/// `block hash ‖ txid -> StoredTransaction`.
pub(crate) const CF_TRANSACTIONS: &str = "transactions";
/// Singleton records.
pub(crate) const CF_META: &str = "meta";
/// `job id -> job header`, `job id ‖ chunk index -> ChunkProgress`.
pub(crate) const CF_JOBS: &str = "jobs";

/// Every column family of the schema.
pub(crate) const COLUMN_FAMILIES: [&str; 6] =
    [CF_BLOCKS, CF_HEIGHTS, CF_TIMESTAMPS, CF_TRANSACTIONS, CF_META, CF_JOBS];

pub(crate) const META_CURSOR: &[u8] = b"cursor";
pub(crate) const META_JOB_SEQ: &[u8] = b"job_seq";

pub(crate) const fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

pub(crate) fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let array: [u8; 8] = bytes
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| StorageError::Corrupted(format!("expected 8 bytes, got {}", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

pub(crate) fn decode_hash(bytes: &[u8]) -> Result<BlockHash, StorageError> {
    BlockHash::try_from(bytes)
        .map_err(|_| StorageError::Corrupted(format!("expected 32 byte hash, got {}", bytes.len())))
}

pub(crate) fn timestamp_key(timestamp: u64, hash: &BlockHash) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[..8].copy_from_slice(&timestamp.to_be_bytes());
    key[8..].copy_from_slice(hash.as_slice());
    key
}

/// Splits a timestamp index key into its timestamp and block hash.
pub(crate) fn split_timestamp_key(key: &[u8]) -> Result<(u64, BlockHash), StorageError> {
    if key.len() != 40 {
        return Err(StorageError::Corrupted(format!("timestamp key of {} bytes", key.len())));
    }
    Ok((decode_u64(&key[..8])?, decode_hash(&key[8..])?))
}

/// Transactions are deduplicated per block by txid. Rows sort by txid, not by
/// position in the block.
pub(crate) fn transaction_key(block: &BlockHash, txid: &TxHash) -> [u8; 64] {
    let mut key = [0u8; 64];
    key[..32].copy_from_slice(block.as_slice());
    key[32..].copy_from_slice(txid.as_slice());
    key
}

pub(crate) const fn job_key(job_id: u64) -> [u8; 8] {
    job_id.to_be_bytes()
}

pub(crate) fn chunk_key(job_id: u64, index: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&job_id.to_be_bytes());
    key[8..].copy_from_slice(&index.to_be_bytes());
    key
}
