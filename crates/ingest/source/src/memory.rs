//! A scriptable in-memory [`ChainSource`].

use crate::{ChainSource, SourceError};
use alloy_primitives::B256;
use async_trait::async_trait;
use hotchain_primitives::{
    BlockHash, BlockId, RawBlock, RawInput, RawOutput, RawPrevout, RawScriptPubKey,
    RawTransaction, RawTransactionEntry, TxHash,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

/// Builds a deterministic block hash for `height` on `branch`.
pub fn synthetic_hash(branch: u8, height: u64) -> BlockHash {
    let mut bytes = [0u8; 32];
    bytes[0] = branch;
    bytes[24..].copy_from_slice(&height.to_be_bytes());
    B256::from(bytes)
}

fn synthetic_txid(block: BlockHash, index: u8) -> TxHash {
    let mut bytes = block.0;
    bytes[1] = 0xff;
    bytes[2] = index;
    B256::from(bytes)
}

#[derive(Debug, Default)]
struct MemoryChain {
    /// Active chain, indexed by height.
    active: Vec<BlockHash>,
    /// Every block ever mined, including the ones orphaned by a fork.
    blocks: HashMap<BlockHash, RawBlock>,
    next_branch: u8,
    first_timestamp: u64,
    spacing: u64,
    outages: usize,
    malformed: HashSet<u64>,
    calls: usize,
}

impl MemoryChain {
    fn mine(&mut self, branch: u8, timestamp: Option<u64>) -> BlockHash {
        let height = self.active.len() as u64;
        let hash = synthetic_hash(branch, height);
        let parent = self.active.last().copied();
        let time = timestamp.unwrap_or(self.first_timestamp + height * self.spacing);
        self.blocks.insert(
            hash,
            RawBlock {
                hash: Some(hash),
                height: Some(height),
                previous_block_hash: parent,
                time: Some(time),
                size: Some(1_000 + height),
                weight: Some(4_000 + height),
                tx_count: Some(2),
                tx: Vec::new(),
            },
        );
        self.active.push(hash);
        hash
    }

    fn check_outage(&mut self) -> Result<(), SourceError> {
        self.calls += 1;
        if self.outages > 0 {
            self.outages -= 1;
            return Err(SourceError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

/// An in-memory chain that serves synthetic blocks.
///
/// Every block carries a coinbase and one payment transaction paying a fee of
/// 50_000 sats. Forks keep the orphaned blocks reachable by hash, as a node does.
#[derive(Debug, Clone)]
pub struct MemoryChainSource {
    inner: Arc<Mutex<MemoryChain>>,
}

impl Default for MemoryChainSource {
    fn default() -> Self {
        Self::new(1_231_006_505, 600)
    }
}

impl MemoryChainSource {
    /// Creates an empty chain whose block at height `h` is timestamped
    /// `first_timestamp + h * spacing`.
    pub fn new(first_timestamp: u64, spacing: u64) -> Self {
        let chain = MemoryChain { first_timestamp, spacing, next_branch: 1, ..Default::default() };
        Self { inner: Arc::new(Mutex::new(chain)) }
    }

    /// Creates a chain with blocks `0..count`.
    pub fn with_blocks(first_timestamp: u64, spacing: u64, count: u64) -> Self {
        let source = Self::new(first_timestamp, spacing);
        source.mine(count);
        source
    }

    fn chain(&self) -> MutexGuard<'_, MemoryChain> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Appends `count` blocks on the active chain and returns their hashes.
    pub fn mine(&self, count: u64) -> Vec<BlockHash> {
        let mut chain = self.chain();
        let branch = chain.active.last().map(|hash| hash.0[0]).unwrap_or_default();
        (0..count).map(|_| chain.mine(branch, None)).collect()
    }

    /// Appends one block with an explicit timestamp.
    pub fn mine_at(&self, timestamp: u64) -> BlockHash {
        let mut chain = self.chain();
        let branch = chain.active.last().map(|hash| hash.0[0]).unwrap_or_default();
        chain.mine(branch, Some(timestamp))
    }

    /// Replaces every block above `ancestor` with `count` blocks of a new branch.
    pub fn fork(&self, ancestor: u64, count: u64) -> Vec<BlockHash> {
        let mut chain = self.chain();
        chain.active.truncate(ancestor as usize + 1);
        let branch = chain.next_branch;
        chain.next_branch += 1;
        (0..count).map(|_| chain.mine(branch, None)).collect()
    }

    /// Makes the next `calls` requests fail with [`SourceError::Unavailable`].
    pub fn fail_next(&self, calls: usize) {
        self.chain().outages = calls;
    }

    /// Serves the block at `height` without its header time.
    pub fn corrupt(&self, height: u64) {
        self.chain().malformed.insert(height);
    }

    /// Undoes [`Self::corrupt`].
    pub fn repair(&self, height: u64) {
        self.chain().malformed.remove(&height);
    }

    /// Number of requests served so far, failed ones included.
    pub fn calls(&self) -> usize {
        self.chain().calls
    }

    /// Hash of the active block at `height`.
    pub fn hash_at(&self, height: u64) -> Option<BlockHash> {
        self.chain().active.get(height as usize).copied()
    }

    /// Height of the active tip.
    pub fn tip(&self) -> Option<u64> {
        self.chain().active.len().checked_sub(1).map(|tip| tip as u64)
    }
}

fn with_transactions(mut block: RawBlock) -> RawBlock {
    let Some(hash) = block.hash else { return block };
    let coinbase = synthetic_txid(hash, 0);
    let payment = synthetic_txid(hash, 1);
    let output = |value: f64, n: u32| RawOutput {
        value: Some(value),
        n: Some(n),
        script_pub_key: Some(RawScriptPubKey {
            hex: Some("0014751e76e8199196d454941c45d1b3a323f1433bd6".into()),
            kind: Some("witness_v0_keyhash".into()),
            address: Some("bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4".into()),
        }),
    };

    block.tx = vec![
        RawTransactionEntry::Full(Box::new(RawTransaction {
            txid: Some(coinbase),
            size: Some(120),
            vsize: Some(93),
            version: Some(1),
            locktime: Some(0),
            vin: Some(vec![RawInput {
                coinbase: Some("03a0bb0d".into()),
                sequence: Some(u32::MAX),
                ..Default::default()
            }]),
            vout: Some(vec![output(3.125, 0)]),
            fee: None,
        })),
        RawTransactionEntry::Full(Box::new(RawTransaction {
            txid: Some(payment),
            size: Some(222),
            vsize: Some(141),
            version: Some(2),
            locktime: Some(0),
            vin: Some(vec![RawInput {
                txid: Some(coinbase),
                vout: Some(0),
                sequence: Some(u32::MAX - 2),
                prevout: Some(RawPrevout { value: Some(0.0015) }),
                ..Default::default()
            }]),
            vout: Some(vec![output(0.001, 0)]),
            fee: Some(0.0005),
        })),
    ];
    block
}

#[async_trait]
impl ChainSource for MemoryChainSource {
    async fn tip_height(&self) -> Result<u64, SourceError> {
        let mut chain = self.chain();
        chain.check_outage()?;
        chain
            .active
            .len()
            .checked_sub(1)
            .map(|tip| tip as u64)
            .ok_or_else(|| SourceError::Unavailable("node has no blocks".into()))
    }

    async fn block_hash(&self, height: u64) -> Result<BlockHash, SourceError> {
        let mut chain = self.chain();
        chain.check_outage()?;
        chain
            .active
            .get(height as usize)
            .copied()
            .ok_or(SourceError::NotFound(BlockId::Height(height)))
    }

    async fn block_at(
        &self,
        id: BlockId,
        include_transactions: bool,
    ) -> Result<RawBlock, SourceError> {
        let mut chain = self.chain();
        chain.check_outage()?;
        let hash = match id {
            BlockId::Hash(hash) => hash,
            BlockId::Height(height) => chain
                .active
                .get(height as usize)
                .copied()
                .ok_or(SourceError::NotFound(id))?,
        };
        let mut block = chain.blocks.get(&hash).cloned().ok_or(SourceError::NotFound(id))?;
        if block.height.is_some_and(|height| chain.malformed.contains(&height)) {
            block.time = None;
        }
        if include_transactions {
            block = with_transactions(block);
        } else {
            block.tx = vec![
                RawTransactionEntry::Id(synthetic_txid(hash, 0)),
                RawTransactionEntry::Id(synthetic_txid(hash, 1)),
            ];
        }
        Ok(block)
    }
}
