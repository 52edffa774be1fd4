//! Raw `getblock` payloads as returned by the node.
//!
//! Every field is optional so that a missing field surfaces as a normalization
//! failure naming the field, instead of an opaque decode error for the whole block.

use crate::{BlockHash, TxHash};
use serde::{Deserialize, Serialize};

/// Satoshis per bitcoin.
pub const COIN: u64 = 100_000_000;

/// Converts a BTC amount as reported over JSON-RPC to satoshis.
///
/// Returns `None` for negative, non-finite or out of range amounts.
pub fn btc_to_sats(btc: f64) -> Option<u64> {
    if !btc.is_finite() || btc < 0.0 {
        return None;
    }
    let sats = (btc * COIN as f64).round();
    (sats <= u64::MAX as f64).then_some(sats as u64)
}

/// A block as returned by `getblock` at verbosity 1 or 3.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBlock {
    /// Block hash.
    pub hash: Option<BlockHash>,
    /// Block height.
    pub height: Option<u64>,
    /// Parent hash. Absent for genesis.
    #[serde(rename = "previousblockhash")]
    pub previous_block_hash: Option<BlockHash>,
    /// Header time.
    pub time: Option<u64>,
    /// Serialized size.
    pub size: Option<u64>,
    /// Block weight.
    pub weight: Option<u64>,
    /// Number of transactions.
    #[serde(rename = "nTx")]
    pub tx_count: Option<u64>,
    /// Transactions: ids at verbosity 1, full objects at verbosity 3.
    #[serde(default)]
    pub tx: Vec<RawTransactionEntry>,
}

impl RawBlock {
    /// Returns `true` if the payload carries full transaction objects.
    pub fn has_transaction_detail(&self) -> bool {
        self.tx.iter().any(|entry| matches!(entry, RawTransactionEntry::Full(_)))
    }
}

/// One entry of the `tx` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawTransactionEntry {
    /// Transaction id only.
    Id(TxHash),
    /// Full transaction object.
    Full(Box<RawTransaction>),
}

/// A decoded transaction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Transaction id.
    pub txid: Option<TxHash>,
    /// Serialized size.
    pub size: Option<u64>,
    /// Virtual size.
    pub vsize: Option<u64>,
    /// Version.
    pub version: Option<i64>,
    /// Lock time.
    pub locktime: Option<u32>,
    /// Inputs.
    pub vin: Option<Vec<RawInput>>,
    /// Outputs.
    pub vout: Option<Vec<RawOutput>>,
    /// Fee in BTC, reported when undo data is available.
    pub fee: Option<f64>,
}

/// A transaction input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawInput {
    /// Coinbase data, present only on coinbase inputs.
    pub coinbase: Option<String>,
    /// The spent transaction.
    pub txid: Option<TxHash>,
    /// The spent output index.
    pub vout: Option<u32>,
    /// Sequence number.
    pub sequence: Option<u32>,
    /// The spent output, present at verbosity 3.
    pub prevout: Option<RawPrevout>,
}

impl RawInput {
    /// Returns `true` for a coinbase input.
    pub const fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }
}

/// The output spent by an input.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPrevout {
    /// Value in BTC.
    pub value: Option<f64>,
}

/// A transaction output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawOutput {
    /// Value in BTC.
    pub value: Option<f64>,
    /// Output index.
    pub n: Option<u32>,
    /// Locking script.
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: Option<RawScriptPubKey>,
}

/// A locking script.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawScriptPubKey {
    /// Script bytes, hex encoded.
    pub hex: Option<String>,
    /// Script template.
    #[serde(rename = "type")]
    pub kind: Option<String>,
    /// Decoded address.
    pub address: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0.0, Some(0))]
    #[case(50.0, Some(5_000_000_000))]
    #[case(0.00000001, Some(1))]
    #[case(0.1, Some(10_000_000))]
    #[case(-1.0, None)]
    #[case(f64::NAN, None)]
    fn test_btc_to_sats(#[case] btc: f64, #[case] expected: Option<u64>) {
        assert_eq!(btc_to_sats(btc), expected);
    }

    #[test]
    fn test_decode_verbosity_one() {
        let json = r#"{
            "hash": "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            "height": 800000,
            "previousblockhash": "00000000000000000001b7d9c6d1fbbb2a1e7da5e2cb2b8bdd6ae5dcad7de3b1",
            "time": 1690168629,
            "size": 1634818,
            "weight": 3993515,
            "nTx": 2,
            "tx": [
                "b75ca3106ed100521aa50e3ec267a06431c6319538898b25e1b757a5736f5fb4",
                "3c5b11e6c65d18e2a5a2a1e30f5f32d9a6c54e98ce0cd0dcd5fc9d7a4bdfb1f3"
            ]
        }"#;
        let block: RawBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.height, Some(800_000));
        assert_eq!(block.tx_count, Some(2));
        assert_eq!(block.tx.len(), 2);
        assert!(!block.has_transaction_detail());
    }

    #[test]
    fn test_decode_verbosity_three_with_prevout() {
        let json = r#"{
            "hash": "00000000000000000002a7c4c1e48d76c5a37902165a270156b7a8d72728a054",
            "height": 800000,
            "time": 1690168629,
            "tx": [{
                "txid": "3c5b11e6c65d18e2a5a2a1e30f5f32d9a6c54e98ce0cd0dcd5fc9d7a4bdfb1f3",
                "size": 222,
                "vsize": 141,
                "version": 2,
                "locktime": 0,
                "vin": [{
                    "txid": "b75ca3106ed100521aa50e3ec267a06431c6319538898b25e1b757a5736f5fb4",
                    "vout": 1,
                    "sequence": 4294967293,
                    "prevout": { "value": 0.0015 }
                }],
                "vout": [{
                    "value": 0.001,
                    "n": 0,
                    "scriptPubKey": { "hex": "0014ab", "type": "witness_v0_keyhash", "address": "bc1qtest" }
                }],
                "fee": 0.0005
            }]
        }"#;
        let block: RawBlock = serde_json::from_str(json).unwrap();
        assert!(block.has_transaction_detail());
        let RawTransactionEntry::Full(tx) = &block.tx[0] else { panic!("expected full tx") };
        let vin = tx.vin.as_ref().unwrap();
        assert_eq!(vin[0].prevout.as_ref().and_then(|p| p.value), Some(0.0015));
        assert!(block.previous_block_hash.is_none());
    }
}
