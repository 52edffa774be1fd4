//! Conversion of raw node payloads into canonical entities.

use hotchain_primitives::{
    Block, BlockHash, Input, NormalizedBlock, Output, RawBlock, RawInput, RawOutput,
    RawTransaction, RawTransactionEntry, Transaction, TxHash, btc_to_sats,
};
use thiserror::Error;

/// A payload that cannot be turned into canonical entities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NormalizeError {
    /// A required field is absent.
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    /// A field is present but its value is unusable.
    #[error("invalid `{field}`: {reason}")]
    InvalidValue {
        /// The field.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// The transaction spends less than it creates.
    #[error("negative fee in transaction {0}")]
    NegativeFee(TxHash),
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, NormalizeError> {
    value.ok_or(NormalizeError::MissingField(field))
}

fn sats(btc: f64, field: &'static str) -> Result<u64, NormalizeError> {
    btc_to_sats(btc).ok_or_else(|| NormalizeError::InvalidValue {
        field,
        reason: format!("{btc} is not a valid amount"),
    })
}

fn index(position: usize, field: &'static str) -> Result<u32, NormalizeError> {
    u32::try_from(position).map_err(|_| NormalizeError::InvalidValue {
        field,
        reason: format!("{position} overflows"),
    })
}

/// Normalizes a `getblock` payload.
///
/// Payloads carrying only transaction ids yield a header-only block whose
/// `transaction_count` comes from `nTx`.
pub fn normalize(raw: RawBlock) -> Result<NormalizedBlock, NormalizeError> {
    let hash = required(raw.hash, "hash")?;
    let height = required(raw.height, "height")?;
    let parent_hash = match (raw.previous_block_hash, height) {
        (Some(parent), _) => parent,
        (None, 0) => BlockHash::ZERO,
        (None, _) => return Err(NormalizeError::MissingField("previousblockhash")),
    };
    let block = Block {
        hash,
        height,
        parent_hash,
        timestamp: required(raw.time, "time")?,
        size: required(raw.size, "size")?,
        weight: required(raw.weight, "weight")?,
        transaction_count: required(raw.tx_count, "nTx")?,
    };

    if !raw.tx.is_empty() && raw.tx.len() as u64 != block.transaction_count {
        return Err(NormalizeError::InvalidValue {
            field: "nTx",
            reason: format!("{} reported, {} listed", block.transaction_count, raw.tx.len()),
        });
    }
    if !raw.has_transaction_detail() {
        return Ok(NormalizedBlock::header_only(block));
    }

    let mut normalized = NormalizedBlock::header_only(block);
    for (position, entry) in raw.tx.into_iter().enumerate() {
        let RawTransactionEntry::Full(tx) = entry else {
            return Err(NormalizeError::InvalidValue {
                field: "tx",
                reason: "mixes transaction ids and transaction objects".into(),
            });
        };
        normalize_transaction(&mut normalized, *tx, index(position, "tx")?)?;
    }
    Ok(normalized)
}

fn normalize_transaction(
    normalized: &mut NormalizedBlock,
    tx: RawTransaction,
    position: u32,
) -> Result<(), NormalizeError> {
    let block = &normalized.block;
    let txid = required(tx.txid, "txid")?;
    let vin = required(tx.vin, "vin")?;
    let vout = required(tx.vout, "vout")?;
    let is_coinbase = vin.first().is_some_and(RawInput::is_coinbase);

    let mut inputs = Vec::with_capacity(vin.len());
    for (n, input) in vin.into_iter().enumerate() {
        inputs.push(normalize_input(block.hash, txid, index(n, "vin")?, input)?);
    }
    let mut outputs = Vec::with_capacity(vout.len());
    for output in vout {
        outputs.push(normalize_output(block.hash, txid, output)?);
    }

    let output_value = outputs.iter().try_fold(0u64, |sum, o| sum.checked_add(o.value)).ok_or(
        NormalizeError::InvalidValue { field: "vout.value", reason: "sum overflows".into() },
    )?;
    let (input_value, fee) = if is_coinbase {
        (0, 0)
    } else {
        match inputs.iter().map(|i| i.value).sum::<Option<u64>>() {
            Some(input_value) => {
                let fee = input_value
                    .checked_sub(output_value)
                    .ok_or(NormalizeError::NegativeFee(txid))?;
                (input_value, fee)
            }
            // Prevouts are unavailable without undo data; the node still reports the fee.
            None => {
                let fee = required(tx.fee, "vin.prevout")?;
                if fee < 0.0 {
                    return Err(NormalizeError::NegativeFee(txid));
                }
                let fee = sats(fee, "fee")?;
                (output_value.saturating_add(fee), fee)
            }
        }
    };

    normalized.transactions.push(Transaction {
        hash: txid,
        block_hash: block.hash,
        block_height: block.height,
        block_timestamp: block.timestamp,
        index: position,
        size: required(tx.size, "size")?,
        virtual_size: required(tx.vsize, "vsize")?,
        version: required(tx.version, "version")?,
        lock_time: required(tx.locktime, "locktime")?,
        is_coinbase,
        input_count: inputs.len() as u64,
        output_count: outputs.len() as u64,
        input_value,
        output_value,
        fee,
    });
    normalized.inputs.extend(inputs);
    normalized.outputs.extend(outputs);
    Ok(())
}

fn normalize_input(
    block_hash: BlockHash,
    txid: TxHash,
    index: u32,
    input: RawInput,
) -> Result<Input, NormalizeError> {
    let sequence = required(input.sequence, "vin.sequence")?;
    if input.is_coinbase() {
        return Ok(Input {
            transaction_hash: txid,
            block_hash,
            index,
            spent_transaction_hash: None,
            spent_output_index: None,
            sequence,
            value: None,
            coinbase: input.coinbase,
        });
    }

    let value = match input.prevout.and_then(|prevout| prevout.value) {
        Some(btc) => Some(sats(btc, "vin.prevout.value")?),
        None => None,
    };
    Ok(Input {
        transaction_hash: txid,
        block_hash,
        index,
        spent_transaction_hash: Some(required(input.txid, "vin.txid")?),
        spent_output_index: Some(required(input.vout, "vin.vout")?),
        sequence,
        value,
        coinbase: None,
    })
}

fn normalize_output(
    block_hash: BlockHash,
    txid: TxHash,
    output: RawOutput,
) -> Result<Output, NormalizeError> {
    let script = required(output.script_pub_key, "vout.scriptPubKey")?;
    Ok(Output {
        transaction_hash: txid,
        block_hash,
        index: required(output.n, "vout.n")?,
        value: sats(required(output.value, "vout.value")?, "vout.value")?,
        script_pubkey: required(script.hex, "vout.scriptPubKey.hex")?,
        script_type: script.kind,
        address: script.address,
    })
}
