//! Block decomposition.
//!
//! Turns one verbose block payload into relational rows. Pure: no I/O, no
//! clock. Order of transactions, inputs, and outputs follows the payload.

use crate::error::{MalformedBlockError, MalformedKind};
use chainvault_types::{
    BlockPayload, BlockRow, DecomposedBlock, InputRow, OutputRow, TransactionRow, TxPayload,
};

/// Validate `payload` and split it into block, transaction, input, and
/// output rows.
pub fn decompose(payload: &BlockPayload) -> Result<DecomposedBlock, MalformedBlockError> {
    validate(payload)?;

    let block_hash = &payload.hash;
    let mut transactions = Vec::with_capacity(payload.tx.len());
    let mut inputs = Vec::new();
    let mut outputs = Vec::new();

    for (pos, tx) in payload.tx.iter().enumerate() {
        let pos = pos as i64;
        transactions.push(TransactionRow {
            block_hash: block_hash.clone(),
            position_in_block: pos,
            txid: tx.txid.clone(),
            version: tx.version,
            size: tx.size as i64,
            weight: tx_weight(tx) as i64,
            locktime: tx.locktime as i64,
        });

        for (idx, vin) in tx.vin.iter().enumerate() {
            let script_sig = match &vin.coinbase {
                Some(data) => data.clone(),
                None => vin
                    .script_sig
                    .as_ref()
                    .map(|s| s.hex.clone())
                    .unwrap_or_default(),
            };
            inputs.push(InputRow {
                block_hash: block_hash.clone(),
                tx_position: pos,
                txid: tx.txid.clone(),
                input_index: idx as i64,
                prevout_txid: vin.txid.clone(),
                prevout_index: vin.vout.map(i64::from),
                script_sig,
                sequence: vin.sequence as i64,
                witness: vin.txinwitness.clone(),
            });
        }

        for (idx, vout) in tx.vout.iter().enumerate() {
            outputs.push(OutputRow {
                block_hash: block_hash.clone(),
                tx_position: pos,
                txid: tx.txid.clone(),
                output_index: idx as i64,
                value: vout.value as i64,
                script_type: vout.script_pub_key.script_type.clone(),
                script_pubkey: vout.script_pub_key.hex.clone(),
                addresses: vout.script_pub_key.all_addresses(),
            });
        }
    }

    let block = BlockRow {
        hash: block_hash.clone(),
        height: payload.height as i64,
        version: payload.version,
        timestamp: payload.time,
        median_timestamp: payload.mediantime.unwrap_or(payload.time),
        nonce: payload.nonce as i64,
        bits: payload.bits.clone(),
        difficulty: payload.difficulty,
        chainwork: payload.chainwork.clone().unwrap_or_default(),
        merkle_root: payload.merkleroot.clone(),
        previous_hash: payload.previousblockhash.clone(),
        // Filled in once the successor is stored.
        next_hash: None,
        stripped_size: payload.strippedsize.unwrap_or(payload.size) as i64,
        size: payload.size as i64,
        weight: payload.weight.unwrap_or(payload.size * 4) as i64,
        transaction_count: payload.tx.len() as i64,
    };

    Ok(DecomposedBlock {
        block,
        transactions,
        inputs,
        outputs,
    })
}

/// Nodes that predate segwit omit `weight`; without witness data it is
/// four times the size.
fn tx_weight(tx: &TxPayload) -> u64 {
    tx.weight.unwrap_or(tx.size * 4)
}

fn validate(payload: &BlockPayload) -> Result<(), MalformedBlockError> {
    let fail = |kind| MalformedBlockError {
        hash: payload.hash.clone(),
        height: payload.height,
        kind,
    };

    match (payload.height, &payload.previousblockhash) {
        (0, Some(_)) => return Err(fail(MalformedKind::GenesisWithParent)),
        (h, None) if h > 0 => return Err(fail(MalformedKind::MissingPreviousHash)),
        _ => {}
    }

    if payload.tx.is_empty() {
        return Err(fail(MalformedKind::NoTransactions));
    }
    if let Some(declared) = payload.n_tx {
        if declared != payload.tx.len() as u64 {
            return Err(fail(MalformedKind::TransactionCountMismatch {
                declared,
                actual: payload.tx.len(),
            }));
        }
    }

    let coinbase = &payload.tx[0];
    if coinbase.vin.len() != 1 || !coinbase.vin[0].is_coinbase() {
        return Err(fail(MalformedKind::BadCoinbase));
    }

    for (pos, tx) in payload.tx.iter().enumerate() {
        if pos > 0 {
            for (idx, vin) in tx.vin.iter().enumerate() {
                if vin.is_coinbase() {
                    return Err(fail(MalformedKind::CoinbaseOutOfPlace { tx_position: pos }));
                }
                if vin.txid.is_none() || vin.vout.is_none() {
                    return Err(fail(MalformedKind::MissingPrevout {
                        tx_position: pos,
                        input_index: idx,
                    }));
                }
            }
        }
        if tx.vout.is_empty() {
            return Err(fail(MalformedKind::NoOutputs { tx_position: pos }));
        }
    }
    Ok(())
}
