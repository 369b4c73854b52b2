// ─── Row Mapping Helpers ────────────────────────────────────────────────────

use chainvault_types::{BlockRow, InputRow, OutputRow, TransactionRow};
use rusqlite::types::Type;
use rusqlite::Row;

pub(crate) const BLOCK_COLUMNS: &str = "hash, height, version, timestamp, median_timestamp, \
     nonce, bits, difficulty, chainwork, merkle_root, previous_hash, next_hash, \
     stripped_size, size, weight, transaction_count";

pub(crate) const TX_COLUMNS: &str =
    "block_hash, position_in_block, txid, version, size, weight, locktime";

pub(crate) const INPUT_COLUMNS: &str = "block_hash, tx_position, txid, input_index, \
     prevout_txid, prevout_index, script_sig, sequence, witness";

pub(crate) const OUTPUT_COLUMNS: &str = "block_hash, tx_position, txid, output_index, \
     value, script_type, script_pubkey, addresses";

pub(crate) fn row_to_block(r: &Row<'_>) -> rusqlite::Result<BlockRow> {
    Ok(BlockRow {
        hash: r.get(0)?,
        height: r.get(1)?,
        version: r.get(2)?,
        timestamp: r.get(3)?,
        median_timestamp: r.get(4)?,
        nonce: r.get(5)?,
        bits: r.get(6)?,
        difficulty: r.get(7)?,
        chainwork: r.get(8)?,
        merkle_root: r.get(9)?,
        previous_hash: r.get(10)?,
        next_hash: r.get(11)?,
        stripped_size: r.get(12)?,
        size: r.get(13)?,
        weight: r.get(14)?,
        transaction_count: r.get(15)?,
    })
}

pub(crate) fn row_to_tx(r: &Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok(TransactionRow {
        block_hash: r.get(0)?,
        position_in_block: r.get(1)?,
        txid: r.get(2)?,
        version: r.get(3)?,
        size: r.get(4)?,
        weight: r.get(5)?,
        locktime: r.get(6)?,
    })
}

pub(crate) fn row_to_input(r: &Row<'_>) -> rusqlite::Result<InputRow> {
    Ok(InputRow {
        block_hash: r.get(0)?,
        tx_position: r.get(1)?,
        txid: r.get(2)?,
        input_index: r.get(3)?,
        prevout_txid: r.get(4)?,
        prevout_index: r.get(5)?,
        script_sig: r.get(6)?,
        sequence: r.get(7)?,
        witness: json_list(r, 8)?,
    })
}

pub(crate) fn row_to_output(r: &Row<'_>) -> rusqlite::Result<OutputRow> {
    Ok(OutputRow {
        block_hash: r.get(0)?,
        tx_position: r.get(1)?,
        txid: r.get(2)?,
        output_index: r.get(3)?,
        value: r.get(4)?,
        script_type: r.get(5)?,
        script_pubkey: r.get(6)?,
        addresses: json_list(r, 7)?,
    })
}

/// A TEXT column holding a JSON array of strings.
fn json_list(r: &Row<'_>, idx: usize) -> rusqlite::Result<Vec<String>> {
    let text: String = r.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}
