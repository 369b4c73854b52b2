//! Normalized relational rows.
//!
//! One block payload decomposes into one [`BlockRow`] plus ordered
//! transaction, input, and output rows. Integer columns use `i64` because
//! that is SQLite's native integer type.

use serde::{Deserialize, Serialize};

/// Row of the `block` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRow {
    pub hash: String,
    pub height: i64,
    pub version: i64,
    pub timestamp: i64,
    pub median_timestamp: i64,
    pub nonce: i64,
    /// Compact difficulty target, hex encoded.
    pub bits: String,
    pub difficulty: f64,
    /// Cumulative chain work, hex encoded.
    pub chainwork: String,
    pub merkle_root: String,
    /// `None` only for the genesis block.
    pub previous_hash: Option<String>,
    /// `None` until the successor has been synced.
    pub next_hash: Option<String>,
    pub stripped_size: i64,
    pub size: i64,
    pub weight: i64,
    pub transaction_count: i64,
}

/// Row of the `transaction` table, owned by (`block_hash`, `position_in_block`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub block_hash: String,
    pub position_in_block: i64,
    pub txid: String,
    pub version: i64,
    pub size: i64,
    pub weight: i64,
    pub locktime: i64,
}

impl TransactionRow {
    /// The coinbase transaction is always at position 0.
    pub fn is_coinbase(&self) -> bool {
        self.position_in_block == 0
    }
}

/// Row of the `tx_input` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRow {
    pub block_hash: String,
    pub tx_position: i64,
    pub txid: String,
    pub input_index: i64,
    /// `None` for coinbase inputs.
    pub prevout_txid: Option<String>,
    /// `None` for coinbase inputs.
    pub prevout_index: Option<i64>,
    /// Raw unlocking script (coinbase data for coinbase inputs), hex encoded.
    pub script_sig: String,
    pub sequence: i64,
    /// Witness stack items, hex encoded. Stored as a JSON array.
    pub witness: Vec<String>,
}

impl InputRow {
    pub fn is_coinbase(&self) -> bool {
        self.prevout_txid.is_none()
    }
}

/// Row of the `tx_output` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub block_hash: String,
    pub tx_position: i64,
    pub txid: String,
    pub output_index: i64,
    /// Value in satoshis.
    pub value: i64,
    pub script_type: Option<String>,
    /// Raw locking script, hex encoded.
    pub script_pubkey: String,
    /// Stored as a JSON array.
    pub addresses: Vec<String>,
}

/// The single row of the `sync_state` table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_synced_height: Option<u64>,
    /// Unix seconds of the last commit.
    pub last_sync_time: Option<i64>,
}

/// Everything one block contributes to the store, in payload order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecomposedBlock {
    pub block: BlockRow,
    pub transactions: Vec<TransactionRow>,
    pub inputs: Vec<InputRow>,
    pub outputs: Vec<OutputRow>,
}

impl DecomposedBlock {
    pub fn height(&self) -> u64 {
        self.block.height as u64
    }

    pub fn hash(&self) -> &str {
        &self.block.hash
    }
}

/// Whether `s` looks like a 32-byte hash in hex (64 hex characters).
pub fn is_hash_hex(s: &str) -> bool {
    s.len() == 64 && hex::decode(s).is_ok()
}
