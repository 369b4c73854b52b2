//! Core types for chainvault.
//!
//! This crate provides the types shared by every chainvault crate: the block
//! payloads served by a node's JSON-RPC interface, the normalized rows they
//! decompose into, and satoshi amount helpers.

pub mod amount;
pub mod payload;
pub mod rows;

pub use amount::{format_amount, parse_amount, AmountError, COIN, MAX_MONEY};
pub use payload::{BlockPayload, ScriptPubKey, ScriptSig, TxPayload, VinPayload, VoutPayload};
pub use rows::{
    is_hash_hex, BlockRow, DecomposedBlock, InputRow, OutputRow, SyncState, TransactionRow,
};
