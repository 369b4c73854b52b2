//! Node RPC payload types.
//!
//! Mirrors the JSON returned by `getblock <hash> 2`: the block header fields
//! with every transaction decoded inline. Fields that the node omits on some
//! versions are optional; unknown fields are ignored.

use crate::amount::deserialize_sats;
use serde::{Deserialize, Serialize};

/// Full block from `getblock` at verbosity 2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub hash: String,
    pub height: u64,
    pub version: i64,
    pub merkleroot: String,
    /// Block timestamp (unix seconds).
    pub time: i64,
    #[serde(default)]
    pub mediantime: Option<i64>,
    pub nonce: u64,
    pub bits: String,
    pub difficulty: f64,
    #[serde(default)]
    pub chainwork: Option<String>,
    /// Transaction count as reported by the node.
    #[serde(rename = "nTx", default)]
    pub n_tx: Option<u64>,
    #[serde(default)]
    pub previousblockhash: Option<String>,
    #[serde(default)]
    pub nextblockhash: Option<String>,
    #[serde(default)]
    pub strippedsize: Option<u64>,
    pub size: u64,
    #[serde(default)]
    pub weight: Option<u64>,
    #[serde(default)]
    pub confirmations: Option<i64>,
    pub tx: Vec<TxPayload>,
}

/// Decoded transaction inside a verbosity-2 block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPayload {
    pub txid: String,
    /// Witness txid (`wtxid`).
    #[serde(default)]
    pub hash: Option<String>,
    pub version: i64,
    pub size: u64,
    #[serde(default)]
    pub vsize: Option<u64>,
    #[serde(default)]
    pub weight: Option<u64>,
    pub locktime: u64,
    pub vin: Vec<VinPayload>,
    pub vout: Vec<VoutPayload>,
}

/// Transaction input.
///
/// Coinbase inputs carry `coinbase` and no `txid`/`vout`; every other input
/// references a previous output and carries a `scriptSig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VinPayload {
    #[serde(default)]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: Option<String>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(rename = "scriptSig", default)]
    pub script_sig: Option<ScriptSig>,
    #[serde(default)]
    pub txinwitness: Vec<String>,
    pub sequence: u64,
}

impl VinPayload {
    /// Whether this is a coinbase input.
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }
}

/// Unlocking script of an input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptSig {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
}

/// Transaction output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoutPayload {
    /// Value in satoshis, converted from the node's decimal BTC.
    #[serde(deserialize_with = "deserialize_sats")]
    pub value: u64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

/// Locking script of an output.
///
/// Nodes since v22 report a single `address`; older nodes report an
/// `addresses` array. Both are accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptPubKey {
    #[serde(default)]
    pub asm: String,
    pub hex: String,
    #[serde(rename = "type", default)]
    pub script_type: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
}

impl ScriptPubKey {
    /// All addresses the node derived for this script, deduplicated, in
    /// the order the node reported them.
    pub fn all_addresses(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(self.addresses.len() + 1);
        for a in self.address.iter().chain(self.addresses.iter()) {
            if !out.contains(a) {
                out.push(a.clone());
            }
        }
        out
    }
}
