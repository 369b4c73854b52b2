//! Bitcoin node RPC client.
//!
//! Typed async methods for the node endpoints chainvault needs: chain tip,
//! block hashes by height, and full blocks.

use crate::client::{RpcClient, RpcConfig};
use crate::error::RpcError;
use chainvault_types::{is_hash_hex, BlockPayload};
use serde::Deserialize;
use serde_json::{json, Value};

// =============================================================================
// Response Types
// =============================================================================

/// `getblockchaininfo` response.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    #[serde(default)]
    pub headers: u64,
    pub bestblockhash: String,
    #[serde(default)]
    pub difficulty: f64,
    #[serde(default)]
    pub mediantime: i64,
    #[serde(default)]
    pub verificationprogress: f64,
    #[serde(default)]
    pub initialblockdownload: bool,
    #[serde(default)]
    pub chainwork: String,
    #[serde(default)]
    pub size_on_disk: u64,
    #[serde(default)]
    pub pruned: bool,
    /// Catch-all for additional fields.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// `getblock` verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Serialized block as hex.
    Raw = 0,
    /// Header fields plus transaction ids.
    Header = 1,
    /// Header fields plus fully decoded transactions.
    Full = 2,
}

// =============================================================================
// NodeRpc
// =============================================================================

/// Async RPC client for a Bitcoin node.
pub struct NodeRpc {
    client: RpcClient,
}

impl NodeRpc {
    /// Create a node RPC client connected to the given URL.
    pub fn new(url: &str) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::new(url)?,
        })
    }

    /// Create with full configuration.
    pub fn with_config(config: RpcConfig) -> Result<Self, RpcError> {
        Ok(Self {
            client: RpcClient::with_config(config)?,
        })
    }

    /// Get the underlying RPC client for custom calls.
    pub fn client(&self) -> &RpcClient {
        &self.client
    }

    // =========================================================================
    // Chain Information
    // =========================================================================

    /// Height of the node's best chain tip.
    pub async fn get_block_count(&self) -> Result<u64, RpcError> {
        let val = self.client.call("getblockcount", json!([])).await?;
        val.as_u64().ok_or_else(|| RpcError::Unexpected {
            context: "getblockcount".into(),
            detail: format!("expected an integer, got {}", val),
        })
    }

    /// Chain state summary.
    pub async fn get_blockchain_info(&self) -> Result<BlockchainInfo, RpcError> {
        let val = self.client.call("getblockchaininfo", json!([])).await?;
        serde_json::from_value(val).map_err(|e| RpcError::Decode {
            context: "getblockchaininfo".into(),
            source: e,
        })
    }

    /// Simple connectivity check.
    pub async fn is_connected(&self) -> bool {
        self.get_block_count().await.is_ok()
    }

    // =========================================================================
    // Block Operations
    // =========================================================================

    /// Hash of the block at `height` on the node's best chain.
    pub async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        let val = self.client.call("getblockhash", json!([height])).await?;
        let hash = val.as_str().ok_or_else(|| RpcError::Unexpected {
            context: format!("getblockhash({})", height),
            detail: "expected a string".into(),
        })?;
        if !is_hash_hex(hash) {
            return Err(RpcError::Unexpected {
                context: format!("getblockhash({})", height),
                detail: format!("not a block hash: {:?}", hash),
            });
        }
        Ok(hash.to_string())
    }

    /// Full block with decoded transactions (verbosity 2).
    pub async fn get_block(&self, hash: &str) -> Result<BlockPayload, RpcError> {
        let val = self.get_block_verbose(hash, Verbosity::Full).await?;
        serde_json::from_value(val).map_err(|e| RpcError::Decode {
            context: format!("getblock({})", short_hash(hash)),
            source: e,
        })
    }

    /// Block at an arbitrary verbosity, undecoded.
    pub async fn get_block_verbose(
        &self,
        hash: &str,
        verbosity: Verbosity,
    ) -> Result<Value, RpcError> {
        self.client
            .call("getblock", json!([hash, verbosity as u8]))
            .await
    }
}

/// First 16 characters of a hash, for log and error context.
pub fn short_hash(hash: &str) -> &str {
    hash.get(..16).unwrap_or(hash)
}
