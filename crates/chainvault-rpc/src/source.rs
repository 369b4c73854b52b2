//! The block source seam.
//!
//! The sync engine only needs three node calls. Abstracting them lets the
//! engine run against a node, a cache, or an in-memory fake.

use crate::error::RpcError;
use crate::node::NodeRpc;
use chainvault_types::BlockPayload;
use std::future::Future;
use std::sync::Arc;

/// Where blocks come from.
pub trait BlockSource: Send + Sync {
    /// Height of the source's chain tip.
    fn get_block_count(&self) -> impl Future<Output = Result<u64, RpcError>> + Send;

    /// Hash of the block at `height`.
    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<String, RpcError>> + Send;

    /// Full block with decoded transactions.
    fn get_block(&self, hash: &str) -> impl Future<Output = Result<BlockPayload, RpcError>> + Send;
}

impl BlockSource for NodeRpc {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        NodeRpc::get_block_count(self).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        NodeRpc::get_block_hash(self, height).await
    }

    async fn get_block(&self, hash: &str) -> Result<BlockPayload, RpcError> {
        NodeRpc::get_block(self, hash).await
    }
}

impl<T: BlockSource> BlockSource for Arc<T> {
    fn get_block_count(&self) -> impl Future<Output = Result<u64, RpcError>> + Send {
        T::get_block_count(self)
    }

    fn get_block_hash(&self, height: u64) -> impl Future<Output = Result<String, RpcError>> + Send {
        T::get_block_hash(self, height)
    }

    fn get_block(&self, hash: &str) -> impl Future<Output = Result<BlockPayload, RpcError>> + Send {
        T::get_block(self, hash)
    }
}
