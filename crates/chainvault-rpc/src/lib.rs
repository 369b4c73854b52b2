//! chainvault RPC client library.
//!
//! Provides an async HTTP client for a Bitcoin node's JSON-RPC interface,
//! the [`BlockSource`] seam the sync engine is written against, and a small
//! client for translating questions into SQL.
//!
//! # Example
//!
//! ```ignore
//! use chainvault_rpc::NodeRpc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let node = NodeRpc::new("http://127.0.0.1:8332").unwrap();
//!     let height = node.get_block_count().await.unwrap();
//!     println!("Height: {}", height);
//! }
//! ```

pub mod error;
pub mod client;
pub mod node;
pub mod source;
pub mod translate;

pub use client::{RpcClient, RpcConfig};
pub use error::RpcError;
pub use node::{BlockchainInfo, NodeRpc, Verbosity};
pub use source::BlockSource;
pub use translate::{ChatTranslator, SqlTranslator, TranslatorConfig};

/// Default RPC ports.
pub mod ports {
    pub const MAINNET: u16 = 8332;
    pub const TESTNET: u16 = 18332;
    pub const TESTNET4: u16 = 48332;
    pub const SIGNET: u16 = 38332;
    pub const REGTEST: u16 = 18443;
}
