//! chainvault sync engine.
//!
//! Mirrors a Bitcoin node's best chain into the relational store:
//!
//! - [`decompose`] validates a verbose block payload and splits it into rows
//! - [`SyncEngine`] walks heights in ascending order, committing one block
//!   per store transaction and retrying transient failures with backoff
//!
//! # Example
//!
//! ```ignore
//! use chainvault_rpc::NodeRpc;
//! use chainvault_store::{Store, StoreConfig};
//! use chainvault_sync::{SyncConfig, SyncEngine};
//!
//! let node = NodeRpc::new("http://127.0.0.1:8332")?;
//! let store = Store::open("chain.db", &StoreConfig::default())?;
//! let (_stop, shutdown) = tokio::sync::watch::channel(false);
//! let mut engine = SyncEngine::new(node, store, SyncConfig::default())?;
//! engine.run(shutdown).await?;
//! ```

pub mod config;
pub mod decompose;
pub mod engine;
pub mod error;

pub use config::SyncConfig;
pub use decompose::decompose;
pub use engine::{EngineState, PassOutcome, SyncEngine, SyncEvent};
pub use error::{MalformedBlockError, MalformedKind, SyncError};
