//! Sync error types.

use chainvault_rpc::RpcError;
use chainvault_store::StoreError;
use std::fmt;
use thiserror::Error;

/// What is structurally wrong with a block payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MalformedKind {
    NoTransactions,
    TransactionCountMismatch { declared: u64, actual: usize },
    /// The first transaction must have exactly one input, a coinbase.
    BadCoinbase,
    CoinbaseOutOfPlace { tx_position: usize },
    MissingPrevout { tx_position: usize, input_index: usize },
    NoOutputs { tx_position: usize },
    MissingPreviousHash,
    GenesisWithParent,
    /// The node answered for a different block than the one requested.
    HashMismatch { requested: String },
    HeightMismatch { requested: u64 },
    /// The payload could not be decoded at all.
    Undecodable(String),
}

impl fmt::Display for MalformedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTransactions => write!(f, "block has no transactions"),
            Self::TransactionCountMismatch { declared, actual } => write!(
                f,
                "header declares {} transactions, payload has {}",
                declared, actual
            ),
            Self::BadCoinbase => {
                write!(f, "first transaction does not have exactly one coinbase input")
            }
            Self::CoinbaseOutOfPlace { tx_position } => {
                write!(f, "coinbase input in transaction {}", tx_position)
            }
            Self::MissingPrevout {
                tx_position,
                input_index,
            } => write!(
                f,
                "input {} of transaction {} has no previous output",
                input_index, tx_position
            ),
            Self::NoOutputs { tx_position } => {
                write!(f, "transaction {} has no outputs", tx_position)
            }
            Self::MissingPreviousHash => write!(f, "missing previous block hash"),
            Self::GenesisWithParent => write!(f, "height 0 block names a previous block"),
            Self::HashMismatch { requested } => {
                write!(f, "node returned a different block than {}", requested)
            }
            Self::HeightMismatch { requested } => {
                write!(f, "node returned a block for a height other than {}", requested)
            }
            Self::Undecodable(detail) => write!(f, "payload does not decode: {}", detail),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("malformed block {hash} at height {height}: {kind}")]
pub struct MalformedBlockError {
    pub hash: String,
    pub height: u64,
    pub kind: MalformedKind,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transient fetch failure: {0}")]
    TransientFetch(#[source] RpcError),

    #[error("block at height {height} is not available from the node")]
    NotFound { height: u64 },

    #[error(transparent)]
    Malformed(#[from] MalformedBlockError),

    #[error("store constraint violated: {0}")]
    StoreConstraint(#[source] StoreError),

    #[error("store error: {0}")]
    Store(#[source] StoreError),

    #[error("node client error: {0}")]
    Client(#[source] RpcError),
}

impl SyncError {
    /// Classify a node error raised while working on `height`.
    pub fn from_rpc(err: RpcError, height: u64) -> Self {
        if err.is_transient() {
            Self::TransientFetch(err)
        } else if err.is_not_found() {
            Self::NotFound { height }
        } else if let RpcError::Decode { source, .. } = &err {
            Self::Malformed(MalformedBlockError {
                hash: String::new(),
                height,
                kind: MalformedKind::Undecodable(source.to_string()),
            })
        } else {
            Self::Client(err)
        }
    }

    /// Fatal errors stop the engine; the rest are retried after a backoff.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Malformed(_) | Self::StoreConstraint(_) | Self::Client(_)
        )
    }

    /// Short name for logs and progress events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientFetch(_) => "transient-fetch",
            Self::NotFound { .. } => "not-found",
            Self::Malformed(_) => "malformed-block",
            Self::StoreConstraint(_) => "store-constraint",
            Self::Store(_) => "store",
            Self::Client(_) => "client",
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        if err.is_retryable() {
            Self::Store(err)
        } else {
            Self::StoreConstraint(err)
        }
    }
}
