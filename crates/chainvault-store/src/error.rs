//! Storage error types.

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode {context}: {source}")]
    Encode {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("database schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: i64, supported: i64 },

    #[error("commit height {requested} does not match block height {block}")]
    HeightMismatch { requested: u64, block: u64 },

    #[error("height {height} already holds block {existing}, refusing {incoming}")]
    ConflictingBlock {
        height: u64,
        existing: String,
        incoming: String,
    },

    #[error("block {hash} at height {height} does not extend the stored chain: {reason}")]
    ChainLink {
        height: u64,
        hash: String,
        reason: String,
    },
}

impl StoreError {
    /// Data-integrity failures: SQLite constraint errors, a block that does
    /// not link to its stored parent, or a height that already holds a
    /// different block. Retrying cannot help.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Sqlite(e) => e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation),
            Self::HeightMismatch { .. } | Self::ConflictingBlock { .. } | Self::ChainLink { .. } => {
                true
            }
            _ => false,
        }
    }

    /// Busy, locked, I/O and other operational failures that may succeed
    /// on a later attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(_) => !self.is_constraint_violation(),
            _ => false,
        }
    }
}

/// Errors from the read-only query layer.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("empty statement")]
    Empty,

    #[error("only read-only statements may be executed")]
    NotReadOnly,
}
