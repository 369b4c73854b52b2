//! SQLite storage for chainvault.
//!
//! [`Store`] is the single writer used by the sync engine: it commits one
//! decomposed block per transaction together with the sync watermark.
//! [`QueryFacade`] opens the same database read-only for reporting and for
//! running untrusted, machine-generated SQL.

pub mod error;
pub mod query;
mod rows;
pub mod schema;
pub mod store;

pub use error::{QueryError, StoreError};
pub use query::{ChainSummary, ColumnInfo, QueryFacade, QueryResult, TableSchema, TransactionDetail};
pub use schema::SCHEMA_VERSION;
pub use store::{Store, StoreConfig};
