//! Relational schema and migrations.
//!
//! Migrations are applied in order and tracked in `PRAGMA user_version`.
//! Never edit a released migration; append a new one.

use crate::error::StoreError;
use log::info;
use rusqlite::Connection;

// ─── Migrations ─────────────────────────────────────────────────────────────

const V1_INITIAL: &str = r#"
CREATE TABLE block (
  hash              TEXT PRIMARY KEY,
  height            INTEGER NOT NULL UNIQUE CHECK (height >= 0),
  version           INTEGER NOT NULL,
  timestamp         INTEGER NOT NULL,
  median_timestamp  INTEGER NOT NULL,
  nonce             INTEGER NOT NULL,
  bits              TEXT NOT NULL,
  difficulty        REAL NOT NULL,
  chainwork         TEXT NOT NULL,
  merkle_root       TEXT NOT NULL,
  previous_hash     TEXT REFERENCES block(hash),
  next_hash         TEXT,
  stripped_size     INTEGER NOT NULL,
  size              INTEGER NOT NULL,
  weight            INTEGER NOT NULL,
  transaction_count INTEGER NOT NULL,
  CHECK ((height = 0) = (previous_hash IS NULL))
);
CREATE INDEX idx_block_previous ON block(previous_hash);

CREATE TABLE "transaction" (
  block_hash        TEXT NOT NULL REFERENCES block(hash),
  position_in_block INTEGER NOT NULL,
  txid              TEXT NOT NULL,
  version           INTEGER NOT NULL,
  size              INTEGER NOT NULL,
  weight            INTEGER NOT NULL,
  locktime          INTEGER NOT NULL,
  PRIMARY KEY (block_hash, position_in_block)
);
CREATE INDEX idx_transaction_txid ON "transaction"(txid);

CREATE TABLE tx_input (
  block_hash    TEXT NOT NULL,
  tx_position   INTEGER NOT NULL,
  txid          TEXT NOT NULL,
  input_index   INTEGER NOT NULL,
  prevout_txid  TEXT,
  prevout_index INTEGER,
  script_sig    TEXT NOT NULL,
  sequence      INTEGER NOT NULL,
  witness       TEXT NOT NULL DEFAULT '[]',
  PRIMARY KEY (block_hash, tx_position, input_index),
  FOREIGN KEY (block_hash, tx_position)
    REFERENCES "transaction"(block_hash, position_in_block),
  CHECK ((prevout_txid IS NULL) = (prevout_index IS NULL))
);
CREATE INDEX idx_tx_input_prevout ON tx_input(prevout_txid, prevout_index);

CREATE TABLE tx_output (
  block_hash    TEXT NOT NULL,
  tx_position   INTEGER NOT NULL,
  txid          TEXT NOT NULL,
  output_index  INTEGER NOT NULL,
  value         INTEGER NOT NULL CHECK (value >= 0),
  script_type   TEXT,
  script_pubkey TEXT NOT NULL,
  addresses     TEXT NOT NULL DEFAULT '[]',
  PRIMARY KEY (block_hash, tx_position, output_index),
  FOREIGN KEY (block_hash, tx_position)
    REFERENCES "transaction"(block_hash, position_in_block)
);
CREATE INDEX idx_tx_output_txid ON tx_output(txid, output_index);

CREATE TABLE sync_state (
  id                 INTEGER PRIMARY KEY CHECK (id = 1),
  last_synced_height INTEGER,
  last_sync_time     INTEGER
);
INSERT INTO sync_state (id) VALUES (1);
"#;

const MIGRATIONS: &[&str] = &[V1_INITIAL];

/// Schema version this build writes.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Current `user_version` of the database.
pub fn version(conn: &Connection) -> Result<i64, rusqlite::Error> {
    conn.query_row("PRAGMA user_version", [], |r| r.get(0))
}

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    let found = version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    for (idx, ddl) in MIGRATIONS.iter().enumerate().skip(found as usize) {
        let target = idx as i64 + 1;
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(ddl)?;
        tx.execute_batch(&format!("PRAGMA user_version = {};", target))?;
        tx.commit()?;
        info!("database schema migrated to version {}", target);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_fresh_database() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert_eq!(version(&conn).unwrap(), SCHEMA_VERSION);

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap()
            .query_map([], |r| r.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            tables,
            vec!["block", "sync_state", "transaction", "tx_input", "tx_output"]
        );
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM sync_state", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_newer_schema_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(&format!("PRAGMA user_version = {};", SCHEMA_VERSION + 1))
            .unwrap();
        let err = migrate(&conn).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchema { .. }));
    }

    #[test]
    fn test_sync_state_is_single_row() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        assert!(conn
            .execute("INSERT INTO sync_state (id) VALUES (2)", [])
            .is_err());
    }
}
