//! Read-only query layer.
//!
//! Opens the database with `SQLITE_OPEN_READ_ONLY` and `query_only`, so
//! nothing executed here can modify it, including SQL produced by a
//! translation model. Report queries for the CLI live here too.

use crate::error::QueryError;
use crate::rows::{
    row_to_block, row_to_input, row_to_output, row_to_tx, BLOCK_COLUMNS, INPUT_COLUMNS,
    OUTPUT_COLUMNS, TX_COLUMNS,
};
use chainvault_types::{BlockRow, InputRow, OutputRow, TransactionRow};
use log::debug;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

// ─── Result Types ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub name: String,
    /// The `CREATE TABLE` statement as stored in `sqlite_master`.
    pub sql: String,
    pub columns: Vec<ColumnInfo>,
}

/// Rows of an ad-hoc statement, values already converted to JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// More rows were available than the limit allowed.
    pub truncated: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChainSummary {
    pub total_blocks: u64,
    pub total_transactions: u64,
    pub latest_height: Option<u64>,
    pub latest_hash: Option<String>,
    pub latest_block_time: Option<i64>,
    pub latest_difficulty: Option<f64>,
    pub last_synced_height: Option<u64>,
    pub last_sync_time: Option<i64>,
}

/// A transaction with its inputs and outputs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionDetail {
    pub block_height: u64,
    pub transaction: TransactionRow,
    pub inputs: Vec<InputRow>,
    pub outputs: Vec<OutputRow>,
}

impl TransactionDetail {
    /// Sum of output values, in satoshis.
    pub fn total_output_value(&self) -> i64 {
        self.outputs.iter().map(|o| o.value).sum()
    }
}

// ─── QueryFacade ────────────────────────────────────────────────────────────

pub struct QueryFacade {
    conn: Connection,
}

impl QueryFacade {
    /// Open an existing database read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, QueryError> {
        let conn = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA query_only = ON;")?;
        Ok(QueryFacade { conn })
    }

    // ── Schema ──────────────────────────────────────────────────────────

    /// User tables with their columns, ordered by name.
    pub fn schema(&self) -> Result<Vec<TableSchema>, QueryError> {
        let tables: Vec<(String, String)> = self
            .conn
            .prepare(
                "SELECT name, sql FROM sqlite_master
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )?
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let mut out = Vec::with_capacity(tables.len());
        let mut cols = self
            .conn
            .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;
        for (name, sql) in tables {
            let columns = cols
                .query_map(params![name], |r| {
                    Ok(ColumnInfo {
                        name: r.get(0)?,
                        decl_type: r.get(1)?,
                        not_null: r.get::<_, i64>(2)? != 0,
                        primary_key: r.get::<_, i64>(3)? != 0,
                    })
                })?
                .collect::<Result<_, _>>()?;
            out.push(TableSchema { name, sql, columns });
        }
        Ok(out)
    }

    /// All `CREATE TABLE` statements, for handing to a translator.
    pub fn schema_sql(&self) -> Result<String, QueryError> {
        Ok(self
            .schema()?
            .into_iter()
            .map(|t| format!("{};", t.sql))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    // ── Ad-hoc SQL ──────────────────────────────────────────────────────

    /// Run one read-only statement, returning at most `limit` rows.
    pub fn execute(&self, sql: &str, limit: usize) -> Result<QueryResult, QueryError> {
        let sql = sql.trim().trim_end_matches(';').trim();
        if sql.is_empty() {
            return Err(QueryError::Empty);
        }
        debug!("executing: {}", sql);

        let mut stmt = self.conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(QueryError::NotReadOnly);
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let width = columns.len();

        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        let mut truncated = false;
        while let Some(row) = rows.next()? {
            if out.len() >= limit {
                truncated = true;
                break;
            }
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(to_json(row.get_ref(i)?));
            }
            out.push(values);
        }

        Ok(QueryResult {
            columns,
            rows: out,
            truncated,
        })
    }

    // ── Reports ─────────────────────────────────────────────────────────

    pub fn chain_summary(&self) -> Result<ChainSummary, QueryError> {
        let total_blocks: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM block", [], |r| r.get(0))?;
        let total_transactions: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM \"transaction\"", [], |r| r.get(0))?;

        let latest = self
            .conn
            .query_row(
                "SELECT height, hash, timestamp, difficulty FROM block
                 ORDER BY height DESC LIMIT 1",
                [],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, i64>(2)?,
                        r.get::<_, f64>(3)?,
                    ))
                },
            )
            .optional()?;

        let (synced, sync_time): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT last_synced_height, last_sync_time FROM sync_state WHERE id = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        Ok(ChainSummary {
            total_blocks: total_blocks as u64,
            total_transactions: total_transactions as u64,
            latest_height: latest.as_ref().map(|l| l.0 as u64),
            latest_hash: latest.as_ref().map(|l| l.1.clone()),
            latest_block_time: latest.as_ref().map(|l| l.2),
            latest_difficulty: latest.as_ref().map(|l| l.3),
            last_synced_height: synced.map(|h| h as u64),
            last_sync_time: sync_time,
        })
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<BlockRow>, QueryError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM block WHERE height = ?1", BLOCK_COLUMNS),
                params![height as i64],
                row_to_block,
            )
            .optional()?)
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRow>, QueryError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM block WHERE hash = ?1", BLOCK_COLUMNS),
                params![hash],
                row_to_block,
            )
            .optional()?)
    }

    /// Every stored transaction with this txid, lowest height first.
    ///
    /// Usually one; the historical duplicate coinbase txids yield two.
    pub fn transaction_by_txid(&self, txid: &str) -> Result<Vec<TransactionDetail>, QueryError> {
        let keys: Vec<(String, i64)> = self
            .conn
            .prepare(
                "SELECT t.block_hash, t.position_in_block FROM \"transaction\" t
                 JOIN block b ON b.hash = t.block_hash
                 WHERE t.txid = ?1 ORDER BY b.height",
            )?
            .query_map(params![txid], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<Result<_, _>>()?;

        let mut out = Vec::with_capacity(keys.len());
        for (block_hash, position) in keys {
            if let Some(detail) = self.transaction_at(&block_hash, position as u64)? {
                out.push(detail);
            }
        }
        Ok(out)
    }

    /// The transaction at `position` within a block.
    pub fn transaction_at(
        &self,
        block_hash: &str,
        position: u64,
    ) -> Result<Option<TransactionDetail>, QueryError> {
        let position = position as i64;
        let found = self
            .conn
            .query_row(
                &format!(
                    "SELECT b.height, {} FROM \"transaction\" t
                     JOIN block b ON b.hash = t.block_hash
                     WHERE t.block_hash = ?1 AND t.position_in_block = ?2",
                    prefixed(TX_COLUMNS, "t")
                ),
                params![block_hash, position],
                |r| {
                    let height: i64 = r.get(0)?;
                    let tx = TransactionRow {
                        block_hash: r.get(1)?,
                        position_in_block: r.get(2)?,
                        txid: r.get(3)?,
                        version: r.get(4)?,
                        size: r.get(5)?,
                        weight: r.get(6)?,
                        locktime: r.get(7)?,
                    };
                    Ok((height as u64, tx))
                },
            )
            .optional()?;
        let (block_height, transaction) = match found {
            Some(f) => f,
            None => return Ok(None),
        };

        let inputs = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM tx_input WHERE block_hash = ?1 AND tx_position = ?2
                 ORDER BY input_index",
                INPUT_COLUMNS
            ))?
            .query_map(params![block_hash, position], row_to_input)?
            .collect::<Result<_, _>>()?;

        let outputs = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM tx_output WHERE block_hash = ?1 AND tx_position = ?2
                 ORDER BY output_index",
                OUTPUT_COLUMNS
            ))?
            .query_map(params![block_hash, position], row_to_output)?
            .collect::<Result<_, _>>()?;

        Ok(Some(TransactionDetail {
            block_height,
            transaction,
            inputs,
            outputs,
        }))
    }

    /// Transactions of one block in block order, without inputs/outputs.
    pub fn block_transactions(&self, block_hash: &str) -> Result<Vec<TransactionRow>, QueryError> {
        Ok(self
            .conn
            .prepare(&format!(
                "SELECT {} FROM \"transaction\" WHERE block_hash = ?1 ORDER BY position_in_block",
                TX_COLUMNS
            ))?
            .query_map(params![block_hash], row_to_tx)?
            .collect::<Result<_, _>>()?)
    }
}

fn prefixed(columns: &str, alias: &str) -> String {
    columns
        .split(',')
        .map(|c| format!("{}.{}", alias, c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(hex::encode(b)),
    }
}
