//! Block store.
//!
//! One SQLite connection in WAL mode. Every synced height lands in exactly
//! one transaction: block, transactions, inputs, outputs, and the sync
//! watermark commit together or not at all.

use crate::error::StoreError;
use crate::rows::{
    row_to_block, row_to_input, row_to_output, row_to_tx, BLOCK_COLUMNS, INPUT_COLUMNS,
    OUTPUT_COLUMNS, TX_COLUMNS,
};
use crate::schema;
use chainvault_types::{BlockRow, DecomposedBlock, SyncState};
use log::{debug, info};
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How long a statement waits on a locked database before failing.
    pub busy_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
        }
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn encode_list(context: &'static str, items: &[String]) -> Result<String, StoreError> {
    serde_json::to_string(items).map_err(|source| StoreError::Encode { context, source })
}

// ─── Store ──────────────────────────────────────────────────────────────────

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::init(conn, config)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, &StoreConfig::default())
    }

    fn init(conn: Connection, config: &StoreConfig) -> Result<Self, StoreError> {
        conn.busy_timeout(config.busy_timeout)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::migrate(&conn)?;
        Ok(Store { conn })
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        Ok(schema::version(&self.conn)?)
    }

    // ── Sync State ──────────────────────────────────────────────────────

    pub fn get_sync_state(&self) -> Result<SyncState, StoreError> {
        let (height, time): (Option<i64>, Option<i64>) = self.conn.query_row(
            "SELECT last_synced_height, last_sync_time FROM sync_state WHERE id = 1",
            [],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        Ok(SyncState {
            last_synced_height: height.map(|h| h as u64),
            last_sync_time: time,
        })
    }

    /// Highest height fully committed, or `None` on an empty database.
    pub fn get_last_synced_height(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.get_sync_state()?.last_synced_height)
    }

    // ── Commit ──────────────────────────────────────────────────────────

    /// Write every row of `block` and advance the watermark to
    /// `new_height`, atomically.
    ///
    /// Rows that already exist are left untouched, so committing the same
    /// block twice only refreshes the sync time. The watermark never moves
    /// backwards.
    pub fn commit_block(&self, block: &DecomposedBlock, new_height: u64) -> Result<(), StoreError> {
        let height = block.height();
        if new_height != height {
            return Err(StoreError::HeightMismatch {
                requested: new_height,
                block: height,
            });
        }

        let tx = self.conn.unchecked_transaction()?;
        check_chain_link(&tx, &block.block)?;

        let b = &block.block;
        let inserted = tx.execute(
            &format!(
                "INSERT INTO block ({}) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16
                ) ON CONFLICT(hash) DO NOTHING",
                BLOCK_COLUMNS
            ),
            params![
                b.hash, b.height, b.version, b.timestamp, b.median_timestamp,
                b.nonce, b.bits, b.difficulty, b.chainwork, b.merkle_root,
                b.previous_hash, b.next_hash, b.stripped_size, b.size, b.weight,
                b.transaction_count
            ],
        )?;

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO \"transaction\" ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(block_hash, position_in_block) DO NOTHING",
                TX_COLUMNS
            ))?;
            for t in &block.transactions {
                stmt.execute(params![
                    t.block_hash, t.position_in_block, t.txid, t.version, t.size,
                    t.weight, t.locktime
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO tx_input ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(block_hash, tx_position, input_index) DO NOTHING",
                INPUT_COLUMNS
            ))?;
            for i in &block.inputs {
                stmt.execute(params![
                    i.block_hash, i.tx_position, i.txid, i.input_index, i.prevout_txid,
                    i.prevout_index, i.script_sig, i.sequence,
                    encode_list("witness", &i.witness)?
                ])?;
            }
        }

        {
            let mut stmt = tx.prepare_cached(&format!(
                "INSERT INTO tx_output ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(block_hash, tx_position, output_index) DO NOTHING",
                OUTPUT_COLUMNS
            ))?;
            for o in &block.outputs {
                stmt.execute(params![
                    o.block_hash, o.tx_position, o.txid, o.output_index, o.value,
                    o.script_type, o.script_pubkey,
                    encode_list("addresses", &o.addresses)?
                ])?;
            }
        }

        tx.execute(
            "UPDATE sync_state
             SET last_synced_height = MAX(COALESCE(last_synced_height, -1), ?1),
                 last_sync_time = ?2
             WHERE id = 1",
            params![new_height as i64, now_secs()],
        )?;

        tx.commit()?;

        if inserted == 0 {
            debug!("block {} at height {} was already stored", b.hash, height);
        }
        Ok(())
    }

    // ── Next-hash Back-fill ─────────────────────────────────────────────

    /// Record `child_hash` as the successor of `parent_hash`. Only fills a
    /// NULL `next_hash`; returns whether a row changed.
    pub fn backfill_next_hash(&self, parent_hash: &str, child_hash: &str) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE block SET next_hash = ?2 WHERE hash = ?1 AND next_hash IS NULL",
            params![parent_hash, child_hash],
        )?;
        Ok(changed > 0)
    }

    /// Fill every missing `next_hash` whose child is already stored.
    pub fn repair_next_hashes(&self) -> Result<usize, StoreError> {
        let repaired = self.conn.execute(
            "UPDATE block
             SET next_hash = (SELECT c.hash FROM block c WHERE c.previous_hash = block.hash)
             WHERE next_hash IS NULL
               AND EXISTS (SELECT 1 FROM block c WHERE c.previous_hash = block.hash)",
            [],
        )?;
        if repaired > 0 {
            info!("repaired {} missing next-block links", repaired);
        }
        Ok(repaired)
    }

    // ── Lookups ─────────────────────────────────────────────────────────

    pub fn block_by_height(&self, height: u64) -> Result<Option<BlockRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM block WHERE height = ?1", BLOCK_COLUMNS),
                params![height as i64],
                row_to_block,
            )
            .optional()?)
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Option<BlockRow>, StoreError> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {} FROM block WHERE hash = ?1", BLOCK_COLUMNS),
                params![hash],
                row_to_block,
            )
            .optional()?)
    }

    pub fn block_hash_at(&self, height: u64) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT hash FROM block WHERE height = ?1",
                params![height as i64],
                |r| r.get(0),
            )
            .optional()?)
    }

    pub fn block_count(&self) -> Result<u64, StoreError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM block", [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Reassemble every stored row of one block, in block order.
    pub fn load_block(&self, hash: &str) -> Result<Option<DecomposedBlock>, StoreError> {
        let block = match self.block_by_hash(hash)? {
            Some(b) => b,
            None => return Ok(None),
        };

        let transactions = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM \"transaction\" WHERE block_hash = ?1 ORDER BY position_in_block",
                TX_COLUMNS
            ))?
            .query_map(params![hash], row_to_tx)?
            .collect::<Result<Vec<_>, _>>()?;

        let inputs = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM tx_input WHERE block_hash = ?1 ORDER BY tx_position, input_index",
                INPUT_COLUMNS
            ))?
            .query_map(params![hash], row_to_input)?
            .collect::<Result<Vec<_>, _>>()?;

        let outputs = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM tx_output WHERE block_hash = ?1 ORDER BY tx_position, output_index",
                OUTPUT_COLUMNS
            ))?
            .query_map(params![hash], row_to_output)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(DecomposedBlock {
            block,
            transactions,
            inputs,
            outputs,
        }))
    }
}

/// The block at `height` must not already be a different block, and must
/// point at the stored block one height below.
fn check_chain_link(tx: &Transaction<'_>, block: &BlockRow) -> Result<(), StoreError> {
    let height = block.height as u64;

    let existing: Option<String> = tx
        .query_row(
            "SELECT hash FROM block WHERE height = ?1",
            params![block.height],
            |r| r.get(0),
        )
        .optional()?;
    if let Some(existing) = existing {
        if existing != block.hash {
            return Err(StoreError::ConflictingBlock {
                height,
                existing,
                incoming: block.hash.clone(),
            });
        }
    }

    let link_err = |reason: String| StoreError::ChainLink {
        height,
        hash: block.hash.clone(),
        reason,
    };

    match (height, &block.previous_hash) {
        (0, None) => Ok(()),
        (0, Some(_)) => Err(link_err("genesis block names a parent".into())),
        (_, None) => Err(link_err("missing previous block hash".into())),
        (_, Some(prev)) => {
            let parent_height: Option<i64> = tx
                .query_row(
                    "SELECT height FROM block WHERE hash = ?1",
                    params![prev],
                    |r| r.get(0),
                )
                .optional()?;
            match parent_height {
                Some(h) if h as u64 + 1 == height => Ok(()),
                Some(h) => Err(link_err(format!(
                    "parent {} is stored at height {}",
                    prev, h
                ))),
                None => Err(link_err(format!("parent {} is not stored", prev))),
            }
        }
    }
}
