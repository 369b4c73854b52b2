//! Blockchain synchronization engine.
//!
//! Fetches blocks from the node strictly in height order, decomposes each
//! one, and commits it to the store together with the sync watermark.
//! Transient failures are retried with exponential backoff; structural or
//! integrity failures stop the engine.

use crate::config::SyncConfig;
use crate::decompose::decompose;
use crate::error::{MalformedBlockError, MalformedKind, SyncError};
use chainvault_rpc::node::short_hash;
use chainvault_rpc::BlockSource;
use chainvault_store::Store;
use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Sync progress events.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A pass found work to do.
    Started { from_height: u64, target_height: u64 },
    /// One height was durably committed.
    BlockCommitted {
        height: u64,
        hash: String,
        transactions: usize,
    },
    /// Nothing left to fetch; `height` is the watermark.
    CaughtUp { height: Option<u64> },
    /// A pass failed and will be retried after `delay`.
    Retrying {
        height: u64,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// The engine stopped on request.
    Stopped { height: Option<u64> },
}

/// What the engine is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    CatchingUp,
    Idle,
}

/// How a pass or catch-up ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Every height up to the target is committed; `height` is the watermark.
    CaughtUp { height: Option<u64> },
    /// Cancellation was requested.
    Cancelled,
}

/// Blockchain sync engine.
pub struct SyncEngine<S: BlockSource> {
    source: S,
    store: Store,
    config: SyncConfig,
    /// Next height to fetch.
    cursor: u64,
    state: EngineState,
    events: Option<mpsc::Sender<SyncEvent>>,
}

impl<S: BlockSource> SyncEngine<S> {
    /// Prepare an engine that resumes right after the stored watermark.
    ///
    /// Missing next-block links left behind by an interrupted run are
    /// repaired first.
    pub fn new(source: S, store: Store, config: SyncConfig) -> Result<Self, SyncError> {
        store.repair_next_hashes()?;
        let cursor = match store.get_last_synced_height()? {
            Some(h) => h + 1,
            None => 0,
        };
        info!("sync engine starting at height {}", cursor);
        Ok(Self {
            source,
            store,
            config,
            cursor,
            state: EngineState::CatchingUp,
            events: None,
        })
    }

    /// Send progress events to `tx`.
    pub fn with_events(mut self, tx: mpsc::Sender<SyncEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Give the store back, e.g. to reopen the engine later.
    pub fn into_store(self) -> Store {
        self.store
    }

    fn watermark(&self) -> Option<u64> {
        self.cursor.checked_sub(1)
    }

    // ── Passes ──────────────────────────────────────────────────────────

    /// Fetch and commit every height from the cursor to the node's tip
    /// (capped by `max_height`). Stops at the first error without
    /// advancing past the failed height.
    pub async fn sync_pass(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PassOutcome, SyncError> {
        self.state = EngineState::CatchingUp;

        let tip = self
            .source
            .get_block_count()
            .await
            .map_err(|e| SyncError::from_rpc(e, self.cursor))?;
        let target = match self.config.max_height {
            Some(max) => max.min(tip),
            None => tip,
        };

        if self.cursor > target {
            return Ok(PassOutcome::CaughtUp {
                height: self.watermark(),
            });
        }

        debug!("syncing heights {}..={} (node tip {})", self.cursor, target, tip);
        notify(
            &self.events,
            SyncEvent::Started {
                from_height: self.cursor,
                target_height: target,
            },
        )
        .await;

        while self.cursor <= target {
            if is_cancelled(shutdown) {
                return Ok(PassOutcome::Cancelled);
            }

            self.sync_height(self.cursor).await?;
            self.cursor += 1;

            if self.cursor <= target && sleep_or_cancel(self.config.block_delay, shutdown).await {
                return Ok(PassOutcome::Cancelled);
            }
        }

        Ok(PassOutcome::CaughtUp {
            height: self.watermark(),
        })
    }

    async fn sync_height(&mut self, height: u64) -> Result<(), SyncError> {
        let hash = self
            .source
            .get_block_hash(height)
            .await
            .map_err(|e| SyncError::from_rpc(e, height))?;

        let payload = self.source.get_block(&hash).await.map_err(|e| {
            match SyncError::from_rpc(e, height) {
                SyncError::Malformed(mut m) => {
                    m.hash = hash.clone();
                    SyncError::Malformed(m)
                }
                other => other,
            }
        })?;

        if payload.hash != hash {
            return Err(MalformedBlockError {
                hash: payload.hash,
                height: payload.height,
                kind: MalformedKind::HashMismatch { requested: hash },
            }
            .into());
        }
        if payload.height != height {
            return Err(MalformedBlockError {
                hash: payload.hash,
                height: payload.height,
                kind: MalformedKind::HeightMismatch { requested: height },
            }
            .into());
        }

        let block = decompose(&payload)?;
        self.store.commit_block(&block, height)?;
        if let Some(prev) = &block.block.previous_hash {
            self.store.backfill_next_hash(prev, &hash)?;
        }

        info!(
            "synced block {} ({}, {} txs)",
            height,
            short_hash(&hash),
            block.transactions.len()
        );
        notify(
            &self.events,
            SyncEvent::BlockCommitted {
                height,
                hash,
                transactions: block.transactions.len(),
            },
        )
        .await;
        Ok(())
    }

    // ── Catch-up & Run ──────────────────────────────────────────────────

    /// Run passes until caught up, retrying non-fatal failures with
    /// backoff. Returns the first fatal error.
    pub async fn catch_up(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<PassOutcome, SyncError> {
        let mut failures = 0u32;
        loop {
            let started_at = self.cursor;
            match self.sync_pass(shutdown).await {
                Ok(outcome) => {
                    if let PassOutcome::CaughtUp { height } = outcome {
                        self.state = EngineState::Idle;
                        notify(&self.events, SyncEvent::CaughtUp { height }).await;
                    }
                    return Ok(outcome);
                }
                Err(e) if e.is_fatal() => {
                    error!("sync stopped at height {}: {}", self.cursor, e);
                    return Err(e);
                }
                Err(e) => {
                    if self.cursor > started_at {
                        failures = 0;
                    }
                    failures += 1;
                    let delay = self.backoff(failures);
                    warn!(
                        "height {} failed ({}: {}), retrying in {:?}",
                        self.cursor,
                        e.kind(),
                        e,
                        delay
                    );
                    notify(
                        &self.events,
                        SyncEvent::Retrying {
                            height: self.cursor,
                            attempt: failures,
                            delay,
                            error: e.to_string(),
                        },
                    )
                    .await;
                    if sleep_or_cancel(delay, shutdown).await {
                        return Ok(PassOutcome::Cancelled);
                    }
                }
            }
        }
    }

    /// Catch up, then poll the node every `poll_interval` until cancelled.
    /// With `max_height` set, returns once that height is committed.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        loop {
            match self.catch_up(&mut shutdown).await? {
                PassOutcome::Cancelled => break,
                PassOutcome::CaughtUp { height } => {
                    if let (Some(max), Some(h)) = (self.config.max_height, height) {
                        if h >= max {
                            info!("reached configured max height {}", max);
                            break;
                        }
                    }
                }
            }
            if sleep_or_cancel(self.config.poll_interval, &mut shutdown).await {
                break;
            }
        }

        self.state = EngineState::Idle;
        info!("sync stopped at height {:?}", self.watermark());
        notify(
            &self.events,
            SyncEvent::Stopped {
                height: self.watermark(),
            },
        )
        .await;
        Ok(())
    }

    /// `retry_backoff * 2^(failures-1)`, capped at `max_backoff`.
    fn backoff(&self, failures: u32) -> Duration {
        let factor = 2u32.saturating_pow(failures.saturating_sub(1));
        self.config
            .retry_backoff
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }
}

async fn notify(events: &Option<mpsc::Sender<SyncEvent>>, event: SyncEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Sleep for `delay` unless cancellation arrives first. Returns whether
/// cancellation was requested.
async fn sleep_or_cancel(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if is_cancelled(shutdown) {
        return true;
    }
    if delay.is_zero() {
        return false;
    }
    let cancelled = tokio::select! {
        _ = tokio::time::sleep(delay) => false,
        _ = wait_for_cancel(shutdown) => true,
    };
    cancelled || is_cancelled(shutdown)
}

async fn wait_for_cancel(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if shutdown.changed().await.is_err() {
            // Sender gone: nobody can cancel any more.
            std::future::pending::<()>().await;
        }
        if *shutdown.borrow() {
            return;
        }
    }
}
