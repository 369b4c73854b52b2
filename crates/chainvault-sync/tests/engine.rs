//! Sync engine against an in-memory block source.

use chainvault_rpc::{BlockSource, RpcError};
use chainvault_store::{QueryFacade, Store, StoreConfig};
use chainvault_sync::{
    decompose, EngineState, MalformedKind, PassOutcome, SyncConfig, SyncEngine, SyncError,
    SyncEvent,
};
use chainvault_types::{BlockPayload, DecomposedBlock};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

// ─── Fake node ──────────────────────────────────────────────────────────────

fn block_hash(height: u64) -> String {
    format!("{:064x}", 0xb10c_0000u64 + height)
}

fn block_json(height: u64) -> Value {
    let hash = block_hash(height);
    let coinbase_txid = format!("{:064x}", 0xc0_0000u64 + height);
    let mut txs = vec![json!({
        "txid": coinbase_txid,
        "version": 1, "size": 134, "weight": 536, "locktime": 0,
        "vin": [{ "coinbase": format!("03{:06x}", height), "sequence": 4294967295u64 }],
        "vout": [{
            "value": 50.0, "n": 0,
            "scriptPubKey": { "hex": "4104ac", "type": "pubkey" }
        }]
    })];
    if height > 0 {
        txs.push(json!({
            "txid": format!("{:064x}", 0x5e_0000u64 + height),
            "version": 2, "size": 222, "weight": 561, "locktime": 0,
            "vin": [{
                "txid": format!("{:064x}", 0xc0_0000u64 + height - 1),
                "vout": 0,
                "scriptSig": { "asm": "", "hex": "" },
                "txinwitness": ["3044", "02ab"],
                "sequence": 4294967293u64
            }],
            "vout": [
                { "value": 0.01, "n": 0,
                  "scriptPubKey": { "hex": "0014aa", "type": "witness_v0_keyhash",
                                    "address": "bc1qexample" } },
                { "value": 49.98, "n": 1,
                  "scriptPubKey": { "hex": "0014bb", "type": "witness_v0_keyhash" } }
            ]
        }));
    }

    let mut block = json!({
        "hash": hash,
        "height": height,
        "version": 536870912,
        "merkleroot": "ee".repeat(32),
        "time": 1_700_000_000u64 + height * 600,
        "mediantime": 1_700_000_000u64,
        "nonce": 42,
        "bits": "17034219",
        "difficulty": 1.0,
        "chainwork": format!("{:064x}", height + 1),
        "nTx": txs.len(),
        "size": 400,
        "strippedsize": 300,
        "weight": 1300,
        "tx": txs
    });
    if height > 0 {
        block["previousblockhash"] = json!(block_hash(height - 1));
    }
    block
}

fn payload(value: Value) -> BlockPayload {
    serde_json::from_value(value).unwrap()
}

#[derive(Default)]
struct FakeState {
    tip: u64,
    /// Served blocks by hash; overrides go in here too.
    blocks: HashMap<String, BlockPayload>,
    /// Remaining transient failures of `get_block_hash` per height.
    flaky_hash: HashMap<u64, u32>,
    /// Remaining "out of range" answers of `get_block_hash` per height.
    missing_hash: HashMap<u64, u32>,
    /// Errors returned by `get_block_count` before it starts succeeding.
    count_errors: Vec<RpcError>,
    /// Heights requested through `get_block_hash`, in order.
    hash_calls: Vec<u64>,
    /// Flip this watch once the block for the given height was served.
    cancel_after: Option<(u64, watch::Sender<bool>)>,
}

#[derive(Default)]
struct FakeNode {
    state: Mutex<FakeState>,
}

impl FakeNode {
    fn with_chain(tip: u64) -> Arc<Self> {
        let node = Self::default();
        {
            let mut s = node.state.lock().unwrap();
            s.tip = tip;
            for h in 0..=tip {
                let p = payload(block_json(h));
                s.blocks.insert(p.hash.clone(), p);
            }
        }
        Arc::new(node)
    }

    fn extend_to(&self, tip: u64) {
        let mut s = self.state.lock().unwrap();
        for h in s.tip + 1..=tip {
            let p = payload(block_json(h));
            s.blocks.insert(p.hash.clone(), p);
        }
        s.tip = tip;
    }

    fn replace_block(&self, height: u64, value: Value) {
        let p = payload(value);
        self.state.lock().unwrap().blocks.insert(block_hash(height), p);
    }

    fn hash_calls(&self) -> Vec<u64> {
        self.state.lock().unwrap().hash_calls.clone()
    }
}

fn unavailable(method: &str) -> RpcError {
    RpcError::HttpStatus {
        method: method.into(),
        status: 503,
        body: "Service Unavailable".into(),
    }
}

impl BlockSource for FakeNode {
    async fn get_block_count(&self) -> Result<u64, RpcError> {
        let mut s = self.state.lock().unwrap();
        if !s.count_errors.is_empty() {
            return Err(s.count_errors.remove(0));
        }
        Ok(s.tip)
    }

    async fn get_block_hash(&self, height: u64) -> Result<String, RpcError> {
        let mut s = self.state.lock().unwrap();
        s.hash_calls.push(height);
        if let Some(n) = s.flaky_hash.get_mut(&height) {
            if *n > 0 {
                *n -= 1;
                return Err(unavailable("getblockhash"));
            }
        }
        if let Some(n) = s.missing_hash.get_mut(&height) {
            if *n > 0 {
                *n -= 1;
                return Err(RpcError::Rpc {
                    code: -8,
                    message: "Block height out of range".into(),
                    method: "getblockhash".into(),
                });
            }
        }
        if height > s.tip {
            return Err(RpcError::Rpc {
                code: -8,
                message: "Block height out of range".into(),
                method: "getblockhash".into(),
            });
        }
        Ok(block_hash(height))
    }

    async fn get_block(&self, hash: &str) -> Result<BlockPayload, RpcError> {
        let mut s = self.state.lock().unwrap();
        let block = s.blocks.get(hash).cloned().ok_or_else(|| RpcError::Rpc {
            code: -5,
            message: "Block not found".into(),
            method: "getblock".into(),
        })?;
        let cancel_now = matches!(&s.cancel_after, Some((h, _)) if *h == block.height);
        if cancel_now {
            if let Some((_, tx)) = s.cancel_after.take() {
                let _ = tx.send(true);
            }
        }
        Ok(block)
    }
}

fn engine(node: &Arc<FakeNode>, store: Store) -> SyncEngine<Arc<FakeNode>> {
    SyncEngine::new(node.clone(), store, SyncConfig::immediate()).unwrap()
}

fn no_shutdown() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

fn drain(rx: &mut mpsc::Receiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    events
}

// ─── 1. Happy path ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_three_block_chain() {
    let node = FakeNode::with_chain(2);
    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();
    assert_eq!(engine.state(), EngineState::CatchingUp);

    let outcome = engine.catch_up(&mut shutdown).await.unwrap();
    assert_eq!(outcome, PassOutcome::CaughtUp { height: Some(2) });
    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.cursor(), 3);

    let store = engine.store();
    assert_eq!(store.get_last_synced_height().unwrap(), Some(2));
    assert_eq!(store.block_count().unwrap(), 3);

    let b0 = store.block_by_height(0).unwrap().unwrap();
    let b1 = store.block_by_height(1).unwrap().unwrap();
    let b2 = store.block_by_height(2).unwrap().unwrap();
    assert_eq!(b0.previous_hash, None);
    assert_eq!(b1.previous_hash, Some(b0.hash.clone()));
    assert_eq!(b2.previous_hash, Some(b1.hash.clone()));
    assert_eq!(b0.next_hash, Some(b1.hash.clone()));
    assert_eq!(b1.next_hash, Some(b2.hash.clone()));
    assert_eq!(b2.next_hash, None);

    let loaded = store.load_block(&b1.hash).unwrap().unwrap();
    assert_eq!(loaded.transactions.len(), 2);
    assert_eq!(loaded.outputs[1].value, 1_000_000);
    assert_eq!(loaded.outputs[2].value, 4_998_000_000);
    assert_eq!(loaded.inputs[1].witness, ["3044", "02ab"]);
}

#[tokio::test]
async fn test_inputs_reference_stored_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.db");
    let node = FakeNode::with_chain(2);
    let store = Store::open(&path, &StoreConfig::default()).unwrap();
    let mut engine = engine(&node, store);
    let (_stop, mut shutdown) = no_shutdown();
    engine.catch_up(&mut shutdown).await.unwrap();

    let facade = QueryFacade::open(&path).unwrap();
    let count = |sql: &str| facade.execute(sql, 1).unwrap().rows[0][0].clone();

    assert_eq!(
        count("SELECT COUNT(*) FROM tx_input WHERE prevout_txid IS NOT NULL"),
        json!(2)
    );
    // Every spend points at an output stored in an earlier block, or earlier
    // in the same block.
    assert_eq!(
        count(
            "SELECT COUNT(*) FROM tx_input i \
             JOIN block bi ON bi.hash = i.block_hash \
             WHERE i.prevout_txid IS NOT NULL AND NOT EXISTS ( \
               SELECT 1 FROM tx_output o JOIN block bo ON bo.hash = o.block_hash \
               WHERE o.txid = i.prevout_txid AND o.output_index = i.prevout_index \
                 AND (bo.height < bi.height \
                      OR (bo.height = bi.height AND o.tx_position < i.tx_position)))"
        ),
        json!(0)
    );
    // Coinbase inputs only ever sit in the first transaction.
    assert_eq!(
        count("SELECT COUNT(*) FROM tx_input WHERE prevout_txid IS NULL AND tx_position <> 0"),
        json!(0)
    );
    assert_eq!(
        count("SELECT COUNT(*) FROM tx_input WHERE prevout_txid IS NULL"),
        json!(3)
    );
}

#[tokio::test]
async fn test_events_follow_commits() {
    let node = FakeNode::with_chain(1);
    let (tx, mut rx) = mpsc::channel(64);
    let mut engine = engine(&node, Store::open_in_memory().unwrap()).with_events(tx);
    let (_stop, mut shutdown) = no_shutdown();

    engine.catch_up(&mut shutdown).await.unwrap();
    let events = drain(&mut rx);
    assert_eq!(
        events[0],
        SyncEvent::Started {
            from_height: 0,
            target_height: 1
        }
    );
    assert!(matches!(&events[1], SyncEvent::BlockCommitted { height: 0, transactions: 1, .. }));
    assert!(matches!(&events[2], SyncEvent::BlockCommitted { height: 1, transactions: 2, .. }));
    assert_eq!(events[3], SyncEvent::CaughtUp { height: Some(1) });
}

// ─── 2. Failure policy ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_transient_error_is_retried() {
    let node = FakeNode::with_chain(2);
    node.state.lock().unwrap().flaky_hash.insert(1, 1);
    let (tx, mut rx) = mpsc::channel(64);
    let mut engine = engine(&node, Store::open_in_memory().unwrap()).with_events(tx);
    let (_stop, mut shutdown) = no_shutdown();

    let outcome = engine.catch_up(&mut shutdown).await.unwrap();
    assert_eq!(outcome, PassOutcome::CaughtUp { height: Some(2) });
    assert_eq!(engine.store().block_count().unwrap(), 3);

    // Height 1 asked twice, never skipped.
    assert_eq!(node.hash_calls(), vec![0, 1, 1, 2]);
    let retries: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SyncEvent::Retrying { .. }))
        .collect();
    assert_eq!(retries.len(), 1);
    assert!(matches!(&retries[0], SyncEvent::Retrying { height: 1, attempt: 1, .. }));
}

#[tokio::test]
async fn test_not_found_below_tip_is_retried() {
    let node = FakeNode::with_chain(3);
    node.state.lock().unwrap().missing_hash.insert(3, 2);
    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();

    let outcome = engine.catch_up(&mut shutdown).await.unwrap();
    assert_eq!(outcome, PassOutcome::CaughtUp { height: Some(3) });
    assert_eq!(node.hash_calls(), vec![0, 1, 2, 3, 3, 3]);
}

#[tokio::test]
async fn test_transient_tip_error_is_retried() {
    let node = FakeNode::with_chain(0);
    node.state
        .lock()
        .unwrap()
        .count_errors
        .push(unavailable("getblockcount"));
    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();

    let outcome = engine.catch_up(&mut shutdown).await.unwrap();
    assert_eq!(outcome, PassOutcome::CaughtUp { height: Some(0) });
}

#[tokio::test]
async fn test_auth_failure_is_fatal() {
    let node = FakeNode::with_chain(2);
    node.state.lock().unwrap().count_errors.push(RpcError::AuthFailed {
        method: "getblockcount".into(),
    });
    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();

    let err = engine.catch_up(&mut shutdown).await.unwrap_err();
    assert!(matches!(err, SyncError::Client(_)));
    assert!(err.is_fatal());
    assert_eq!(engine.store().block_count().unwrap(), 0);
}

#[tokio::test]
async fn test_zero_output_block_halts() {
    let node = FakeNode::with_chain(2);
    let mut bad = block_json(1);
    bad["tx"][1]["vout"] = json!([]);
    node.replace_block(1, bad);

    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();

    let err = engine.catch_up(&mut shutdown).await.unwrap_err();
    match &err {
        SyncError::Malformed(m) => {
            assert_eq!(m.height, 1);
            assert_eq!(m.kind, MalformedKind::NoOutputs { tx_position: 1 });
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(err.is_fatal());

    let store = engine.store();
    assert_eq!(store.get_last_synced_height().unwrap(), Some(0));
    assert_eq!(store.block_hash_at(1).unwrap(), None);
    assert_eq!(store.load_block(&block_hash(1)).unwrap(), None);
    // Nothing past the bad block was attempted.
    assert_eq!(node.hash_calls(), vec![0, 1]);
}

#[tokio::test]
async fn test_payload_for_wrong_height_is_malformed() {
    let node = FakeNode::with_chain(2);
    let mut wrong = block_json(2);
    wrong["hash"] = json!(block_hash(2));
    wrong["height"] = json!(7);
    node.replace_block(2, wrong);

    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();

    let err = engine.catch_up(&mut shutdown).await.unwrap_err();
    assert!(matches!(
        err,
        SyncError::Malformed(ref m) if m.kind == MalformedKind::HeightMismatch { requested: 2 }
    ));
    assert_eq!(engine.store().get_last_synced_height().unwrap(), Some(1));
}

#[tokio::test]
async fn test_reorg_surfaces_as_constraint_error() {
    let node = FakeNode::with_chain(1);
    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();
    engine.catch_up(&mut shutdown).await.unwrap();

    // The node switched branches: its block 2 builds on an unknown block 1.
    node.extend_to(2);
    let mut fork = block_json(2);
    fork["previousblockhash"] = json!("f0".repeat(32));
    node.replace_block(2, fork);

    let err = engine.catch_up(&mut shutdown).await.unwrap_err();
    assert!(matches!(err, SyncError::StoreConstraint(_)));
    assert!(err.is_fatal());
    assert_eq!(engine.store().get_last_synced_height().unwrap(), Some(1));
    assert_eq!(engine.store().block_count().unwrap(), 2);
}

// ─── 3. Idempotence, resumability, ordering ─────────────────────────────────

#[tokio::test]
async fn test_recommit_is_a_no_op() {
    let node = FakeNode::with_chain(2);
    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();
    engine.catch_up(&mut shutdown).await.unwrap();

    let store = engine.store();
    let before = store.load_block(&block_hash(1)).unwrap().unwrap();
    let again = decompose(&payload(block_json(1))).unwrap();
    store.commit_block(&again, 1).unwrap();

    assert_eq!(store.load_block(&block_hash(1)).unwrap().unwrap(), before);
    assert_eq!(store.block_count().unwrap(), 3);
    assert_eq!(store.get_last_synced_height().unwrap(), Some(2));

    // A second pass finds nothing to do.
    let outcome = engine.sync_pass(&mut shutdown).await.unwrap();
    assert_eq!(outcome, PassOutcome::CaughtUp { height: Some(2) });
    assert_eq!(node.hash_calls(), vec![0, 1, 2]);
}

fn dump(store: &Store, tip: u64) -> Vec<DecomposedBlock> {
    (0..=tip)
        .map(|h| {
            let hash = store.block_hash_at(h).unwrap().unwrap();
            store.load_block(&hash).unwrap().unwrap()
        })
        .collect()
}

#[tokio::test]
async fn test_resume_after_restart() {
    let (_stop, mut shutdown) = no_shutdown();

    let straight_node = FakeNode::with_chain(6);
    let mut straight = engine(&straight_node, Store::open_in_memory().unwrap());
    straight.catch_up(&mut shutdown).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain.db");
    let node = FakeNode::with_chain(6);
    for (stop_at, resume_from) in [(Some(1), 0), (Some(3), 2), (None, 4)] {
        let config = SyncConfig {
            max_height: stop_at,
            ..SyncConfig::immediate()
        };
        let store = Store::open(&path, &StoreConfig::default()).unwrap();
        let mut resumed = SyncEngine::new(node.clone(), store, config).unwrap();
        assert_eq!(resumed.cursor(), resume_from);
        resumed.catch_up(&mut shutdown).await.unwrap();
    }

    assert_eq!(node.hash_calls(), vec![0, 1, 2, 3, 4, 5, 6]);
    let store = Store::open(&path, &StoreConfig::default()).unwrap();
    assert_eq!(store.get_last_synced_height().unwrap(), Some(6));
    assert_eq!(store.block_count().unwrap(), 7);
    assert_eq!(dump(&store, 6), dump(straight.store(), 6));
}

#[tokio::test]
async fn test_lost_backfill_is_repaired_on_start() {
    let node = FakeNode::with_chain(1);
    let store = Store::open_in_memory().unwrap();
    // Commit both blocks directly, skipping the back-fill step.
    for h in 0..=1 {
        let d = decompose(&payload(block_json(h))).unwrap();
        store.commit_block(&d, h).unwrap();
    }
    assert_eq!(store.block_by_height(0).unwrap().unwrap().next_hash, None);

    let engine = engine(&node, store);
    assert_eq!(
        engine.store().block_by_height(0).unwrap().unwrap().next_hash,
        Some(block_hash(1))
    );
    assert_eq!(engine.cursor(), 2);
}

#[tokio::test]
async fn test_watermark_matches_stored_blocks() {
    let node = FakeNode::with_chain(5);
    let mut bad = block_json(4);
    bad["nTx"] = json!(9);
    node.replace_block(4, bad);

    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();
    assert!(engine.catch_up(&mut shutdown).await.is_err());

    let store = engine.store();
    let watermark = store.get_last_synced_height().unwrap().unwrap();
    assert_eq!(watermark, 3);
    for h in 0..=watermark {
        assert!(store.block_hash_at(h).unwrap().is_some(), "missing height {}", h);
    }
    assert_eq!(store.block_count().unwrap(), watermark + 1);
}

#[tokio::test]
async fn test_heights_requested_in_ascending_order() {
    let node = FakeNode::with_chain(3);
    {
        let mut s = node.state.lock().unwrap();
        s.flaky_hash.insert(2, 2);
    }
    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let (_stop, mut shutdown) = no_shutdown();
    engine.catch_up(&mut shutdown).await.unwrap();

    node.extend_to(6);
    engine.catch_up(&mut shutdown).await.unwrap();

    let calls = node.hash_calls();
    assert!(calls.windows(2).all(|w| w[1] == w[0] || w[1] == w[0] + 1));
    assert_eq!(calls.last(), Some(&6));
    assert_eq!(engine.store().block_count().unwrap(), 7);
}

// ─── 4. Cancellation & run loop ─────────────────────────────────────────────

#[tokio::test]
async fn test_cancel_between_heights() {
    let node = FakeNode::with_chain(5);
    let (stop, mut shutdown) = no_shutdown();
    node.state.lock().unwrap().cancel_after = Some((1, stop));

    let mut engine = engine(&node, Store::open_in_memory().unwrap());
    let outcome = engine.catch_up(&mut shutdown).await.unwrap();
    assert_eq!(outcome, PassOutcome::Cancelled);

    // Height 1 was fetched before the request and still commits whole.
    assert_eq!(engine.store().get_last_synced_height().unwrap(), Some(1));
    assert_eq!(engine.store().block_count().unwrap(), 2);
    assert_eq!(node.hash_calls(), vec![0, 1]);
}

#[tokio::test]
async fn test_run_stops_at_max_height() {
    let node = FakeNode::with_chain(5);
    let config = SyncConfig {
        max_height: Some(3),
        ..SyncConfig::immediate()
    };
    let (tx, mut rx) = mpsc::channel(64);
    let mut engine = SyncEngine::new(node.clone(), Store::open_in_memory().unwrap(), config)
        .unwrap()
        .with_events(tx);
    let (_stop, shutdown) = no_shutdown();

    engine.run(shutdown).await.unwrap();
    assert_eq!(engine.store().get_last_synced_height().unwrap(), Some(3));
    let events = drain(&mut rx);
    assert_eq!(events.last(), Some(&SyncEvent::Stopped { height: Some(3) }));
}

#[tokio::test]
async fn test_run_returns_when_cancelled_while_idle() {
    let node = FakeNode::with_chain(1);
    let config = SyncConfig {
        poll_interval: std::time::Duration::from_secs(3600),
        ..SyncConfig::immediate()
    };
    let mut engine =
        SyncEngine::new(node.clone(), Store::open_in_memory().unwrap(), config).unwrap();
    let (stop, shutdown) = no_shutdown();

    let handle = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let _ = stop.send(true);
    });
    engine.run(shutdown).await.unwrap();
    handle.await.unwrap();

    assert_eq!(engine.state(), EngineState::Idle);
    assert_eq!(engine.store().get_last_synced_height().unwrap(), Some(1));
}
