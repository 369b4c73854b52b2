//! CLI command implementations.

use crate::AppContext;
use chainvault_rpc::{ChatTranslator, NodeRpc, SqlTranslator, TranslatorConfig};
use chainvault_store::{QueryFacade, QueryResult, Store, TransactionDetail};
use chainvault_sync::{SyncConfig, SyncEngine, SyncEvent};
use chainvault_types::{format_amount, is_hash_hex, BlockRow};
use log::warn;
use serde_json::Value;
use tokio::sync::watch;

type Result = std::result::Result<(), Box<dyn std::error::Error>>;

// ─── Helpers ────────────────────────────────────────────────────────────────

fn format_btc(sats: i64) -> String {
    if sats < 0 {
        return format!("-{} BTC", format_amount(sats.unsigned_abs()));
    }
    format!("{} BTC", format_amount(sats as u64))
}

fn open_facade(ctx: &AppContext) -> std::result::Result<QueryFacade, Box<dyn std::error::Error>> {
    if !ctx.db_path.exists() {
        return Err(format!(
            "database {} does not exist (run `chainvault sync` first)",
            ctx.db_path.display()
        )
        .into());
    }
    Ok(QueryFacade::open(&ctx.db_path)?)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn print_result(result: &QueryResult, json: bool) -> Result {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", result.columns.join(" | "));
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(cell).collect();
        println!("{}", cells.join(" | "));
    }
    println!(
        "({} row{}{})",
        result.rows.len(),
        if result.rows.len() == 1 { "" } else { "s" },
        if result.truncated { ", truncated" } else { "" }
    );
    Ok(())
}

fn print_block(block: &BlockRow) {
    println!("Block {}", block.height);
    println!("  Hash:          {}", block.hash);
    println!(
        "  Previous:      {}",
        block.previous_hash.as_deref().unwrap_or("(none)")
    );
    println!(
        "  Next:          {}",
        block.next_hash.as_deref().unwrap_or("(not synced)")
    );
    println!("  Time:          {}", block.timestamp);
    println!("  Median time:   {}", block.median_timestamp);
    println!("  Version:       {:#x}", block.version);
    println!("  Merkle root:   {}", block.merkle_root);
    println!("  Bits:          {}", block.bits);
    println!("  Nonce:         {}", block.nonce);
    println!("  Difficulty:    {}", block.difficulty);
    println!("  Chainwork:     {}", block.chainwork);
    println!(
        "  Size:          {} bytes ({} stripped, weight {})",
        block.size, block.stripped_size, block.weight
    );
    println!("  Transactions:  {}", block.transaction_count);
}

fn print_tx(detail: &TransactionDetail) {
    let tx = &detail.transaction;
    println!("Transaction {}", tx.txid);
    println!(
        "  Block:         {} (height {}, position {})",
        tx.block_hash, detail.block_height, tx.position_in_block
    );
    println!("  Version:       {}", tx.version);
    println!("  Size:          {} bytes (weight {})", tx.size, tx.weight);
    println!("  Locktime:      {}", tx.locktime);

    println!("  Inputs ({}):", detail.inputs.len());
    for input in &detail.inputs {
        match (&input.prevout_txid, input.prevout_index) {
            (Some(txid), Some(vout)) => println!("    #{} {}:{}", input.input_index, txid, vout),
            _ => println!("    #{} coinbase {}", input.input_index, input.script_sig),
        }
    }

    println!("  Outputs ({}):", detail.outputs.len());
    for output in &detail.outputs {
        let addresses = if output.addresses.is_empty() {
            String::new()
        } else {
            format!(" -> {}", output.addresses.join(", "))
        };
        println!(
            "    #{} {} [{}]{}",
            output.output_index,
            format_btc(output.value),
            output.script_type.as_deref().unwrap_or("unknown"),
            addresses
        );
    }
    println!("  Total out:     {}", format_btc(detail.total_output_value()));
}

// ─── Sync ───────────────────────────────────────────────────────────────────

pub async fn sync(ctx: &AppContext, config: SyncConfig, once: bool) -> Result {
    let (stop_tx, shutdown) = watch::channel(false);
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping after the current block...");
            let _ = stop_tx.send(true);
        }
    });

    let result = sync_until(ctx, config, once, shutdown).await;
    signal_task.abort();
    result
}

/// Sync until caught up (`once`), or until `shutdown` flips to true.
async fn sync_until(
    ctx: &AppContext,
    config: SyncConfig,
    once: bool,
    mut shutdown: watch::Receiver<bool>,
) -> Result {
    let node = NodeRpc::with_config(ctx.rpc.clone())?;
    // The engine retries an unreachable node itself.
    match node.get_blockchain_info().await {
        Ok(info) => println!(
            "Connected to {} ({} chain, height {})",
            node.client().display_url(),
            info.chain,
            info.blocks
        ),
        Err(e) => warn!("node {} not reachable yet: {}", node.client().display_url(), e),
    }

    let store = Store::open(&ctx.db_path, &ctx.store)?;

    let (tx, rx) = tokio::sync::mpsc::channel(32);
    let progress_task = tokio::spawn(async move {
        let mut rx = rx;
        let mut committed = 0u64;
        while let Some(event) = rx.recv().await {
            match event {
                SyncEvent::Started {
                    from_height,
                    target_height,
                } => {
                    println!("Syncing heights {} to {}", from_height, target_height);
                }
                SyncEvent::BlockCommitted { .. } => committed += 1,
                SyncEvent::CaughtUp { height } => match height {
                    Some(h) => println!(
                        "Caught up at height {} ({} blocks this session)",
                        h, committed
                    ),
                    None => println!("Node has no blocks yet"),
                },
                SyncEvent::Retrying {
                    height,
                    attempt,
                    delay,
                    ..
                } => {
                    eprintln!(
                        "Height {} failed (attempt {}), retrying in {:?}",
                        height, attempt, delay
                    );
                }
                SyncEvent::Stopped { height } => {
                    println!(
                        "Stopped at height {}",
                        height.map_or("(none)".to_string(), |h| h.to_string())
                    );
                }
            }
        }
    });

    let mut engine = SyncEngine::new(node, store, config)?.with_events(tx);
    let result = if once {
        engine.catch_up(&mut shutdown).await.map(|_| ())
    } else {
        engine.run(shutdown).await
    };
    drop(engine);
    let _ = progress_task.await;

    result?;
    Ok(())
}

// ─── Status & Reports ───────────────────────────────────────────────────────

pub async fn show_status(ctx: &AppContext) -> Result {
    let node = NodeRpc::with_config(ctx.rpc.clone())?;

    println!("Connecting to {} ...", node.client().display_url());
    let info = node.get_blockchain_info().await?;

    println!("Node status:");
    println!("  Chain:            {}", info.chain);
    println!("  Blocks:           {}", info.blocks);
    println!("  Headers:          {}", info.headers);
    println!("  Best block:       {}", info.bestblockhash);
    println!(
        "  Verification:     {:.2}%",
        info.verificationprogress * 100.0
    );
    println!(
        "  Initial download: {}",
        if info.initialblockdownload { "yes" } else { "no" }
    );

    println!();
    println!("Local database ({}):", ctx.db_path.display());
    if !ctx.db_path.exists() {
        println!("  Not created yet.");
        return Ok(());
    }
    let summary = QueryFacade::open(&ctx.db_path)?.chain_summary()?;
    match summary.last_synced_height {
        Some(h) => {
            println!("  Synced height:    {}", h);
            println!("  Behind node by:   {}", info.blocks.saturating_sub(h));
        }
        None => println!("  Synced height:    (none)"),
    }
    if let Some(t) = summary.last_sync_time {
        println!("  Last sync:        {}", t);
    }
    Ok(())
}

pub fn show_info(ctx: &AppContext) -> Result {
    let summary = open_facade(ctx)?.chain_summary()?;

    println!("Database: {}", ctx.db_path.display());
    println!("  Blocks:           {}", summary.total_blocks);
    println!("  Transactions:     {}", summary.total_transactions);
    match (summary.latest_height, &summary.latest_hash) {
        (Some(h), Some(hash)) => {
            println!("  Latest block:     {} ({})", h, hash);
            if let Some(t) = summary.latest_block_time {
                println!("  Latest time:      {}", t);
            }
            if let Some(d) = summary.latest_difficulty {
                println!("  Difficulty:       {}", d);
            }
        }
        _ => println!("  Latest block:     (none)"),
    }
    if let Some(h) = summary.last_synced_height {
        println!("  Synced height:    {}", h);
    }
    Ok(())
}

pub fn show_block(ctx: &AppContext, id: &str) -> Result {
    let facade = open_facade(ctx)?;
    let block = if is_hash_hex(id) {
        facade.block_by_hash(id)?
    } else {
        let height: u64 = id
            .parse()
            .map_err(|_| format!("not a height or block hash: {}", id))?;
        facade.block_by_height(height)?
    };
    let block = block.ok_or_else(|| format!("block {} is not in the database", id))?;

    print_block(&block);
    let txs = facade.block_transactions(&block.hash)?;
    if !txs.is_empty() {
        println!();
        for tx in &txs {
            println!("  [{}] {}", tx.position_in_block, tx.txid);
        }
    }
    Ok(())
}

pub fn show_tx(
    ctx: &AppContext,
    txid: Option<&str>,
    block: Option<&str>,
    position: Option<u64>,
) -> Result {
    let facade = open_facade(ctx)?;
    let found = match (txid, block, position) {
        (Some(txid), _, _) => facade.transaction_by_txid(txid)?,
        (None, Some(block), Some(position)) => {
            facade.transaction_at(block, position)?.into_iter().collect()
        }
        _ => return Err("give a txid, or --block and --position".into()),
    };

    if found.is_empty() {
        return Err("transaction is not in the database".into());
    }
    for (i, detail) in found.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_tx(detail);
    }
    Ok(())
}

pub fn show_schema(ctx: &AppContext) -> Result {
    println!("{}", open_facade(ctx)?.schema_sql()?);
    Ok(())
}

// ─── Query ──────────────────────────────────────────────────────────────────

pub fn run_query(ctx: &AppContext, sql: &str, limit: usize, json: bool) -> Result {
    let result = open_facade(ctx)?.execute(sql, limit)?;
    print_result(&result, json)
}

pub async fn ask(
    ctx: &AppContext,
    question: &str,
    config: TranslatorConfig,
    limit: usize,
    dry_run: bool,
) -> Result {
    let facade = open_facade(ctx)?;
    let schema = facade.schema_sql()?;

    let translator = ChatTranslator::new(config)?;
    let sql = translator.translate(question, &schema).await?;
    println!("SQL: {}", sql);
    if dry_run {
        return Ok(());
    }

    println!();
    let result = facade.execute(&sql, limit)?;
    print_result(&result, false)
}
