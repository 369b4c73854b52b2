use chainvault_rpc::{ports, RpcConfig, TranslatorConfig};
use chainvault_store::StoreConfig;
use chainvault_sync::SyncConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

mod commands;

/// Bitcoin chain indexer.
#[derive(Parser)]
#[command(name = "chainvault")]
#[command(about = "Mirror a Bitcoin node's best chain into SQLite and query it")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    rpc: RpcArgs,

    /// SQLite database path.
    #[arg(long, env = "CHAINVAULT_DB", default_value = "chainvault.db")]
    db: PathBuf,

    /// How long a database statement waits on a lock.
    #[arg(long, env = "CHAINVAULT_BUSY_TIMEOUT_MS", default_value = "5000")]
    busy_timeout_ms: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RpcArgs {
    /// Node JSON-RPC URL. Defaults to a local mainnet node.
    #[arg(long, env = "CHAINVAULT_RPC_URL")]
    rpc_url: Option<String>,

    /// RPC username.
    #[arg(long, env = "CHAINVAULT_RPC_USER")]
    rpc_user: Option<String>,

    /// RPC password.
    #[arg(long, env = "CHAINVAULT_RPC_PASSWORD", hide_env_values = true)]
    rpc_password: Option<String>,

    /// Per-request timeout.
    #[arg(long, env = "CHAINVAULT_RPC_TIMEOUT_SECS", default_value = "30")]
    rpc_timeout_secs: u64,

    /// Retries per request on transient failure.
    #[arg(long, env = "CHAINVAULT_RPC_RETRIES", default_value = "3")]
    rpc_retries: u32,

    /// First retry delay; doubles per attempt.
    #[arg(long, env = "CHAINVAULT_RPC_RETRY_DELAY_MS", default_value = "500")]
    rpc_retry_delay_ms: u64,
}

#[derive(Args)]
struct SyncArgs {
    /// Seconds between polls once caught up.
    #[arg(long, default_value = "10")]
    poll_secs: u64,

    /// First backoff after a failed pass; doubles per consecutive failure.
    #[arg(long, default_value = "5")]
    retry_backoff_secs: u64,

    /// Upper bound for the backoff.
    #[arg(long, default_value = "60")]
    max_backoff_secs: u64,

    /// Pause between blocks while catching up.
    #[arg(long, default_value = "100")]
    block_delay_ms: u64,

    /// Never sync past this height.
    #[arg(long)]
    max_height: Option<u64>,

    /// Catch up once and exit instead of polling.
    #[arg(long)]
    once: bool,
}

impl SyncArgs {
    fn to_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_secs(self.poll_secs),
            retry_backoff: Duration::from_secs(self.retry_backoff_secs),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
            block_delay: Duration::from_millis(self.block_delay_ms),
            max_height: self.max_height,
        }
    }
}

#[derive(Args)]
struct LlmArgs {
    /// OpenAI-compatible chat-completions URL.
    #[arg(
        long,
        env = "CHAINVAULT_LLM_URL",
        default_value = "https://api.openai.com/v1/chat/completions"
    )]
    llm_url: String,

    /// Model name.
    #[arg(long, env = "CHAINVAULT_LLM_MODEL", default_value = "gpt-4o-mini")]
    llm_model: String,

    /// API key.
    #[arg(long, env = "CHAINVAULT_LLM_API_KEY", hide_env_values = true)]
    llm_api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync blocks from the node into the database.
    Sync(SyncArgs),

    /// Compare the local watermark with the node's tip.
    Status,

    /// Summarize what the database holds.
    Info,

    /// Show a block by height or hash.
    Block {
        /// Block height or 64-character block hash.
        id: String,
    },

    /// Show a transaction by txid, or by block and position.
    Tx {
        /// Transaction id.
        #[arg(required_unless_present = "block", conflicts_with = "block")]
        txid: Option<String>,

        /// Block hash holding the transaction.
        #[arg(long, requires = "position")]
        block: Option<String>,

        /// Position of the transaction within the block.
        #[arg(long, requires = "block")]
        position: Option<u64>,
    },

    /// Print the database schema.
    Schema,

    /// Run a read-only SQL statement.
    Query {
        sql: String,

        /// Maximum rows to print.
        #[arg(long, default_value = "100")]
        limit: usize,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Translate a question into SQL and run it.
    Ask {
        question: String,

        #[command(flatten)]
        llm: LlmArgs,

        /// Maximum rows to print.
        #[arg(long, default_value = "100")]
        limit: usize,

        /// Only print the generated SQL.
        #[arg(long)]
        dry_run: bool,
    },
}

/// Application context shared across commands.
pub(crate) struct AppContext {
    rpc: RpcConfig,
    db_path: PathBuf,
    store: StoreConfig,
}

impl AppContext {
    fn from_cli(cli: &Cli) -> Self {
        let rpc = RpcConfig {
            url: cli
                .rpc
                .rpc_url
                .clone()
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", ports::MAINNET)),
            username: cli.rpc.rpc_user.clone(),
            password: cli.rpc.rpc_password.clone(),
            timeout: Duration::from_secs(cli.rpc.rpc_timeout_secs),
            retries: cli.rpc.rpc_retries,
            retry_delay: Duration::from_millis(cli.rpc.rpc_retry_delay_ms),
        };
        Self {
            rpc,
            db_path: cli.db.clone(),
            store: StoreConfig {
                busy_timeout: Duration::from_millis(cli.busy_timeout_ms),
            },
        }
    }
}

impl LlmArgs {
    fn to_config(&self) -> TranslatorConfig {
        TranslatorConfig {
            url: self.llm_url.clone(),
            model: self.llm_model.clone(),
            api_key: self.llm_api_key.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let ctx = AppContext::from_cli(&cli);

    let result = match cli.command {
        Commands::Sync(args) => commands::sync(&ctx, args.to_config(), args.once).await,
        Commands::Status => commands::show_status(&ctx).await,
        Commands::Info => commands::show_info(&ctx),
        Commands::Block { id } => commands::show_block(&ctx, &id),
        Commands::Tx {
            txid,
            block,
            position,
        } => commands::show_tx(&ctx, txid.as_deref(), block.as_deref(), position),
        Commands::Schema => commands::show_schema(&ctx),
        Commands::Query { sql, limit, json } => commands::run_query(&ctx, &sql, limit, json),
        Commands::Ask {
            question,
            llm,
            limit,
            dry_run,
        } => commands::ask(&ctx, &question, llm.to_config(), limit, dry_run).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
