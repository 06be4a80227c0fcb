//! shipindex CLI
//!
//! Usage:
//!   shipindex run --config shipindex.yaml
//!   shipindex status --config shipindex.yaml
//!   shipindex decode-abi --blob DmVvc2lvOjphYmkvMS4x...
//!   shipindex fetch-abi --account eosio.token
//!   shipindex info

mod config;
mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use shipindex_abi::{decode_abi_blob, AbiDef, AbiProvider, HttpAbiProvider};
use shipindex_core::config::IndexerConfig;
use shipindex_stream::SessionBuilder;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "shipindex",
    about = "State-history ingester: streams blocks, flattens action traces, persists them",
    version
)]
struct Cli {
    /// YAML config file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level regardless of the config file
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the state-history node and ingest until the stream ends
    Run {
        /// Override `state_history_server`
        #[arg(long)]
        server: Option<String>,

        /// Override `database_url` (`memory` or a SQLite path)
        #[arg(long)]
        database: Option<String>,

        /// Only request irreversible blocks
        #[arg(long)]
        irreversible_only: bool,
    },

    /// Show the persisted chain status and reversible block positions
    Status {
        #[arg(long)]
        database: Option<String>,
    },

    /// Decode a binary abi_def (hex or base64) and print it as JSON
    DecodeAbi {
        /// The encoded ABI
        #[arg(long, conflicts_with = "file")]
        blob: Option<String>,

        /// File holding the encoded ABI as text
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Fetch an account's ABI from the chain API and print it as JSON
    FetchAbi {
        #[arg(long)]
        account: String,

        /// Override `get_abi_url`
        #[arg(long)]
        url: Option<String>,
    },

    /// Show the effective configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref())?;
    if cli.verbose {
        cfg.log.level = "debug".into();
    }
    logging::init_tracing(&cfg.log);

    match cli.command {
        Commands::Run {
            server,
            database,
            irreversible_only,
        } => {
            if let Some(server) = server {
                cfg.state_history_server = server;
            }
            if let Some(database) = database {
                cfg.database_url = database;
            }
            cfg.irreversible_only |= irreversible_only;
            cmd_run(cfg).await
        }
        Commands::Status { database } => {
            cmd_status(database.as_deref().unwrap_or(&cfg.database_url)).await
        }
        Commands::DecodeAbi { blob, file } => cmd_decode_abi(blob, file),
        Commands::FetchAbi { account, url } => {
            let url = url.unwrap_or_else(|| cfg.get_abi_url.clone());
            cmd_fetch_abi(&url, &account, cfg.abi_timeout()).await
        }
        Commands::Info => cmd_info(&cfg),
    }
}

// ─── Command implementations ──────────────────────────────────────────────────

async fn cmd_run(cfg: IndexerConfig) -> Result<()> {
    let store = config::open_store(&cfg.database_url).await?;
    info!(
        server = %cfg.state_history_server,
        database = %cfg.database_url,
        window = cfg.max_messages_in_flight,
        "starting session"
    );
    let mut session = SessionBuilder::from_config(cfg).store(store).build()?;
    let summary = session.run().await?;
    println!(
        "session {}: {} ({} blocks processed)",
        summary.state, summary.status, summary.blocks_processed
    );
    Ok(())
}

async fn cmd_status(database_url: &str) -> Result<()> {
    let store = config::open_store(database_url).await?;
    let status = store.load_status().await?;
    if status.is_unset() {
        println!("no blocks committed yet");
        return Ok(());
    }
    println!("head:         {}", status.head);
    println!("irreversible: {}", status.irreversible);

    let from = status.irreversible.saturating_add(1);
    if from <= status.head {
        let positions = store.block_positions(from, status.head).await?;
        println!("reversible blocks: {}", positions.len());
        for p in positions {
            println!("  {:>10}  {}", p.block_num, p.block_id);
        }
    }
    Ok(())
}

fn cmd_decode_abi(blob: Option<String>, file: Option<PathBuf>) -> Result<()> {
    let text = match (blob, file) {
        (Some(blob), _) => blob,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => return Err(anyhow!("pass --blob or --file")),
    };
    let bytes = decode_abi_blob("<input>", &text)?;
    print_abi(&bytes)
}

async fn cmd_fetch_abi(url: &str, account: &str, timeout: Duration) -> Result<()> {
    let provider = HttpAbiProvider::new(url, timeout)?;
    let bytes = provider
        .fetch_abi(account)
        .await
        .with_context(|| format!("fetching abi for {account}"))?;
    print_abi(&bytes)
}

fn print_abi(bytes: &[u8]) -> Result<()> {
    let abi = AbiDef::from_bin(bytes).context("decoding abi_def")?;
    let json: serde_json::Value = serde_json::from_str(&abi.to_json()?)?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn cmd_info(cfg: &IndexerConfig) -> Result<()> {
    println!("shipindex v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("{}", serde_yaml::to_string(cfg)?);
    println!("Stores:       memory, sqlite");
    println!("Compression:  none, zlib, gzip");
    println!("Sample config: see README.md");
    Ok(())
}
