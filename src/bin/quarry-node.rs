#![forbid(unsafe_code)]
use clap::Parser;
use colored::*;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color as TableColor, ContentArrangement, Table};
use parking_lot::RwLock;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use quarrychain::assembler::BlockAssembler;
use quarrychain::blockchain::Blockchain;
use quarrychain::cache::SenderCache;
use quarrychain::config::load_config_from;
use quarrychain::crypto::{address_to_hex, KeyPair};
use quarrychain::executor::TransferMachine;
use quarrychain::persistence::{Database, InMemoryPersistence, Persistence};
use quarrychain::state::{Account, MemoryState, StateDb};
use quarrychain::transaction::{Transaction, TRANSFER_GAS};
use quarrychain::txpool::TransactionPool;

const DEV_BALANCE: u64 = 1_000_000_000_000;

/// Runs a single-node development chain: funds one account, feeds demo
/// transfers into the pool and assembles blocks from them.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,
    /// Number of blocks to assemble
    #[arg(long, default_value_t = 3)]
    blocks: u64,
    /// Demo transfers submitted before each block
    #[arg(long, default_value_t = 5)]
    transfers: u64,
    /// How long to let each block pack before interrupting it
    #[arg(long, default_value = "200ms", value_parser = humantime::parse_duration)]
    pack_wait: Duration,
    /// Keep blocks in memory instead of the configured database
    #[arg(long)]
    in_memory: bool,
}

struct BlockRow {
    height: u64,
    hash: String,
    txs: usize,
    succeeded: usize,
    nonce: u64,
    elapsed: Duration,
}

fn open_persistence(path: &str, in_memory: bool) -> Result<Box<dyn Persistence>, Box<dyn std::error::Error>> {
    if in_memory {
        return Ok(Box::new(InMemoryPersistence::new()));
    }
    if let Some(parent) = Path::new(path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(Box::new(Database::open(path)?))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config_from(&cli.config)?;

    let dev = KeyPair::generate()?;
    let state = Arc::new(MemoryState::with_accounts([(dev.address(), Account::new(0, DEV_BALANCE))])?);
    info!(address = %address_to_hex(&dev.address()), balance = DEV_BALANCE, "funded development account");

    let persistence = open_persistence(&config.database.path, cli.in_memory)?;
    let chain = Blockchain::open(state.root(), persistence)?;
    if chain.head().state_root != state.root() {
        warn!(height = chain.height(), "saved chain head does not commit to the fresh development state");
    }
    let chain = Arc::new(RwLock::new(chain));

    let senders = Arc::new(SenderCache::default());
    let pool = Arc::new(TransactionPool::with_sender_cache(state.clone(), config.pool(), senders.clone()));
    let machine = Arc::new(TransferMachine::with_sender_cache(senders));
    let mut assembler = BlockAssembler::new(pool.clone(), state.clone(), machine, chain.clone(), config.assembler()?);

    let mut rng = rand::thread_rng();
    let mut next_nonce = 1u64;
    let mut rows = Vec::new();

    for _ in 0..cli.blocks {
        for _ in 0..cli.transfers {
            let to: [u8; 32] = rng.gen();
            let tx = Transaction::signed(&dev, to, next_nonce, rng.gen_range(1..=1_000), TRANSFER_GAS, rng.gen_range(1..=10));
            match pool.submit(tx) {
                Ok(_) => next_nonce += 1,
                Err(e) => warn!(error = %e, "demo transfer refused"),
            }
        }

        let started = Instant::now();
        assembler.open()?;
        let interrupter = assembler.pack()?;
        tokio::time::sleep(cli.pack_wait).await;
        interrupter.interrupt();
        let block = assembler.finalize().await?;

        let row = BlockRow {
            height: block.header.height,
            hash: hex::encode(block.hash()),
            txs: block.body.len(),
            succeeded: block.body.successful(),
            nonce: block.header.nonce,
            elapsed: started.elapsed(),
        };
        chain.write().append(block)?;
        let root = state.commit()?;
        pool.set_root(&root)?;
        rows.push(row);
    }

    print_summary(&rows, pool.len());
    Ok(())
}

fn print_summary(rows: &[BlockRow], remaining: usize) {
    println!();
    println!("{}", "QuarryChain blocks".bright_cyan().bold());

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Height").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Hash").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Txs").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Succeeded").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Nonce").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
            Cell::new("Time").fg(TableColor::Cyan).add_attribute(Attribute::Bold),
        ]);

    for row in rows {
        let status = if row.succeeded == row.txs { TableColor::Green } else { TableColor::Yellow };
        table.add_row(vec![
            Cell::new(format!("#{}", row.height)).fg(TableColor::White),
            Cell::new(&row.hash[..16]).fg(TableColor::Grey),
            Cell::new(row.txs).fg(TableColor::White),
            Cell::new(row.succeeded).fg(status),
            Cell::new(row.nonce).fg(TableColor::White),
            Cell::new(humantime::format_duration(Duration::from_millis(row.elapsed.as_millis() as u64))).fg(TableColor::Grey),
        ]);
    }

    println!("{}", table);
    if remaining > 0 {
        println!("{}", format!("{} transactions still in the pool", remaining).yellow());
    }
    println!();
}
