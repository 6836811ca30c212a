use anyhow::Context;
use clap::Parser;
use log::info;

use std::io;
use std::path::PathBuf;

use pow_ledger::cli::Driver;
use pow_ledger::{Config, Ledger, Miner};

/// Interactive proof-of-work ledger between two parties
#[derive(Debug, Parser)]
#[command(name = "pow-ledger", version, about)]
struct Args {
    /// Opening balance held by the genesis block
    #[arg(allow_negative_numbers = true)]
    amount: i32,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Worker threads for mining, overrides the config file
    #[arg(short, long)]
    threads: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())
        .and_then(|config| config.with_threads(args.threads))
        .context("Failed to load configuration")?;

    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(config.log_level.as_str()));

    let miner = Miner::from_config(&config.miner);
    info!(
        "Mining genesis block for opening balance {} with {} thread(s)",
        args.amount,
        miner.threads()
    );
    let ledger = Ledger::with_miner(args.amount, miner).context("Failed to mine genesis block")?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut driver = Driver::new(ledger, stdin.lock(), stdout.lock());
    driver.run()?;

    info!("Session ended with {} block(s)", driver.ledger().size());
    Ok(())
}
