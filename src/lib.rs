//! A single-process proof-of-work ledger of hash-linked transfer blocks.

pub mod blockchain;
pub mod cli;
pub mod config;

pub use blockchain::{Balances, Block, CancelToken, Digest, Ledger, LedgerError, Miner, MiningError};
pub use config::{Config, ConfigError, MinerConfig};
