// Blockchain module
//
// This module contains the proof-of-work ledger including:
// - Digest type and difficulty target
// - Block structure and hash function
// - Cancellable nonce search
// - Ledger with linkage and balance checks

pub mod block;
pub mod chain;
pub mod digest;
pub mod miner;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{Balances, Ledger, LedgerError};
pub use digest::{Digest, DigestError, DIFFICULTY_BYTES};
pub use miner::{CancelToken, Miner, MiningError};
