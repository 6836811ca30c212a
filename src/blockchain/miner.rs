use log::{debug, info};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use super::block::Block;
use super::digest::Digest;
use crate::config::MinerConfig;

/// Marks "no valid nonce found yet"; the last nonce is never searched.
const NO_HIT: u64 = u64::MAX;

/// Errors that can occur while mining
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("Mining was cancelled")]
    Cancelled,

    #[error("Nonce space exhausted without a valid hash")]
    Exhausted,
}

/// Shared flag used to abandon a running search
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks every search holding this token to stop at its next batch
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Brute-force nonce search over batches of consecutive nonces
///
/// Workers claim batches in increasing order from a shared cursor and stop
/// claiming once the next batch starts above the best hit, so the winning
/// nonce is always the smallest valid one no matter how many threads run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Miner {
    threads: usize,
    batch_size: u64,
}

impl Default for Miner {
    fn default() -> Self {
        Miner::from_config(&MinerConfig::default())
    }
}

impl Miner {
    /// Creates a miner; zero values are raised to one
    pub fn new(threads: usize, batch_size: u64) -> Self {
        Miner {
            threads: threads.max(1),
            batch_size: batch_size.max(1),
        }
    }

    pub fn from_config(config: &MinerConfig) -> Self {
        Miner::new(config.threads, config.batch_size)
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    /// Mines a block for the given fields
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the new block
    /// * `amount` - The amount transferred
    /// * `previous_hash` - The hash of the previous block
    /// * `cancel` - Checked once per batch
    ///
    /// # Returns
    ///
    /// The mined block, or `MiningError::Cancelled` if the token fired first
    pub fn mine(
        &self,
        index: u32,
        amount: i32,
        previous_hash: Option<Digest>,
        cancel: &CancelToken,
    ) -> Result<Block, MiningError> {
        let started = Instant::now();
        debug!(
            "Mining block {} (amount {}) with {} thread(s), batch size {}",
            index, amount, self.threads, self.batch_size
        );

        let search = Search {
            index,
            amount,
            previous_hash: previous_hash.as_ref(),
            batch_size: self.batch_size,
            cursor: AtomicU64::new(0),
            best: AtomicU64::new(NO_HIT),
            cancel,
        };

        if self.threads == 1 {
            search.run_worker();
        } else {
            thread::scope(|scope| {
                for _ in 0..self.threads {
                    scope.spawn(|| search.run_worker());
                }
            });
        }

        if cancel.is_cancelled() {
            debug!("Mining block {} cancelled after {:?}", index, started.elapsed());
            return Err(MiningError::Cancelled);
        }

        let nonce = search.best.load(Ordering::SeqCst);
        if nonce == NO_HIT {
            return Err(MiningError::Exhausted);
        }

        let block = Block::reconstruct(index, amount, previous_hash, nonce);
        info!(
            "Mined block {} with nonce {} in {:?}",
            index,
            nonce,
            started.elapsed()
        );

        Ok(block)
    }
}

/// State shared by the workers of one search
struct Search<'a> {
    index: u32,
    amount: i32,
    previous_hash: Option<&'a Digest>,
    batch_size: u64,
    cursor: AtomicU64,
    best: AtomicU64,
    cancel: &'a CancelToken,
}

impl Search<'_> {
    fn run_worker(&self) {
        while !self.cancel.is_cancelled() {
            let Some(start) = self.claim_batch() else {
                return;
            };

            if start >= self.best.load(Ordering::SeqCst) {
                return;
            }

            let end = start.saturating_add(self.batch_size);
            for nonce in start..end {
                let hash = Block::calculate_hash(self.index, self.amount, self.previous_hash, nonce);
                if hash.is_valid() {
                    self.best.fetch_min(nonce, Ordering::SeqCst);
                    return;
                }
            }
        }
    }

    /// Takes the next batch start, or `None` once the nonce space is used up
    fn claim_batch(&self) -> Option<u64> {
        let batch_size = self.batch_size;

        self.cursor
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |start| {
                (start < NO_HIT).then(|| start.saturating_add(batch_size))
            })
            .ok()
    }
}
