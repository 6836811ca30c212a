use log::{debug, info, warn};
use thiserror::Error;

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::block::Block;
use super::digest::Digest;
use super::miner::{CancelToken, Miner, MiningError};

/// Errors that can occur during ledger operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error(
        "Invalid block linkage: expected previous hash {expected}, found {}",
        display_previous(.found)
    )]
    LinkageMismatch {
        expected: Digest,
        found: Option<Digest>,
    },

    #[error("Block index overflow: no block can follow index {index}")]
    IndexOverflow { index: u32 },

    #[error("Mining error: {0}")]
    Mining(#[from] MiningError),
}

fn display_previous(previous: &Option<Digest>) -> String {
    match previous {
        Some(hash) => hash.to_hex(),
        None => "none".to_string(),
    }
}

/// Running totals of the two parties implied by the chain
///
/// `forward` starts at the opening balance and gains every later amount;
/// `reverse` starts at zero and loses every later amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Balances {
    pub forward: i64,
    pub reverse: i64,
}

impl Balances {
    fn opening(amount: i32) -> Self {
        Balances {
            forward: i64::from(amount),
            reverse: 0,
        }
    }

    fn apply(&mut self, amount: i32) {
        self.forward += i64::from(amount);
        self.reverse -= i64::from(amount);
    }

    pub fn is_non_negative(&self) -> bool {
        self.forward >= 0 && self.reverse >= 0
    }
}

impl fmt::Display for Balances {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Alice: {}, Bob: {}", self.forward, self.reverse)
    }
}

/// Represents the ledger: a hash-linked chain of transfer blocks
///
/// The chain always holds the genesis block. Clones share the same chain;
/// every mutation happens under a single lock.
#[derive(Debug, Clone)]
pub struct Ledger {
    /// The chain of blocks, genesis first
    chain: Arc<Mutex<Vec<Block>>>,

    /// Miner used for genesis and proposed blocks
    miner: Miner,
}

impl Ledger {
    /// Creates a new ledger with a mined genesis block
    ///
    /// # Arguments
    ///
    /// * `opening_balance` - The amount held by the genesis block
    pub fn new(opening_balance: i32) -> Self {
        let genesis = Block::mine(0, opening_balance, None);
        Self::from_genesis(genesis, Miner::default())
    }

    /// Creates a new ledger that mines with the given miner
    pub fn with_miner(opening_balance: i32, miner: Miner) -> Result<Self, MiningError> {
        let genesis = miner.mine(0, opening_balance, None, &CancelToken::new())?;
        Ok(Self::from_genesis(genesis, miner))
    }

    fn from_genesis(genesis: Block, miner: Miner) -> Self {
        info!("Created ledger with genesis block {}", genesis.hash());

        Ledger {
            chain: Arc::new(Mutex::new(vec![genesis])),
            miner,
        }
    }

    /// Locks the chain; a poisoned lock still holds a consistent chain
    fn lock(&self) -> MutexGuard<'_, Vec<Block>> {
        self.chain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tail(chain: &[Block]) -> &Block {
        &chain[chain.len() - 1]
    }

    /// Gets the index following the tail block
    fn next_index(last_block: &Block) -> Result<u32, LedgerError> {
        last_block
            .index()
            .checked_add(1)
            .ok_or(LedgerError::IndexOverflow {
                index: last_block.index(),
            })
    }

    /// Mines a candidate block extending the current tail
    ///
    /// The candidate is not linked into the ledger; pass it to `append`.
    pub fn propose_next(&self, amount: i32) -> Result<Block, LedgerError> {
        self.propose_next_cancellable(amount, &CancelToken::new())
    }

    /// Like `propose_next`, but gives up when `cancel` fires
    ///
    /// The lock is released while mining, so the tail may move before the
    /// candidate is appended; `append` then rejects it.
    pub fn propose_next_cancellable(
        &self,
        amount: i32,
        cancel: &CancelToken,
    ) -> Result<Block, LedgerError> {
        let last_block = self.last_block();
        let index = Self::next_index(&last_block)?;

        let block = self
            .miner
            .mine(index, amount, Some(last_block.hash().clone()), cancel)?;

        Ok(block)
    }

    /// Rebuilds the block a caller describes with a known nonce
    ///
    /// The block is placed after the current tail. Its hash is not checked.
    pub fn verify_block(&self, amount: i32, nonce: u64) -> Result<Block, LedgerError> {
        let last_block = self.last_block();
        let index = Self::next_index(&last_block)?;

        Ok(Block::reconstruct(
            index,
            amount,
            Some(last_block.hash().clone()),
            nonce,
        ))
    }

    /// Links a block as the new tail
    ///
    /// Only the previous hash is checked. The block's own proof of work is
    /// the caller's responsibility.
    ///
    /// # Returns
    ///
    /// `LedgerError::LinkageMismatch` if the block does not point at the
    /// current tail, in which case the ledger is unchanged
    pub fn append(&self, block: Block) -> Result<(), LedgerError> {
        let mut chain = self.lock();
        let tail_hash = Self::tail(&chain).hash();

        if block.previous_hash() != Some(tail_hash) {
            warn!(
                "Rejected block {}: previous hash does not match tail {}",
                block.index(),
                tail_hash
            );
            return Err(LedgerError::LinkageMismatch {
                expected: tail_hash.clone(),
                found: block.previous_hash().cloned(),
            });
        }

        info!("Appended block {} with hash {}", block.index(), block.hash());
        chain.push(block);

        Ok(())
    }

    /// Removes the tail block
    ///
    /// # Returns
    ///
    /// false if only the genesis block is left; the ledger is then unchanged
    pub fn remove_last(&self) -> bool {
        let mut chain = self.lock();

        if chain.len() == 1 {
            return false;
        }

        if let Some(removed) = chain.pop() {
            debug!("Removed block {}", removed.index());
        }

        true
    }

    /// Checks the two-party balance invariant
    ///
    /// # Returns
    ///
    /// false as soon as either running balance goes negative
    pub fn is_valid(&self) -> bool {
        let chain = self.lock();
        let mut balances = Balances::opening(chain[0].amount());

        for block in &chain[1..] {
            balances.apply(block.amount());

            if !balances.is_non_negative() {
                debug!("Balances go negative at block {}: {}", block.index(), balances);
                return false;
            }
        }

        true
    }

    /// Gets the running balances after the whole chain
    pub fn balances(&self) -> Balances {
        let chain = self.lock();
        let mut balances = Balances::opening(chain[0].amount());

        for block in &chain[1..] {
            balances.apply(block.amount());
        }

        balances
    }

    /// Gets the number of blocks, genesis included
    pub fn size(&self) -> usize {
        let chain = self.lock();
        Self::tail(&chain).index() as usize + 1
    }

    /// Gets the hash of the tail block
    pub fn tail_hash(&self) -> Digest {
        let chain = self.lock();
        Self::tail(&chain).hash().clone()
    }

    /// Gets the tail block
    pub fn last_block(&self) -> Block {
        let chain = self.lock();
        Self::tail(&chain).clone()
    }

    /// Gets a snapshot of the entire chain
    pub fn blocks(&self) -> Vec<Block> {
        self.lock().clone()
    }
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain = self.lock();

        for (i, block) in chain.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", block)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Builds a ledger without mining; only linkage is exercised.
    fn unmined_ledger(opening_balance: i32) -> Ledger {
        Ledger {
            chain: Arc::new(Mutex::new(vec![Block::reconstruct(0, opening_balance, None, 0)])),
            miner: Miner::default(),
        }
    }

    fn push_unmined(ledger: &Ledger, amount: i32) {
        let block = ledger.verify_block(amount, 0).unwrap();
        ledger.append(block).unwrap();
    }

    #[test]
    fn test_new_ledger() {
        let ledger = Ledger::new(350);

        assert_eq!(ledger.size(), 1);
        assert!(ledger.is_valid());

        let genesis = ledger.last_block();
        assert_eq!(genesis.index(), 0);
        assert_eq!(genesis.amount(), 350);
        assert!(genesis.is_genesis());
        assert!(genesis.hash().is_valid());
    }

    #[test]
    fn test_valid_ledger() {
        let ledger = Ledger::new(350);

        let block = ledger.propose_next(-100).unwrap();
        assert_eq!(ledger.size(), 1);
        ledger.append(block).unwrap();
        assert_eq!(ledger.size(), 2);
        assert!(ledger.is_valid());

        let block = ledger.propose_next(50).unwrap();
        ledger.append(block).unwrap();
        assert_eq!(ledger.size(), 3);
        assert!(ledger.is_valid());

        assert!(ledger.blocks().iter().all(|b| b.hash().is_valid()));
        assert_eq!(ledger.balances(), Balances { forward: 300, reverse: 50 });
    }

    #[test]
    fn test_invalid_ledger() {
        let ledger = Ledger::new(250);

        let block = ledger.propose_next(-300).unwrap();
        ledger.append(block).unwrap();

        assert_eq!(ledger.size(), 2);
        assert!(!ledger.is_valid());
    }

    #[test]
    fn test_remove_last_on_genesis_only() {
        let ledger = unmined_ledger(100);

        assert!(!ledger.remove_last());
        assert_eq!(ledger.size(), 1);
    }

    #[test]
    fn test_remove_last() {
        let ledger = unmined_ledger(100);
        let genesis_hash = ledger.tail_hash();
        push_unmined(&ledger, -10);
        push_unmined(&ledger, -20);

        assert!(ledger.remove_last());
        assert_eq!(ledger.size(), 2);
        assert!(ledger.remove_last());
        assert_eq!(ledger.size(), 1);
        assert_eq!(ledger.tail_hash(), genesis_hash);
        assert!(!ledger.remove_last());
    }

    #[test]
    fn test_append_rejects_mismatched_link() {
        let ledger = unmined_ledger(100);
        let stale = ledger.verify_block(-10, 0).unwrap();
        push_unmined(&ledger, -5);

        let result = ledger.append(stale.clone());
        assert_eq!(
            result,
            Err(LedgerError::LinkageMismatch {
                expected: ledger.tail_hash(),
                found: stale.previous_hash().cloned(),
            })
        );
        assert_eq!(ledger.size(), 2);
    }

    #[test]
    fn test_append_rejects_genesis_like_block() {
        let ledger = unmined_ledger(100);
        let orphan = Block::reconstruct(1, 10, None, 0);

        let err = ledger.append(orphan).unwrap_err();
        assert!(err.to_string().ends_with("found none"));
        assert_eq!(ledger.size(), 1);
    }

    #[test]
    fn test_append_does_not_check_proof_of_work() {
        let ledger = unmined_ledger(100);
        let block = ledger.verify_block(-1, 0).unwrap();
        assert!(!block.hash().is_valid());

        ledger.append(block).unwrap();
        assert_eq!(ledger.size(), 2);
    }

    #[test]
    fn test_no_block_after_max_index() {
        let ledger = unmined_ledger(100);
        let last = Block::reconstruct(u32::MAX, 0, Some(ledger.tail_hash()), 0);
        ledger.append(last).unwrap();

        let overflow = LedgerError::IndexOverflow { index: u32::MAX };
        assert_eq!(ledger.verify_block(1, 0), Err(overflow.clone()));
        assert_eq!(ledger.propose_next(1), Err(overflow));
        assert_eq!(ledger.blocks().len(), 2);
    }

    #[test]
    fn test_cancelled_proposal_is_ledger_error() {
        let ledger = unmined_ledger(100);
        let token = CancelToken::new();
        token.cancel();

        assert_eq!(
            ledger.propose_next_cancellable(-1, &token),
            Err(LedgerError::Mining(MiningError::Cancelled))
        );
        assert_eq!(ledger.size(), 1);
    }

    #[test]
    fn test_reverse_balance_goes_negative() {
        let ledger = unmined_ledger(100);
        push_unmined(&ledger, 10);

        assert!(!ledger.is_valid());
        assert_eq!(ledger.balances(), Balances { forward: 110, reverse: -10 });
    }

    #[test]
    fn test_invalid_prefix_stays_invalid() {
        let ledger = unmined_ledger(100);
        push_unmined(&ledger, -150);
        push_unmined(&ledger, 100);

        assert!(!ledger.is_valid());
        assert!(ledger.balances().is_non_negative());
    }

    #[test]
    fn test_balances_do_not_overflow() {
        let ledger = unmined_ledger(i32::MAX);
        push_unmined(&ledger, i32::MIN);

        assert_eq!(
            ledger.balances(),
            Balances { forward: -1, reverse: -(i32::MIN as i64) }
        );
        assert!(!ledger.is_valid());
    }

    #[test]
    fn test_balances_display() {
        let balances = Balances { forward: 300, reverse: 50 };
        assert_eq!(balances.to_string(), "Alice: 300, Bob: 50");
    }

    #[test]
    fn test_clones_share_chain() {
        let ledger = unmined_ledger(100);
        let other = ledger.clone();
        push_unmined(&other, -1);

        assert_eq!(ledger.size(), 2);
        assert_eq!(ledger.tail_hash(), other.tail_hash());
    }

    #[test]
    fn test_display_lists_blocks() {
        let ledger = unmined_ledger(100);
        push_unmined(&ledger, -1);

        let text = ledger.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Block 0 (Amount: 100"));
        assert!(lines[1].starts_with("Block 1 (Amount: -1"));
    }

    #[test]
    fn test_concurrent_appends_keep_linkage() {
        let ledger = unmined_ledger(1000);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        // Retry until the candidate still points at the tail.
                        while ledger.append(ledger.verify_block(-1, 0).unwrap()).is_err() {}
                    }
                });
            }
        });

        let blocks = ledger.blocks();
        assert_eq!(blocks.len(), 101);
        for pair in blocks.windows(2) {
            assert_eq!(pair[1].previous_hash(), Some(pair[0].hash()));
            assert_eq!(pair[1].index(), pair[0].index() + 1);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn valid_iff_prefix_sums_non_negative(
            opening in 0i32..1000,
            amounts in proptest::collection::vec(-500i32..500, 0..20),
        ) {
            let ledger = unmined_ledger(opening);
            for amount in &amounts {
                push_unmined(&ledger, *amount);
            }

            let mut sum = 0i64;
            let mut expected = true;
            for amount in &amounts {
                sum += i64::from(*amount);
                if i64::from(opening) + sum < 0 || -sum < 0 {
                    expected = false;
                    break;
                }
            }

            prop_assert_eq!(ledger.is_valid(), expected);
            prop_assert_eq!(ledger.size(), amounts.len() + 1);
        }
    }
}
