use serde::Serialize;
use sha2::{Digest as _, Sha256};

use std::fmt;

use super::digest::Digest;
use super::miner::{CancelToken, Miner, MiningError};

/// Represents a single transfer record in the ledger
///
/// A block is immutable once built. Its hash always equals
/// `Block::calculate_hash` over its own fields, but it is only usable in a
/// chain when that hash meets the work target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Block {
    /// Position of the block in the chain, starting at 0 for genesis
    index: u32,

    /// Signed amount transferred by this block
    amount: i32,

    /// Hash of the previous block, absent only for genesis
    previous_hash: Option<Digest>,

    /// Proof of work (nonce)
    nonce: u64,

    /// Hash of this block
    hash: Digest,
}

impl Block {
    /// Mines a new block
    ///
    /// Tries nonces from 0 upward until the resulting hash is valid. The
    /// search is deterministic: the same inputs always yield the same nonce.
    ///
    /// # Arguments
    ///
    /// * `index` - The index of the block in the chain
    /// * `amount` - The amount transferred
    /// * `previous_hash` - The hash of the previous block, `None` for genesis
    ///
    /// # Returns
    ///
    /// The block holding the first valid nonce
    pub fn mine(index: u32, amount: i32, previous_hash: Option<Digest>) -> Self {
        let mut nonce: u64 = 0;

        loop {
            let hash = Self::calculate_hash(index, amount, previous_hash.as_ref(), nonce);

            if hash.is_valid() {
                return Block {
                    index,
                    amount,
                    previous_hash,
                    nonce,
                    hash,
                };
            }

            nonce = nonce.wrapping_add(1);
        }
    }

    /// Mines a new block, giving up when `cancel` is signalled
    ///
    /// The token is checked once per batch of nonces. The result is the same
    /// block `Block::mine` would return.
    pub fn mine_cancellable(
        index: u32,
        amount: i32,
        previous_hash: Option<Digest>,
        cancel: &CancelToken,
    ) -> Result<Self, MiningError> {
        Miner::default().mine(index, amount, previous_hash, cancel)
    }

    /// Rebuilds a block from a known nonce
    ///
    /// The hash is recomputed but not checked; callers inspect
    /// `block.hash().is_valid()` themselves.
    pub fn reconstruct(index: u32, amount: i32, previous_hash: Option<Digest>, nonce: u64) -> Self {
        let hash = Self::calculate_hash(index, amount, previous_hash.as_ref(), nonce);

        Block {
            index,
            amount,
            previous_hash,
            nonce,
            hash,
        }
    }

    /// Calculates the SHA-256 hash of the block fields
    ///
    /// The input is the big-endian index, the big-endian amount, the raw
    /// previous hash bytes (omitted for genesis) and the big-endian nonce.
    pub fn calculate_hash(
        index: u32,
        amount: i32,
        previous_hash: Option<&Digest>,
        nonce: u64,
    ) -> Digest {
        let mut hasher = Sha256::new();

        hasher.update(index.to_be_bytes());
        hasher.update(amount.to_be_bytes());
        if let Some(previous) = previous_hash {
            hasher.update(previous.as_bytes());
        }
        hasher.update(nonce.to_be_bytes());

        Digest::new(hasher.finalize().to_vec())
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn amount(&self) -> i32 {
        self.amount
    }

    pub fn previous_hash(&self) -> Option<&Digest> {
        self.previous_hash.as_ref()
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &Digest {
        &self.hash
    }

    pub fn is_genesis(&self) -> bool {
        self.previous_hash.is_none()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let previous = match &self.previous_hash {
            Some(hash) => hash.to_hex(),
            None => "null".to_string(),
        };

        write!(
            f,
            "Block {} (Amount: {}, Nonce: {}, prevHash: {}, hash: {})",
            self.index, self.amount, self.nonce, previous, self.hash
        )
    }
}
