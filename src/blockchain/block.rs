use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};

use super::codec::{hash_canonical, CodecError, Hash256};
use super::transaction::Transaction;

/// Errors that can occur while sealing a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Mining cancelled before a valid nonce was found")]
    MiningCancelled,

    #[error("Nonce space exhausted at difficulty {0}")]
    NonceSpaceExhausted(u32),

    #[error("Codec error: {0}")]
    CodecError(#[from] CodecError),
}

/// Shared flag that stops in-progress mining once triggered.
///
/// Once triggered the flag stays set.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The hashed view of a block: everything except the hash itself
#[derive(Serialize)]
struct HashPayload<'a> {
    timestamp: &'a DateTime<Utc>,
    transactions: &'a [Transaction],
    previous_hash: &'a Hash256,
    nonce: u64,
}

fn hash_fields(
    timestamp: &DateTime<Utc>,
    transactions: &[Transaction],
    previous_hash: &Hash256,
    nonce: u64,
) -> Result<Hash256, CodecError> {
    hash_canonical(&HashPayload {
        timestamp,
        transactions,
        previous_hash,
        nonce,
    })
}

/// A block being assembled; only the nonce changes, and only while mining
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    timestamp: DateTime<Utc>,
    transactions: Vec<Transaction>,
    previous_hash: Hash256,
    nonce: u64,
}

impl BlockTemplate {
    /// Starts a template on top of `previous_hash`, stamped now, nonce 0
    pub fn new(transactions: Vec<Transaction>, previous_hash: Hash256) -> Self {
        BlockTemplate {
            timestamp: Utc::now(),
            transactions,
            previous_hash,
            nonce: 0,
        }
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn compute_hash(&self) -> Result<Hash256, CodecError> {
        hash_fields(
            &self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// Searches nonces upward from the current one until the hash starts
    /// with `difficulty` zero hex digits, then seals the block.
    ///
    /// The search is deterministic. It checks `shutdown` before every
    /// attempt; a cancelled template is consumed and never becomes a block.
    pub fn mine(mut self, difficulty: u32, shutdown: &ShutdownFlag) -> Result<Block, BlockError> {
        let started = Instant::now();

        loop {
            if shutdown.is_triggered() {
                debug!("Mining cancelled at nonce {}", self.nonce);
                return Err(BlockError::MiningCancelled);
            }

            let hash = self.compute_hash()?;
            if hash.meets_difficulty(difficulty) {
                info!(
                    "Block mined: {} (nonce {}, {} ms)",
                    hash,
                    self.nonce,
                    started.elapsed().as_millis()
                );

                return Ok(Block {
                    timestamp: self.timestamp,
                    transactions: self.transactions,
                    previous_hash: self.previous_hash,
                    nonce: self.nonce,
                    hash,
                });
            }

            self.nonce = self
                .nonce
                .checked_add(1)
                .ok_or(BlockError::NonceSpaceExhausted(difficulty))?;
        }
    }
}

/// A sealed block.
///
/// Locally produced blocks come out of `BlockTemplate::mine` or
/// `Block::genesis`; deserialized blocks are checked by the ledger before
/// they are appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Timestamp when the block was assembled
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Transactions included in this block
    transactions: Vec<Transaction>,

    /// Hash of the previous block
    #[schema(value_type = String)]
    previous_hash: Hash256,

    /// Proof of work
    nonce: u64,

    /// Hash of this block
    #[schema(value_type = String)]
    hash: Hash256,
}

impl Block {
    /// The chain root: epoch timestamp, no transactions, zero parent, unmined.
    /// Every ledger builds the same genesis block.
    pub fn genesis() -> Result<Self, CodecError> {
        let timestamp = DateTime::<Utc>::from(UNIX_EPOCH);
        let previous_hash = Hash256::ZERO;
        let hash = hash_fields(&timestamp, &[], &previous_hash, 0)?;

        Ok(Block {
            timestamp,
            transactions: Vec::new(),
            previous_hash,
            nonce: 0,
            hash,
        })
    }

    /// Recomputes the hash from the block's current fields
    pub fn compute_hash(&self) -> Result<Hash256, CodecError> {
        hash_fields(
            &self.timestamp,
            &self.transactions,
            &self.previous_hash,
            self.nonce,
        )
    }

    /// Whether the stored hash matches the block's fields
    pub fn has_valid_hash(&self) -> bool {
        matches!(self.compute_hash(), Ok(hash) if hash == self.hash)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &Hash256 {
        &self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::crypto::Address;
    use serde_json::json;

    fn rewards() -> Vec<Transaction> {
        vec![
            Transaction::reward(Address::new("recipient1"), 10.0).unwrap(),
            Transaction::reward(Address::new("recipient2"), 20.0).unwrap(),
        ]
    }

    #[test]
    fn test_compute_hash_is_deterministic() {
        let template = BlockTemplate::new(rewards(), Hash256::ZERO);

        let first = template.compute_hash().unwrap();
        let second = template.compute_hash().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.to_hex().len(), 64);

        let copy = template.clone();
        assert_eq!(copy.compute_hash().unwrap(), first);
    }

    #[test]
    fn test_mined_block_meets_difficulty() {
        let template = BlockTemplate::new(rewards(), Hash256::ZERO);
        let block = template.mine(2, &ShutdownFlag::new()).unwrap();

        assert!(block.hash().to_hex().starts_with("00"));
        assert_eq!(block.compute_hash().unwrap(), *block.hash());
        assert!(block.has_valid_hash());
        assert_eq!(block.transactions().len(), 2);
    }

    #[test]
    fn test_mining_is_deterministic() {
        let template = BlockTemplate::new(rewards(), Hash256::ZERO);

        let first = template.clone().mine(2, &ShutdownFlag::new()).unwrap();
        let second = template.mine(2, &ShutdownFlag::new()).unwrap();

        assert_eq!(first.nonce(), second.nonce());
        assert_eq!(first.hash(), second.hash());
    }

    #[test]
    fn test_cancelled_mining_yields_no_block() {
        let shutdown = ShutdownFlag::new();
        shutdown.trigger();

        let template = BlockTemplate::new(rewards(), Hash256::ZERO);
        let result = template.mine(64, &shutdown);

        assert!(matches!(result, Err(BlockError::MiningCancelled)));
    }

    #[test]
    fn test_genesis_block_is_fixed() {
        let first = Block::genesis().unwrap();
        let second = Block::genesis().unwrap();

        assert_eq!(first, second);
        assert_eq!(first.previous_hash(), &Hash256::ZERO);
        assert!(first.transactions().is_empty());
        assert_eq!(first.nonce(), 0);
        assert!(first.has_valid_hash());
    }

    #[test]
    fn test_genesis_hash_is_pinned() {
        let genesis = Block::genesis().unwrap();

        assert_eq!(
            genesis.hash().to_hex(),
            "1ed7d3df73d54363d3c10918b78ba15fe4a7c4e372ab22242146e1c77cb81b45"
        );
    }

    #[test]
    fn test_tampered_block_fails_hash_check() {
        let block = BlockTemplate::new(rewards(), Hash256::ZERO)
            .mine(1, &ShutdownFlag::new())
            .unwrap();

        let mut value = serde_json::to_value(&block).unwrap();
        value["nonce"] = json!(block.nonce() + 1);
        let tampered: Block = serde_json::from_value(value).unwrap();

        assert!(!tampered.has_valid_hash());
    }

    #[test]
    fn test_block_survives_serialization() {
        let block = BlockTemplate::new(rewards(), Hash256::ZERO)
            .mine(1, &ShutdownFlag::new())
            .unwrap();

        let encoded = serde_json::to_string(&block).unwrap();
        let decoded: Block = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded, block);
        assert!(decoded.has_valid_hash());
    }
}
