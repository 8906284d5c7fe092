use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{info, warn};
use thiserror::Error;

use crate::config::LedgerConfig;

use super::block::{Block, BlockError, BlockTemplate, ShutdownFlag};
use super::codec::CodecError;
use super::crypto::Address;
use super::transaction::{Sender, Transaction, TransactionError};

/// Reasons a transaction is refused entry to the pending pool
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Transaction has no sender")]
    MissingSender,

    #[error("Reward transactions are minted by the ledger only")]
    RewardNotAccepted,

    #[error("Transaction has no recipient")]
    MissingRecipient,

    #[error("Transaction signature or amount is invalid")]
    InvalidTransaction,
}

/// First integrity violation found while scanning the chain
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainIntegrityError {
    #[error("Block {index} has a stored hash that does not match its contents")]
    HashMismatch { index: usize },

    #[error("Block {index} does not link to the hash of its predecessor")]
    BrokenLink { index: usize },

    #[error("Block {index} contains invalid transaction {position}")]
    InvalidTransaction { index: usize, position: usize },
}

/// Errors that can occur during ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Transaction error: {0}")]
    TransactionError(#[from] TransactionError),

    #[error("Codec error: {0}")]
    CodecError(#[from] CodecError),

    #[error("Invalid reward address")]
    InvalidRewardAddress,

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Transaction rejected: {0}")]
    TransactionRejected(#[from] ValidationError),
}

#[derive(Debug)]
struct LedgerState {
    /// The chain of blocks, genesis first, never empty
    chain: Vec<Block>,

    /// Accepted transactions waiting for the next block, in arrival order
    pending: Vec<Transaction>,
}

impl LedgerState {
    fn last_block(&self) -> &Block {
        // The chain is created with a genesis block and only grows
        &self.chain[self.chain.len() - 1]
    }
}

/// Handle to a ledger instance.
///
/// Clones share the same chain. Chain extension (mining and accepting
/// external blocks) is serialized by `append_lock`; the state lock is only
/// held for the short sections that read or swap in new state, so readers
/// never wait on a proof-of-work search and never see half an append.
#[derive(Debug, Clone)]
pub struct Ledger {
    state: Arc<RwLock<LedgerState>>,
    append_lock: Arc<Mutex<()>>,
    config: LedgerConfig,
    shutdown: ShutdownFlag,
}

impl Ledger {
    /// Creates a ledger whose chain holds only the genesis block
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        let genesis = Block::genesis()?;
        info!(
            "Created ledger with genesis block {} (difficulty {}, reward {})",
            genesis.hash(),
            config.difficulty(),
            config.mining_reward()
        );

        Ok(Ledger {
            state: Arc::new(RwLock::new(LedgerState {
                chain: vec![genesis],
                pending: Vec::new(),
            })),
            append_lock: Arc::new(Mutex::new(())),
            config,
            shutdown: ShutdownFlag::new(),
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, LedgerState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_append(&self) -> MutexGuard<'_, ()> {
        self.append_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Flag that aborts any mining in progress on this ledger
    pub fn shutdown_handle(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Gets a copy of the entire chain
    pub fn get_chain(&self) -> Vec<Block> {
        self.read_state().chain.clone()
    }

    pub fn get_last_block(&self) -> Block {
        self.read_state().last_block().clone()
    }

    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.read_state().pending.clone()
    }

    /// Adds a transaction to the pending pool, returning whether it was
    /// accepted
    pub fn add_transaction(&self, transaction: Transaction) -> bool {
        match self.try_add_transaction(transaction) {
            Ok(()) => true,
            Err(err) => {
                warn!("Rejected transaction: {}", err);
                false
            }
        }
    }

    /// Adds a transaction to the pending pool
    ///
    /// # Returns
    ///
    /// The reason for rejection if the transaction is not admissible
    pub fn try_add_transaction(&self, transaction: Transaction) -> Result<(), ValidationError> {
        check_admissible(&transaction)?;
        self.write_state().pending.push(transaction);
        Ok(())
    }

    /// Mines every pending transaction plus a reward into a new block
    ///
    /// # Arguments
    ///
    /// * `reward_address` - The address credited with the mining reward
    ///
    /// # Returns
    ///
    /// The newly appended block. On cancellation nothing is appended and the
    /// pending pool is left as it was.
    pub fn mine_pending_transactions(&self, reward_address: &Address) -> Result<Block, LedgerError> {
        if reward_address.is_empty() {
            return Err(LedgerError::InvalidRewardAddress);
        }

        let _append = self.lock_append();

        let (template, mined_count) = self.prepare_template(reward_address)?;
        let block = template.mine(self.config.difficulty(), &self.shutdown)?;
        self.append_mined(block.clone(), mined_count);

        Ok(block)
    }

    /// Snapshots the pending pool and adds the reward on top of the tip.
    /// Returns the template and how many pending entries it covers.
    fn prepare_template(&self, reward_address: &Address) -> Result<(BlockTemplate, usize), LedgerError> {
        let state = self.read_state();
        let mut transactions = state.pending.clone();
        let mined_count = transactions.len();
        transactions.push(Transaction::reward(
            reward_address.clone(),
            self.config.mining_reward(),
        )?);

        Ok((
            BlockTemplate::new(transactions, *state.last_block().hash()),
            mined_count,
        ))
    }

    fn append_mined(&self, block: Block, mined_count: usize) {
        info!(
            "Appended block {} with {} transactions",
            block.hash(),
            block.transactions().len()
        );

        let mut state = self.write_state();
        state.chain.push(block);
        // Later arrivals stay queued for the next block
        state.pending.drain(..mined_count);
    }

    /// Appends a block produced elsewhere after checking it against the tip
    pub fn accept_block(&self, block: Block) -> Result<(), LedgerError> {
        let _append = self.lock_append();

        {
            let state = self.read_state();
            self.check_candidate(&block, state.last_block())?;
        }

        let mut state = self.write_state();
        state
            .pending
            .retain(|pending| !block.transactions().contains(pending));
        info!("Accepted external block {}", block.hash());
        state.chain.push(block);

        Ok(())
    }

    fn check_candidate(&self, block: &Block, tip: &Block) -> Result<(), LedgerError> {
        if !block.has_valid_hash() {
            return Err(LedgerError::InvalidBlock(
                "stored hash does not match contents".to_string(),
            ));
        }

        if !block.hash().meets_difficulty(self.config.difficulty()) {
            return Err(LedgerError::InvalidBlock(format!(
                "hash {} does not meet difficulty {}",
                block.hash(),
                self.config.difficulty()
            )));
        }

        if block.previous_hash() != tip.hash() {
            return Err(LedgerError::InvalidBlock(format!(
                "previous hash {} does not match tip {}",
                block.previous_hash(),
                tip.hash()
            )));
        }

        let mut rewards = 0;
        for transaction in block.transactions() {
            if transaction.is_reward() {
                rewards += 1;
                if transaction.amount() != self.config.mining_reward() {
                    return Err(LedgerError::InvalidBlock(format!(
                        "reward of {} differs from {}",
                        transaction.amount(),
                        self.config.mining_reward()
                    )));
                }
            } else if let Err(err) = check_admissible(transaction) {
                return Err(LedgerError::InvalidBlock(err.to_string()));
            }
        }

        if rewards > 1 {
            return Err(LedgerError::InvalidBlock(format!(
                "{} reward transactions in one block",
                rewards
            )));
        }

        Ok(())
    }

    /// Balance of `address`, replayed from the whole chain
    pub fn get_balance(&self, address: &Address) -> f64 {
        let state = self.read_state();
        let mut balance = 0.0;

        for block in &state.chain {
            for transaction in block.transactions() {
                if transaction.sender().address() == Some(address) {
                    balance -= transaction.amount();
                }
                if transaction.recipient() == address {
                    balance += transaction.amount();
                }
            }
        }

        balance
    }

    /// Balances of every address that appears in the chain
    pub fn get_balances(&self) -> BTreeMap<Address, f64> {
        let state = self.read_state();
        let mut balances = BTreeMap::new();

        for block in &state.chain {
            for transaction in block.transactions() {
                if let Sender::Account(sender) = transaction.sender() {
                    *balances.entry(sender.clone()).or_insert(0.0) -= transaction.amount();
                }
                *balances
                    .entry(transaction.recipient().clone())
                    .or_insert(0.0) += transaction.amount();
            }
        }

        balances
    }

    /// Validates the blockchain
    ///
    /// # Returns
    ///
    /// true if every block's hash, link and transactions check out
    pub fn is_chain_valid(&self) -> bool {
        match self.validate_chain() {
            Ok(()) => true,
            Err(err) => {
                warn!("Chain integrity check failed: {}", err);
                false
            }
        }
    }

    /// Full scan of the chain, reporting the first violation
    pub fn validate_chain(&self) -> Result<(), ChainIntegrityError> {
        let state = self.read_state();
        validate_blocks(&state.chain)
    }

    /// Copy of the chain paired with the validation result of that same copy
    pub fn get_validated_chain(&self) -> (Vec<Block>, Result<(), ChainIntegrityError>) {
        let state = self.read_state();
        let validity = validate_blocks(&state.chain);
        (state.chain.clone(), validity)
    }
}

fn check_admissible(transaction: &Transaction) -> Result<(), ValidationError> {
    match transaction.sender() {
        Sender::System => return Err(ValidationError::RewardNotAccepted),
        Sender::Account(address) if address.is_empty() => {
            return Err(ValidationError::MissingSender)
        }
        Sender::Account(_) => {}
    }

    if transaction.recipient().is_empty() {
        return Err(ValidationError::MissingRecipient);
    }

    if !transaction.is_valid() {
        return Err(ValidationError::InvalidTransaction);
    }

    Ok(())
}

fn validate_blocks(chain: &[Block]) -> Result<(), ChainIntegrityError> {
    for index in 1..chain.len() {
        let current_block = &chain[index];
        let previous_block = &chain[index - 1];

        if !current_block.has_valid_hash() {
            return Err(ChainIntegrityError::HashMismatch { index });
        }

        if current_block.previous_hash() != previous_block.hash() {
            return Err(ChainIntegrityError::BrokenLink { index });
        }

        if let Some(position) = current_block
            .transactions()
            .iter()
            .position(|transaction| !transaction.is_valid())
        {
            return Err(ChainIntegrityError::InvalidTransaction { index, position });
        }
    }

    Ok(())
}
