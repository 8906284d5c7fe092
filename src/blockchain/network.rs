// Network-facing side of the ledger.
//
// There is no transport here. `Node` is what a transport would call into:
// it routes received transactions and blocks to the ledger and hands anything
// accepted locally to a `Broadcaster`.

use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use super::block::Block;
use super::chain::{Ledger, LedgerError, ValidationError};
use super::crypto::Address;
use super::transaction::Transaction;

/// Envelope for messages exchanged between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    Transaction(Transaction),
    Block(Block),
}

/// Outbound hooks, invoked after local acceptance
pub trait Broadcaster: Send + Sync {
    fn broadcast_transaction(&self, transaction: &Transaction, peers: &[String]);

    fn broadcast_block(&self, block: &Block, peers: &[String]);
}

/// Broadcaster without a transport; records what would be sent in the log
#[derive(Debug, Default)]
pub struct LoggingBroadcaster;

impl Broadcaster for LoggingBroadcaster {
    fn broadcast_transaction(&self, transaction: &Transaction, peers: &[String]) {
        debug!(
            "Would broadcast transaction of {} to {} peers",
            transaction.amount(),
            peers.len()
        );
    }

    fn broadcast_block(&self, block: &Block, peers: &[String]) {
        debug!("Would broadcast block {} to {} peers", block.hash(), peers.len());
    }
}

/// A ledger plus its peer set and outbound hooks
pub struct Node {
    ledger: Ledger,
    broadcaster: Arc<dyn Broadcaster>,
    peers: RwLock<BTreeSet<String>>,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("peers", &self.peers())
            .finish_non_exhaustive()
    }
}

impl Node {
    pub fn new(ledger: Ledger, broadcaster: Arc<dyn Broadcaster>) -> Self {
        Node {
            ledger,
            broadcaster,
            peers: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Registers a peer; returns false if it was already known
    pub fn add_peer(&self, address: impl Into<String>) -> bool {
        let address = address.into();
        let added = self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.clone());
        if added {
            info!("Added peer {}", address);
        }
        added
    }

    pub fn peers(&self) -> Vec<String> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Accepts a transaction created on this node and announces it
    pub fn submit_transaction(&self, transaction: Transaction) -> Result<(), ValidationError> {
        self.ledger.try_add_transaction(transaction.clone())?;
        self.broadcaster
            .broadcast_transaction(&transaction, &self.peers());
        Ok(())
    }

    /// Routes a transaction received from a peer
    pub fn on_transaction_received(&self, transaction: Transaction) -> bool {
        match self.submit_transaction(transaction) {
            Ok(()) => true,
            Err(err) => {
                warn!("Dropped transaction from peer: {}", err);
                false
            }
        }
    }

    /// Validates a block received from a peer, appends it and relays it
    pub fn on_block_received(&self, block: Block) -> Result<(), LedgerError> {
        self.ledger.accept_block(block.clone())?;
        self.broadcaster.broadcast_block(&block, &self.peers());
        Ok(())
    }

    /// Mines the pending pool locally and announces the new block
    pub fn mine(&self, reward_address: &Address) -> Result<Block, LedgerError> {
        let block = self.ledger.mine_pending_transactions(reward_address)?;
        self.broadcaster.broadcast_block(&block, &self.peers());
        Ok(block)
    }

    /// Dispatches a decoded peer message, reporting why it was refused
    pub fn handle_message(&self, message: Message) -> Result<(), LedgerError> {
        match message {
            Message::Transaction(transaction) => {
                self.submit_transaction(transaction).map_err(|err| {
                    warn!("Dropped transaction from peer: {}", err);
                    LedgerError::from(err)
                })
            }
            Message::Block(block) => self.on_block_received(block),
        }
    }
}
