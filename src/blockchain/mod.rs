// Blockchain module
//
// This module contains the ledger engine:
// - Canonical encoding and hashing
// - RSA keypairs, signing and verification
// - Transactions and blocks
// - The ledger with its pending pool and proof of work
// - Wallets
// - The node facade a network layer talks to

pub mod block;
pub mod chain;
pub mod codec;
pub mod crypto;
pub mod network;
pub mod transaction;
pub mod wallet;

// Re-export main components for easier access
pub use block::{Block, BlockTemplate, ShutdownFlag};
pub use chain::{Ledger, LedgerError, ValidationError};
pub use codec::Hash256;
pub use crypto::{Address, Keypair};
pub use network::{LoggingBroadcaster, Node};
pub use transaction::{Sender, Transaction};
pub use wallet::Wallet;
