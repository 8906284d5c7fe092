//! Single-node proof-of-work ledger.
//!
//! Blocks of RSA-PSS signed transfers are chained by SHA-256 over a canonical
//! JSON encoding and admitted by proof of work. Balances are replayed from the
//! chain. An HTTP API and a node facade expose the ledger to clients and to a
//! network layer.

pub mod api;
pub mod blockchain;
pub mod config;
