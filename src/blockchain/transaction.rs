use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use super::codec::{hash_canonical, CodecError, Hash256};
use super::crypto::{self, Address, CryptoError, Keypair, TxSignature};

/// Errors that can occur during transaction operations
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid sender address: {0}")]
    InvalidSenderAddress(String),

    #[error("Transaction already signed")]
    AlreadySigned,

    #[error("Crypto error: {0}")]
    CryptoError(#[from] CryptoError),

    #[error("Codec error: {0}")]
    CodecError(#[from] CodecError),
}

/// Originator of a transaction.
///
/// `System` marks a block reward minted by the ledger; it carries no
/// signature. On the wire it is `null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<Address>", into = "Option<Address>")]
pub enum Sender {
    System,
    Account(Address),
}

impl Sender {
    pub fn address(&self) -> Option<&Address> {
        match self {
            Sender::System => None,
            Sender::Account(address) => Some(address),
        }
    }
}

impl From<Option<Address>> for Sender {
    fn from(address: Option<Address>) -> Self {
        match address {
            Some(address) => Sender::Account(address),
            None => Sender::System,
        }
    }
}

impl From<Sender> for Option<Address> {
    fn from(sender: Sender) -> Self {
        match sender {
            Sender::System => None,
            Sender::Account(address) => Some(address),
        }
    }
}

/// A value transfer between two addresses.
///
/// Fields are only readable; `sign` is the single mutation, so a signed
/// transaction keeps the content its signature covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address, or null for a mining reward
    #[schema(value_type = Option<String>)]
    sender: Sender,

    /// Recipient's address
    recipient: Address,

    /// Amount being transferred
    amount: f64,

    /// Timestamp when the transaction was created
    #[schema(value_type = String, example = "2023-01-01T12:00:00Z")]
    timestamp: DateTime<Utc>,

    /// Hex encoded RSA-PSS signature
    #[serde(default)]
    #[schema(value_type = Option<String>)]
    signature: Option<TxSignature>,
}

/// The fields covered by the sender's signature
#[derive(Serialize)]
struct SigningPayload<'a> {
    sender: &'a Sender,
    recipient: &'a Address,
    amount: f64,
    timestamp: &'a DateTime<Utc>,
}

fn check_amount(amount: f64) -> Result<(), TransactionError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(TransactionError::InvalidAmount(format!(
            "Amount must be a non-negative number: {}",
            amount
        )));
    }
    Ok(())
}

impl Transaction {
    /// Creates a new unsigned transaction stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `sender` - The originating account, or `Sender::System`
    /// * `recipient` - The address of the recipient
    /// * `amount` - The amount to transfer, non-negative
    pub fn new(sender: Sender, recipient: Address, amount: f64) -> Result<Self, TransactionError> {
        check_amount(amount)?;

        Ok(Transaction {
            sender,
            recipient,
            amount,
            timestamp: Utc::now(),
            signature: None,
        })
    }

    /// Creates a mining reward; only the ledger mints these
    pub(super) fn reward(recipient: Address, amount: f64) -> Result<Self, TransactionError> {
        Self::new(Sender::System, recipient, amount)
    }

    /// Signs the transaction with the sender's keypair
    ///
    /// Reward transactions need no signature and succeed without change.
    pub fn sign(&mut self, keypair: &Keypair) -> Result<(), TransactionError> {
        let sender = match &self.sender {
            Sender::System => return Ok(()),
            Sender::Account(address) => address,
        };

        if self.signature.is_some() {
            return Err(TransactionError::AlreadySigned);
        }

        if keypair.address() != sender {
            return Err(TransactionError::InvalidSenderAddress(
                "Keypair address does not match sender address".to_string(),
            ));
        }

        let digest = self.signing_digest()?;
        self.signature = Some(keypair.sign(&digest)?);

        Ok(())
    }

    /// Checks whether the transaction may enter the chain
    ///
    /// Rewards are always valid. Anything else needs a finite, non-negative
    /// amount and a signature from the sender over the signing digest.
    pub fn is_valid(&self) -> bool {
        let sender = match &self.sender {
            Sender::System => return true,
            Sender::Account(address) => address,
        };

        if check_amount(self.amount).is_err() {
            return false;
        }

        let signature = match &self.signature {
            Some(signature) if !signature.is_empty() => signature,
            _ => return false,
        };

        match self.signing_digest() {
            Ok(digest) => crypto::verify(sender, &digest, signature),
            Err(_) => false,
        }
    }

    /// Digest of the canonical `{sender, recipient, amount, timestamp}`
    pub fn signing_digest(&self) -> Result<Hash256, CodecError> {
        hash_canonical(&SigningPayload {
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            timestamp: &self.timestamp,
        })
    }

    pub fn is_reward(&self) -> bool {
        self.sender == Sender::System
    }

    pub fn sender(&self) -> &Sender {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn amount(&self) -> f64 {
        self.amount
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn signature(&self) -> Option<&TxSignature> {
        self.signature.as_ref()
    }
}
