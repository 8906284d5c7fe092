use log::warn;

use super::chain::Ledger;
use super::crypto::{Address, CryptoError, Keypair};
use super::transaction::{Sender, Transaction};

/// Holds a keypair and spends from its address
#[derive(Debug, Clone)]
pub struct Wallet {
    keypair: Keypair,
}

impl Wallet {
    /// Creates a new wallet with a random keypair
    pub fn new() -> Result<Self, CryptoError> {
        Ok(Wallet {
            keypair: Keypair::generate()?,
        })
    }

    /// Restores a wallet from a PKCS#8 PEM private key
    pub fn from_private_key_pem(pem: &str) -> Result<Self, CryptoError> {
        Ok(Wallet {
            keypair: Keypair::from_pkcs8_pem(pem)?,
        })
    }

    pub fn address(&self) -> &Address {
        self.keypair.address()
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn export_private_key_pem(&self) -> Result<String, CryptoError> {
        self.keypair.to_pkcs8_pem()
    }

    /// Builds and signs a transfer if the confirmed balance covers it
    ///
    /// # Returns
    ///
    /// `None` when the balance is insufficient or the transaction cannot be
    /// built
    pub fn create_transaction(
        &self,
        recipient: Address,
        amount: f64,
        ledger: &Ledger,
    ) -> Option<Transaction> {
        let balance = ledger.get_balance(self.address());
        if balance < amount {
            warn!("Not enough balance: {} available, {} requested", balance, amount);
            return None;
        }

        let mut transaction =
            match Transaction::new(Sender::Account(self.address().clone()), recipient, amount) {
                Ok(transaction) => transaction,
                Err(err) => {
                    warn!("Failed to create transaction: {}", err);
                    return None;
                }
            };

        if let Err(err) = transaction.sign(&self.keypair) {
            warn!("Failed to sign transaction: {}", err);
            return None;
        }

        Some(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;

    fn test_ledger() -> Ledger {
        Ledger::new(LedgerConfig::new(1, 50.0).unwrap()).unwrap()
    }

    #[test]
    fn test_insufficient_balance_produces_nothing() {
        let ledger = test_ledger();
        let wallet = Wallet::new().unwrap();

        assert!(wallet.create_transaction(Address::new("bob"), 1.0, &ledger).is_none());
    }

    #[test]
    fn test_create_transaction_after_reward() {
        let ledger = test_ledger();
        let wallet = Wallet::new().unwrap();
        ledger.mine_pending_transactions(wallet.address()).unwrap();

        let transaction = wallet
            .create_transaction(Address::new("bob"), 50.0, &ledger)
            .unwrap();
        assert_eq!(transaction.sender().address(), Some(wallet.address()));
        assert_eq!(transaction.amount(), 50.0);
        assert!(transaction.is_valid());

        assert!(wallet.create_transaction(Address::new("bob"), 50.5, &ledger).is_none());
        assert!(wallet.create_transaction(Address::new("bob"), -1.0, &ledger).is_none());
    }

    #[test]
    fn test_restore_from_pem() {
        let wallet = Wallet::new().unwrap();
        let pem = wallet.export_private_key_pem().unwrap();

        let restored = Wallet::from_private_key_pem(&pem).unwrap();
        assert_eq!(restored.address(), wallet.address());
    }
}
