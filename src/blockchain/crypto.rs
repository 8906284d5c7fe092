use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pss::{BlindedSigningKey, Signature, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

use super::codec::Hash256;

/// Modulus size of generated keys
pub const KEY_BITS: usize = 2048;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to generate keypair: {0}")]
    KeypairGenerationError(String),

    #[error("Failed to sign message: {0}")]
    SigningError(String),

    #[error("Invalid private key: {0}")]
    InvalidPrivateKey(String),

    #[error("Encoding error: {0}")]
    EncodingError(String),
}

/// An account address: the PEM (SubjectPublicKeyInfo) encoding of a public key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Address(value.into())
    }

    /// Exports a public key in its canonical textual form
    pub fn from_public_key(public_key: &RsaPublicKey) -> Result<Self, CryptoError> {
        public_key
            .to_public_key_pem(LineEnding::LF)
            .map(Address)
            .map_err(|e| CryptoError::EncodingError(e.to_string()))
    }

    /// Parses the address back into a public key, if it is one
    pub fn to_public_key(&self) -> Option<RsaPublicKey> {
        RsaPublicKey::from_public_key_pem(&self.0).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw RSA-PSS signature bytes, hex encoded on the wire
#[derive(Clone, PartialEq, Eq)]
pub struct TxSignature(Vec<u8>);

impl TxSignature {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        TxSignature(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({})", hex::encode(&self.0))
    }
}

impl Serialize for TxSignature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for TxSignature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map(TxSignature).map_err(de::Error::custom)
    }
}

/// An RSA keypair; the private half never leaves this struct except through
/// an explicit PEM export.
#[derive(Clone)]
pub struct Keypair {
    private_key: RsaPrivateKey,
    signing_key: BlindedSigningKey<Sha256>,
    address: Address,
}

impl Keypair {
    /// Generates a fresh keypair from the OS entropy source
    pub fn generate() -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(|e| CryptoError::KeypairGenerationError(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    /// Restores a keypair from a PKCS#8 PEM private key
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CryptoError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .map_err(|e| CryptoError::InvalidPrivateKey(e.to_string()))?;
        Self::from_private_key(private_key)
    }

    fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, CryptoError> {
        let address = Address::from_public_key(&private_key.to_public_key())?;
        let signing_key = BlindedSigningKey::<Sha256>::new(private_key.clone());

        Ok(Keypair {
            private_key,
            signing_key,
            address,
        })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Exports the private key as PKCS#8 PEM
    pub fn to_pkcs8_pem(&self) -> Result<String, CryptoError> {
        let pem = self
            .private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::EncodingError(e.to_string()))?;
        Ok(pem.as_str().to_owned())
    }

    /// Signs a digest with RSA-PSS over SHA-256 and a random salt
    pub fn sign(&self, digest: &Hash256) -> Result<TxSignature, CryptoError> {
        let signature = self
            .signing_key
            .try_sign_with_rng(&mut OsRng, digest.as_bytes())
            .map_err(|e| CryptoError::SigningError(e.to_string()))?;
        Ok(TxSignature(signature.to_vec()))
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Checks `signature` over `digest` against the key encoded in `address`.
///
/// Malformed addresses and signatures verify as false.
pub fn verify(address: &Address, digest: &Hash256, signature: &TxSignature) -> bool {
    let public_key = match address.to_public_key() {
        Some(key) => key,
        None => return false,
    };

    let signature = match Signature::try_from(signature.as_bytes()) {
        Ok(sig) => sig,
        Err(_) => return false,
    };

    VerifyingKey::<Sha256>::new(public_key)
        .verify(digest.as_bytes(), &signature)
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::codec::digest;

    #[test]
    fn test_keypair_address_is_pem() {
        let keypair = Keypair::generate().unwrap();
        let address = keypair.address();

        assert!(address.as_str().starts_with("-----BEGIN PUBLIC KEY-----"));
        assert!(address.to_public_key().is_some());
    }

    #[test]
    fn test_signing_and_verification() {
        let keypair = Keypair::generate().unwrap();
        let message = digest(b"Hello, world!");

        let signature = keypair.sign(&message).unwrap();
        assert!(verify(keypair.address(), &message, &signature));

        // Wrong digest
        let wrong = digest(b"Wrong message");
        assert!(!verify(keypair.address(), &wrong, &signature));
    }

    #[test]
    fn test_signatures_are_randomized() {
        let keypair = Keypair::generate().unwrap();
        let message = digest(b"same input");

        let first = keypair.sign(&message).unwrap();
        let second = keypair.sign(&message).unwrap();

        assert_ne!(first, second);
        assert!(verify(keypair.address(), &message, &first));
        assert!(verify(keypair.address(), &message, &second));
    }

    #[test]
    fn test_tampering_breaks_verification() {
        let keypair = Keypair::generate().unwrap();
        let other = Keypair::generate().unwrap();
        let message = digest(b"transfer");
        let signature = keypair.sign(&message).unwrap();

        let mut bytes = signature.as_bytes().to_vec();
        bytes[10] ^= 0x01;
        assert!(!verify(keypair.address(), &message, &TxSignature::from_bytes(bytes)));

        let mut digest_bytes = *message.as_bytes();
        digest_bytes[0] ^= 0x80;
        assert!(!verify(keypair.address(), &Hash256::from_bytes(digest_bytes), &signature));

        assert!(!verify(other.address(), &message, &signature));

        let mut pem = keypair.address().as_str().to_owned();
        pem.replace_range(40..41, if &pem[40..41] == "A" { "B" } else { "A" });
        assert!(!verify(&Address(pem), &message, &signature));
    }

    #[test]
    fn test_malformed_inputs_verify_false() {
        let keypair = Keypair::generate().unwrap();
        let message = digest(b"anything");

        assert!(!verify(keypair.address(), &message, &TxSignature::from_bytes(Vec::new())));
        assert!(!verify(&Address::new("not a key"), &message, &keypair.sign(&message).unwrap()));
    }

    #[test]
    fn test_private_key_pem_round_trip() {
        let keypair = Keypair::generate().unwrap();
        let pem = keypair.to_pkcs8_pem().unwrap();

        let restored = Keypair::from_pkcs8_pem(&pem).unwrap();
        assert_eq!(restored.address(), keypair.address());

        let message = digest(b"restored");
        assert!(verify(keypair.address(), &message, &restored.sign(&message).unwrap()));

        assert!(Keypair::from_pkcs8_pem("garbage").is_err());
    }
}
