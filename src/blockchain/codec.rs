use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur while producing canonical bytes
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
}

/// Number of bytes in a SHA-256 digest
pub const HASH_SIZE: usize = 32;

/// A SHA-256 digest, rendered as 64 lowercase hex characters
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Hash256([u8; HASH_SIZE]);

impl Hash256 {
    /// All-zero digest; the genesis block points at it
    pub const ZERO: Hash256 = Hash256([0u8; HASH_SIZE]);

    pub fn from_bytes(bytes: [u8; HASH_SIZE]) -> Self {
        Hash256(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Counts the leading zero hex characters of the digest
    pub fn leading_zero_nibbles(&self) -> u32 {
        let mut total = 0u32;
        for byte in self.0 {
            if byte == 0 {
                total += 2;
            } else {
                if byte < 0x10 {
                    total += 1;
                }
                break;
            }
        }
        total
    }

    /// Whether the first `difficulty` hex characters are all `'0'`
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_nibbles() >= difficulty
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl FromStr for Hash256 {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| CodecError::InvalidDigest(e.to_string()))?;
        let bytes: [u8; HASH_SIZE] = bytes.try_into().map_err(|_| {
            CodecError::InvalidDigest(format!("expected {} bytes", HASH_SIZE))
        })?;
        Ok(Hash256(bytes))
    }
}

impl Serialize for Hash256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Serializes `value` to compact JSON with object keys sorted at every depth.
///
/// The byte output depends only on the logical content of `value`, never on
/// struct field order or map iteration order, so any party rebuilding the same
/// value gets the same bytes.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    let value = serde_json::to_value(value)?;
    Ok(serde_json::to_vec(&sort_keys(value))?)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, sort_keys(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// SHA-256 of `bytes`
pub fn digest(bytes: &[u8]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Hash256(hasher.finalize().into())
}

/// Digest of the canonical form of `value`
pub fn hash_canonical<T: Serialize + ?Sized>(value: &T) -> Result<Hash256, CodecError> {
    Ok(digest(&canonical_bytes(value)?))
}
