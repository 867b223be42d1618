//! Fixed-size SHA-256 hash values.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The length in bytes of a [`Hash`].
pub const HASH_LEN: usize = 32;

/// A SHA-256 digest.
///
/// Hashes are compared by value and are always displayed and parsed as
/// lowercase hex, matching the wire encoding used by the ASCII codec.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash([u8; HASH_LEN]);

/// Errors returned while constructing a [`Hash`] from untrusted bytes.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashError {
    /// The input was not exactly [`HASH_LEN`] bytes long.
    #[error("expected {HASH_LEN} bytes for a hash, got {actual}")]
    IncorrectLength {
        /// The number of bytes actually provided.
        actual: usize,
    },
    /// The input was not valid lowercase hex.
    #[error("invalid hex encoding for hash: {0}")]
    InvalidHex(String),
}

impl Hash {
    /// Hashes `data` with SHA-256.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Hash(bytes)
    }

    /// Returns the raw bytes of this hash.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Returns the lowercase hex encoding of this hash.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hash from a lowercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(s).map_err(|_| HashError::InvalidHex(s.to_owned()))?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for Hash {
    type Error = HashError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != HASH_LEN {
            return Err(HashError::IncorrectLength {
                actual: value.len(),
            });
        }
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(value);
        Ok(Hash(bytes))
    }
}

impl TryFrom<Vec<u8>> for Hash {
    type Error = HashError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from(value.as_slice())
    }
}

impl From<[u8; HASH_LEN]> for Hash {
    fn from(bytes: [u8; HASH_LEN]) -> Self {
        Hash(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl FromStr for Hash {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_roundtrip_hex() {
        let h = Hash::of(b"hello");
        let s = h.to_hex();
        assert_eq!(Hash::from_hex(&s).unwrap(), h);
    }

    #[test]
    fn test_rejects_wrong_length() {
        let err = Hash::try_from(&b"too-short"[..]).unwrap_err();
        assert_eq!(
            err,
            HashError::IncorrectLength {
                actual: "too-short".len()
            }
        );
    }

    #[test]
    fn test_distinct_inputs_distinct_hashes() {
        assert_ne!(Hash::of(b"a"), Hash::of(b"b"));
    }
}
