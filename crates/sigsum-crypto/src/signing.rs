//! ed25519 signing and verification.

use crate::hash::Hash;
use ed25519_dalek::{Signer as _, Verifier as _};
use rand_core::OsRng;
use std::fmt;
use thiserror::Error;

/// The length in bytes of a [`PublicKey`].
pub const PUBLIC_KEY_LEN: usize = 32;
/// The length in bytes of a [`Signature`].
pub const SIGNATURE_LEN: usize = 64;

/// An ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

/// An ed25519 signature.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature([u8; SIGNATURE_LEN]);

/// Errors returned while parsing or verifying with a [`PublicKey`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PublicKeyError {
    /// The input was not exactly [`PUBLIC_KEY_LEN`] bytes long.
    #[error("expected {PUBLIC_KEY_LEN} bytes for a public key, got {actual}")]
    IncorrectLength {
        /// The number of bytes actually provided.
        actual: usize,
    },
    /// The bytes do not encode a valid point on the curve.
    #[error("malformed ed25519 public key")]
    Malformed,
    /// The input was not valid lowercase hex.
    #[error("invalid hex encoding for public key: {0}")]
    InvalidHex(String),
    /// Signature verification failed.
    #[error("signature verification failed")]
    BadSignature,
}

/// Errors returned while parsing a [`Signature`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SignatureParseError {
    /// The input was not exactly [`SIGNATURE_LEN`] bytes long.
    #[error("expected {SIGNATURE_LEN} bytes for a signature, got {actual}")]
    IncorrectLength {
        /// The number of bytes actually provided.
        actual: usize,
    },
    /// The input was not valid lowercase hex.
    #[error("invalid hex encoding for signature: {0}")]
    InvalidHex(String),
}

impl PublicKey {
    /// Returns the raw bytes of this key.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    /// Returns the lowercase hex encoding of this key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a public key from a lowercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, PublicKeyError> {
        let bytes = hex::decode(s).map_err(|_| PublicKeyError::InvalidHex(s.to_owned()))?;
        Self::try_from(bytes.as_slice())
    }

    /// SHA-256 of the key's raw bytes, used throughout the protocol to
    /// identify a key without revealing it (`key_hash`).
    pub fn key_hash(&self) -> Hash {
        Hash::of(&self.0)
    }

    /// Verifies `signature` over `msg` under this key.
    pub fn verify(&self, msg: &[u8], signature: &Signature) -> Result<(), PublicKeyError> {
        let key = ed25519_dalek::VerifyingKey::from_bytes(&self.0)
            .map_err(|_| PublicKeyError::Malformed)?;
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        key.verify(msg, &sig)
            .map_err(|_| PublicKeyError::BadSignature)
    }
}

impl TryFrom<&[u8]> for PublicKey {
    type Error = PublicKeyError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != PUBLIC_KEY_LEN {
            return Err(PublicKeyError::IncorrectLength {
                actual: value.len(),
            });
        }
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes.copy_from_slice(value);
        // Validate it decompresses to a point on the curve eagerly, so a
        // malformed key is rejected at parse time rather than at first use.
        ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|_| PublicKeyError::Malformed)?;
        Ok(PublicKey(bytes))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl Signature {
    /// Returns the raw bytes of this signature.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }

    /// Returns the lowercase hex encoding of this signature.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a signature from a lowercase hex string.
    pub fn from_hex(s: &str) -> Result<Self, SignatureParseError> {
        let bytes = hex::decode(s).map_err(|_| SignatureParseError::InvalidHex(s.to_owned()))?;
        Self::try_from(bytes.as_slice())
    }
}

impl TryFrom<&[u8]> for Signature {
    type Error = SignatureParseError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        if value.len() != SIGNATURE_LEN {
            return Err(SignatureParseError::IncorrectLength {
                actual: value.len(),
            });
        }
        let mut bytes = [0u8; SIGNATURE_LEN];
        bytes.copy_from_slice(value);
        Ok(Signature(bytes))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

/// Capability to produce ed25519 signatures, abstracted so that an
/// OpenSSH key file or an ssh-agent connection can stand in for an
/// in-memory key without either living in this crate (see spec.md §1).
pub trait Signer {
    /// Signs `msg` and returns the resulting signature.
    fn sign(&self, msg: &[u8]) -> Signature;

    /// Returns the public key matching this signer's private key.
    fn public_key(&self) -> PublicKey;
}

/// An in-memory ed25519 signer, typically used in tests or by callers that
/// already hold a decoded private key.
pub struct Ed25519Signer(ed25519_dalek::SigningKey);

impl Ed25519Signer {
    /// Wraps a raw 32-byte ed25519 seed.
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Ed25519Signer(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// Generates a fresh keypair.
    pub fn generate() -> Self {
        Ed25519Signer(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }
}

impl Signer for Ed25519Signer {
    fn sign(&self, msg: &[u8]) -> Signature {
        let sig = self.0.sign(msg);
        Signature(sig.to_bytes())
    }

    fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key().to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correct_key_passes_verify() {
        let signer = Ed25519Signer::generate();
        let msg = b"the quick brown fox";
        let sig = signer.sign(msg);
        signer.public_key().verify(msg, &sig).unwrap();
    }

    #[test]
    fn test_wrong_key_fails_verify() {
        let alice = Ed25519Signer::generate();
        let bob = Ed25519Signer::generate();
        let msg = b"hello";
        let sig = alice.sign(msg);
        assert!(bob.public_key().verify(msg, &sig).is_err());
    }

    #[test]
    fn test_flipped_signature_byte_fails() {
        let signer = Ed25519Signer::generate();
        let msg = b"hello";
        let mut sig = signer.sign(msg);
        sig.0[0] ^= 0x01;
        assert!(signer.public_key().verify(msg, &sig).is_err());
    }

    #[test]
    fn test_hex_roundtrip() {
        let signer = Ed25519Signer::generate();
        let pk = signer.public_key();
        assert_eq!(PublicKey::from_hex(&pk.to_hex()).unwrap(), pk);
    }
}
