//! Cryptographic primitives used by the Sigsum client core.
//!
//! This crate provides the fixed-size hash, signature, and public key types
//! along with the domain-separated byte encodings that every other crate in
//! the workspace signs or verifies over.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(unused_qualifications, missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

pub mod hash;
pub mod prefix;
pub mod signing;

pub use hash::Hash;
pub use signing::{PublicKey, Signature, Signer};
