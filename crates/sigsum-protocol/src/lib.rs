//! Sigsum wire types: the ASCII codec, the core signed types (leaves, tree
//! heads, cosignatures), witness policy evaluation, the composite
//! `SigsumProof`, and the submit-token format.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(unused_qualifications, missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

mod ascii;
mod policy;
mod proof;
mod token;
mod types;

pub use ascii::{Emitter, ParseError, Parser};
pub use policy::{LogEntry, Policy, PolicyError, PolicyParseError, QuorumRule};
pub use proof::{
    consistency_proof_from_ascii, consistency_proof_to_ascii, inclusion_proof_from_ascii,
    inclusion_proof_to_ascii, ProofParseError, ShortLeaf, SigsumProof, VerifyError,
    VERSION_CURRENT, VERSION_LEGACY,
};
pub use token::{
    make_token, normalize_domain, verify_token, DomainError, SubmitHeader, SubmitHeaderParseError,
    TokenError, TOKEN_NAMESPACE_CURRENT, TOKEN_NAMESPACE_LEGACY,
};
pub use types::{
    leaves_from_ascii, leaves_to_ascii, Cosignature, CosignedTreeHead, Leaf, LeafMessage,
    LeafRequest, SignedTreeHead, TreeHead,
};
