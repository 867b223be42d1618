//! RFC 9162 Merkle tree mathematics used by Sigsum logs: leaf/node hashing,
//! incremental root tracking, and inclusion/consistency proof generation and
//! verification.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(unused_qualifications, missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

mod proof;
mod tree;

pub use proof::{
    prove_consistency, prove_inclusion, verify_consistency, verify_inclusion, ConsistencyProof,
    InclusionProof, MerkleError,
};
pub use tree::IncrementalTree;

use sigsum_crypto::Hash;

/// Domain-separation tag prepended to leaf data before hashing (RFC 9162 §2.1).
const LEAF_TAG: u8 = 0x00;
/// Domain-separation tag prepended to a pair of child hashes before hashing.
const NODE_TAG: u8 = 0x01;

/// Hashes `data` as a Merkle tree leaf.
///
/// Sigsum leaves sign over `checksum || key_hash || signature`; this
/// function is generic over that payload, matching the domain-separated
/// hashing used throughout `sigsum-crypto`.
pub fn leaf_hash(data: &[u8]) -> Hash {
    let mut buf = Vec::with_capacity(1 + data.len());
    buf.push(LEAF_TAG);
    buf.extend_from_slice(data);
    Hash::of(&buf)
}

/// Hashes two child hashes into their parent.
pub fn node_hash(left: &Hash, right: &Hash) -> Hash {
    let mut buf = [0u8; 1 + 32 + 32];
    buf[0] = NODE_TAG;
    buf[1..33].copy_from_slice(left.as_bytes());
    buf[33..65].copy_from_slice(right.as_bytes());
    Hash::of(&buf)
}

/// Returns the largest power of two that is strictly smaller than `n`.
///
/// Requires `n >= 2`.
fn largest_pow2_lt(n: u64) -> u64 {
    debug_assert!(n >= 2);
    1u64 << (63 - (n - 1).leading_zeros())
}

/// The Merkle tree hash of a (possibly empty) list of leaf hashes, per the
/// `MTH` function of RFC 9162 §2.1. `MTH({}) = SHA-256("")`.
pub fn root_from_leaves(leaf_hashes: &[Hash]) -> Hash {
    subtree_hash(leaf_hashes)
}

fn subtree_hash(leaves: &[Hash]) -> Hash {
    match leaves.len() {
        0 => Hash::of(&[]),
        1 => leaves[0],
        n => {
            let k = largest_pow2_lt(n as u64) as usize;
            let left = subtree_hash(&leaves[..k]);
            let right = subtree_hash(&leaves[k..]);
            node_hash(&left, &right)
        }
    }
}

#[cfg(test)]
mod lib_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_largest_pow2_lt() {
        assert_eq!(largest_pow2_lt(2), 1);
        assert_eq!(largest_pow2_lt(3), 2);
        assert_eq!(largest_pow2_lt(4), 2);
        assert_eq!(largest_pow2_lt(5), 4);
        assert_eq!(largest_pow2_lt(8), 4);
        assert_eq!(largest_pow2_lt(9), 8);
    }

    #[test]
    fn test_empty_root_is_hash_of_empty_string() {
        assert_eq!(root_from_leaves(&[]), Hash::of(&[]));
    }

    #[test]
    fn test_single_leaf_root_is_leaf_hash() {
        let h = leaf_hash(b"x");
        assert_eq!(root_from_leaves(&[h]), h);
    }
}
