//! Inclusion and consistency proofs, per RFC 9162 §2.1.1 and §2.1.2.

use crate::{largest_pow2_lt, node_hash, subtree_hash};
use sigsum_crypto::Hash;
use thiserror::Error;

/// Errors returned while generating or verifying a Merkle proof.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerkleError {
    /// The requested leaf index does not exist in a tree of the given size.
    #[error("leaf index {index} is out of range for a tree of size {size}")]
    IndexOutOfRange {
        /// The out-of-range index.
        index: u64,
        /// The tree size it was checked against.
        size: u64,
    },
    /// `old_size` is larger than `new_size`.
    #[error("old tree size {old_size} is larger than new tree size {new_size}")]
    SizesOutOfOrder {
        /// The claimed old size.
        old_size: u64,
        /// The claimed new size.
        new_size: u64,
    },
    /// The inclusion proof is malformed, too short, too long, or does not
    /// recompute to the claimed root.
    #[error("malformed or inconsistent inclusion proof")]
    InvalidInclusionProof,
    /// The consistency proof is malformed, too short, too long, or does not
    /// recompute to the claimed roots.
    #[error("malformed or inconsistent consistency proof")]
    InvalidConsistencyProof,
}

/// Proof that a leaf at `leaf_index` is present in a tree of some size,
/// as a bottom-up list of sibling hashes (RFC 9162's `PATH`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InclusionProof {
    /// Zero-based index of the leaf within the tree.
    pub leaf_index: u64,
    /// Sibling hashes, in the order `PATH` produces them.
    pub path: Vec<Hash>,
}

/// Proof that a tree of size `old_size` is a prefix of a tree of size
/// `new_size`, as a list of hashes (RFC 9162's `PROOF`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsistencyProof {
    /// The proof hashes, in the order `PROOF` produces them.
    pub path: Vec<Hash>,
}

/// Builds the audit path for `leaf_index` within `leaves`.
pub fn prove_inclusion(leaves: &[Hash], leaf_index: u64) -> Result<InclusionProof, MerkleError> {
    let size = leaves.len() as u64;
    if leaf_index >= size {
        return Err(MerkleError::IndexOutOfRange {
            index: leaf_index,
            size,
        });
    }
    Ok(InclusionProof {
        leaf_index,
        path: audit_path(leaves, leaf_index as usize),
    })
}

fn audit_path(leaves: &[Hash], index: usize) -> Vec<Hash> {
    let n = leaves.len();
    if n == 1 {
        return Vec::new();
    }
    let k = largest_pow2_lt(n as u64) as usize;
    if index < k {
        let mut path = audit_path(&leaves[..k], index);
        path.push(subtree_hash(&leaves[k..]));
        path
    } else {
        let mut path = vec![subtree_hash(&leaves[..k])];
        path.extend(audit_path(&leaves[k..], index - k));
        path
    }
}

/// Verifies that `leaf_hash` at `leaf_index` is included in the tree of
/// size `tree_size` with root `root_hash`, per `proof`.
pub fn verify_inclusion(
    leaf_hash: &Hash,
    leaf_index: u64,
    tree_size: u64,
    root_hash: &Hash,
    proof: &InclusionProof,
) -> Result<(), MerkleError> {
    if leaf_index != proof.leaf_index || leaf_index >= tree_size {
        return Err(MerkleError::IndexOutOfRange {
            index: leaf_index,
            size: tree_size,
        });
    }
    let computed = root_from_inclusion(leaf_hash, leaf_index, tree_size, &proof.path)?;
    if computed != *root_hash {
        return Err(MerkleError::InvalidInclusionProof);
    }
    Ok(())
}

fn root_from_inclusion(
    leaf_hash: &Hash,
    index: u64,
    size: u64,
    path: &[Hash],
) -> Result<Hash, MerkleError> {
    if size == 1 {
        return if path.is_empty() {
            Ok(*leaf_hash)
        } else {
            Err(MerkleError::InvalidInclusionProof)
        };
    }
    let k = largest_pow2_lt(size);
    if index < k {
        let (rest, last) = path
            .split_last()
            .map(|(last, rest)| (rest, last))
            .ok_or(MerkleError::InvalidInclusionProof)?;
        let left = root_from_inclusion(leaf_hash, index, k, rest)?;
        Ok(node_hash(&left, last))
    } else {
        let (first, rest) = path
            .split_first()
            .ok_or(MerkleError::InvalidInclusionProof)?;
        let right = root_from_inclusion(leaf_hash, index - k, size - k, rest)?;
        Ok(node_hash(first, &right))
    }
}

/// Builds the consistency proof between `old_size` and `new_size` from the
/// full leaf list of the (current, size `new_size` or larger) tree.
pub fn prove_consistency(
    leaves: &[Hash],
    old_size: u64,
    new_size: u64,
) -> Result<ConsistencyProof, MerkleError> {
    if old_size > new_size {
        return Err(MerkleError::SizesOutOfOrder { old_size, new_size });
    }
    if new_size as usize > leaves.len() {
        return Err(MerkleError::IndexOutOfRange {
            index: new_size,
            size: leaves.len() as u64,
        });
    }
    if old_size == 0 || old_size == new_size {
        return Ok(ConsistencyProof { path: Vec::new() });
    }
    Ok(ConsistencyProof {
        path: subproof(old_size, &leaves[..new_size as usize], true),
    })
}

fn subproof(old_size: u64, leaves: &[Hash], exact: bool) -> Vec<Hash> {
    let n = leaves.len() as u64;
    if old_size == n {
        return if exact {
            Vec::new()
        } else {
            vec![subtree_hash(leaves)]
        };
    }
    let k = largest_pow2_lt(n);
    if old_size <= k {
        let mut path = subproof(old_size, &leaves[..k as usize], exact);
        path.push(subtree_hash(&leaves[k as usize..]));
        path
    } else {
        let mut path = subproof(old_size - k, &leaves[k as usize..], false);
        path.push(subtree_hash(&leaves[..k as usize]));
        path
    }
}

/// Verifies that a tree of `old_size` with root `old_root` is a prefix of a
/// tree of `new_size` with root `new_root`, per `proof`.
pub fn verify_consistency(
    old_size: u64,
    new_size: u64,
    old_root: &Hash,
    new_root: &Hash,
    proof: &ConsistencyProof,
) -> Result<(), MerkleError> {
    if old_size > new_size {
        return Err(MerkleError::SizesOutOfOrder { old_size, new_size });
    }
    if old_size == 0 {
        return if proof.path.is_empty() {
            Ok(())
        } else {
            Err(MerkleError::InvalidConsistencyProof)
        };
    }
    if old_size == new_size {
        return if proof.path.is_empty() && old_root == new_root {
            Ok(())
        } else {
            Err(MerkleError::InvalidConsistencyProof)
        };
    }
    let (computed_old, computed_new) =
        verify_subproof(old_size, new_size, &proof.path, true, old_root)?;
    if computed_old != *old_root || computed_new != *new_root {
        return Err(MerkleError::InvalidConsistencyProof);
    }
    Ok(())
}

fn verify_subproof(
    old_size: u64,
    n: u64,
    path: &[Hash],
    exact: bool,
    old_root: &Hash,
) -> Result<(Hash, Hash), MerkleError> {
    if old_size == n {
        return if exact {
            if path.is_empty() {
                Ok((*old_root, *old_root))
            } else {
                Err(MerkleError::InvalidConsistencyProof)
            }
        } else {
            match path {
                [h] => Ok((*h, *h)),
                _ => Err(MerkleError::InvalidConsistencyProof),
            }
        };
    }
    let k = largest_pow2_lt(n);
    let (rest, last) = path
        .split_last()
        .map(|(last, rest)| (rest, last))
        .ok_or(MerkleError::InvalidConsistencyProof)?;
    if old_size <= k {
        let (old_l, new_l) = verify_subproof(old_size, k, rest, exact, old_root)?;
        Ok((old_l, node_hash(&new_l, last)))
    } else {
        let (old_r, new_r) = verify_subproof(old_size - k, n - k, rest, false, old_root)?;
        Ok((node_hash(last, &old_r), node_hash(last, &new_r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn leaves(n: usize) -> Vec<Hash> {
        (0..n).map(|i| Hash::of(&[i as u8])).collect()
    }

    #[test]
    fn test_inclusion_roundtrip_every_index() {
        for size in [1usize, 2, 3, 4, 5, 7, 8, 16, 17] {
            let ls = leaves(size);
            let root = crate::root_from_leaves(&ls);
            for index in 0..size {
                let proof = prove_inclusion(&ls, index as u64).unwrap();
                verify_inclusion(&ls[index], index as u64, size as u64, &root, &proof).unwrap();
            }
        }
    }

    #[test]
    fn test_inclusion_proof_length_matches_spec_example() {
        // A tree of 4 leaves has inclusion proofs of length 2.
        let ls = leaves(4);
        let proof = prove_inclusion(&ls, 2).unwrap();
        assert_eq!(proof.path.len(), 2);
    }

    #[test]
    fn test_inclusion_index_out_of_range() {
        let ls = leaves(4);
        assert_eq!(
            prove_inclusion(&ls, 4).unwrap_err(),
            MerkleError::IndexOutOfRange { index: 4, size: 4 }
        );
    }

    #[test]
    fn test_inclusion_rejects_wrong_leaf_hash() {
        let ls = leaves(8);
        let root = crate::root_from_leaves(&ls);
        let proof = prove_inclusion(&ls, 3).unwrap();
        let wrong_leaf = Hash::of(b"not-the-leaf");
        assert_eq!(
            verify_inclusion(&wrong_leaf, 3, 8, &root, &proof).unwrap_err(),
            MerkleError::InvalidInclusionProof
        );
    }

    #[test]
    fn test_inclusion_rejects_truncated_path() {
        let ls = leaves(8);
        let root = crate::root_from_leaves(&ls);
        let mut proof = prove_inclusion(&ls, 3).unwrap();
        proof.path.pop();
        assert_eq!(
            verify_inclusion(&ls[3], 3, 8, &root, &proof).unwrap_err(),
            MerkleError::InvalidInclusionProof
        );
    }

    #[test]
    fn test_inclusion_rejects_extended_path() {
        let ls = leaves(8);
        let root = crate::root_from_leaves(&ls);
        let mut proof = prove_inclusion(&ls, 3).unwrap();
        proof.path.push(Hash::of(b"garbage"));
        assert_eq!(
            verify_inclusion(&ls[3], 3, 8, &root, &proof).unwrap_err(),
            MerkleError::InvalidInclusionProof
        );
    }

    #[test]
    fn test_consistency_roundtrip_many_sizes() {
        let ls = leaves(20);
        for old_size in 0..=20u64 {
            for new_size in old_size..=20u64 {
                let old_root = crate::root_from_leaves(&ls[..old_size as usize]);
                let new_root = crate::root_from_leaves(&ls[..new_size as usize]);
                let proof = prove_consistency(&ls, old_size, new_size).unwrap();
                verify_consistency(old_size, new_size, &old_root, &new_root, &proof).unwrap();
            }
        }
    }

    #[test]
    fn test_consistency_from_empty_tree_is_always_empty_proof() {
        let ls = leaves(5);
        let proof = prove_consistency(&ls, 0, 5).unwrap();
        assert!(proof.path.is_empty());
    }

    #[test]
    fn test_consistency_to_same_size_is_empty_proof() {
        let ls = leaves(5);
        let proof = prove_consistency(&ls, 5, 5).unwrap();
        assert!(proof.path.is_empty());
    }

    #[test]
    fn test_consistency_rejects_sizes_out_of_order() {
        let ls = leaves(5);
        assert_eq!(
            prove_consistency(&ls, 4, 2).unwrap_err(),
            MerkleError::SizesOutOfOrder {
                old_size: 4,
                new_size: 2
            }
        );
    }

    #[test]
    fn test_consistency_rejects_wrong_new_root() {
        let ls = leaves(10);
        let old_root = crate::root_from_leaves(&ls[..4]);
        let wrong_new_root = Hash::of(b"forged");
        let proof = prove_consistency(&ls, 4, 10).unwrap();
        assert_eq!(
            verify_consistency(4, 10, &old_root, &wrong_new_root, &proof).unwrap_err(),
            MerkleError::InvalidConsistencyProof
        );
    }
}
