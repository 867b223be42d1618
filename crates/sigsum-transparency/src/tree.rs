//! Incremental (append-only) Merkle tree root tracking.
//!
//! Mirrors the "compact range" representation used by most Certificate
//! Transparency style logs: the tree keeps one hash per maximal complete
//! subtree currently on its right spine, so appending a leaf is amortized
//! O(log n) instead of recomputing the whole tree.

use crate::node_hash;
use sigsum_crypto::Hash;

/// An append-only Merkle tree that tracks its current root without storing
/// the full leaf history.
#[derive(Clone, Debug, Default)]
pub struct IncrementalTree {
    /// One entry per maximal complete subtree on the right spine, ordered
    /// left to right (largest/oldest subtree first). `stack[i].0` is the
    /// subtree's height.
    stack: Vec<(u32, Hash)>,
    size: u64,
}

impl IncrementalTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a tree by appending every hash in `leaf_hashes` in order.
    pub fn from_leaves(leaf_hashes: &[Hash]) -> Self {
        let mut tree = Self::new();
        for h in leaf_hashes {
            tree.push(*h);
        }
        tree
    }

    /// The number of leaves appended so far.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Appends a leaf hash (as produced by [`crate::leaf_hash`]) to the tree.
    pub fn push(&mut self, leaf_hash: Hash) {
        self.stack.push((0, leaf_hash));
        self.size += 1;
        while self.stack.len() >= 2 {
            let (h1, hash1) = self.stack[self.stack.len() - 1];
            let (h2, hash2) = self.stack[self.stack.len() - 2];
            if h1 != h2 {
                break;
            }
            self.stack.pop();
            self.stack.pop();
            self.stack.push((h1 + 1, node_hash(&hash2, &hash1)));
        }
    }

    /// The current tree head hash (`MTH` of every leaf appended so far).
    pub fn root(&self) -> Hash {
        match self.stack.split_last() {
            None => Hash::of(&[]),
            Some((last, rest)) => {
                let mut acc = last.1;
                for (_, h) in rest.iter().rev() {
                    acc = node_hash(h, &acc);
                }
                acc
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_matches_batch_root_for_many_sizes() {
        let leaves: Vec<Hash> = (0..64u32).map(|i| Hash::of(&i.to_be_bytes())).collect();
        let mut tree = IncrementalTree::new();
        for (i, h) in leaves.iter().enumerate() {
            tree.push(*h);
            assert_eq!(tree.size(), i as u64 + 1);
            assert_eq!(tree.root(), crate::root_from_leaves(&leaves[..=i]));
        }
    }

    #[test]
    fn test_empty_tree_root() {
        let tree = IncrementalTree::new();
        assert_eq!(tree.root(), Hash::of(&[]));
        assert_eq!(tree.size(), 0);
    }

    #[test]
    fn test_from_leaves_matches_incremental_push() {
        let leaves: Vec<Hash> = (0..17u32).map(|i| Hash::of(&i.to_be_bytes())).collect();
        let bulk = IncrementalTree::from_leaves(&leaves);
        let mut incremental = IncrementalTree::new();
        for h in &leaves {
            incremental.push(*h);
        }
        assert_eq!(bulk.root(), incremental.root());
        assert_eq!(bulk.size(), incremental.size());
    }
}
