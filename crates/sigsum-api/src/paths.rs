//! Endpoint paths of the Sigsum log's REST API (spec.md §6).

use sigsum_crypto::Hash;

/// The path of the "get tree head" endpoint.
pub fn get_tree_head() -> &'static str {
    "get-tree-head"
}

/// The path of the "get inclusion proof" endpoint.
pub fn get_inclusion_proof(size: u64, leaf_hash: &Hash) -> String {
    format!("get-inclusion-proof/{size}/{}", leaf_hash.to_hex())
}

/// The path of the "get consistency proof" endpoint.
pub fn get_consistency_proof(old_size: u64, new_size: u64) -> String {
    format!("get-consistency-proof/{old_size}/{new_size}")
}

/// The path of the "get leaves" endpoint.
pub fn get_leaves(start: u64, end: u64) -> String {
    format!("get-leaves/{start}/{end}")
}

/// The path of the "add leaf" endpoint.
pub fn add_leaf() -> &'static str {
    "add-leaf"
}
