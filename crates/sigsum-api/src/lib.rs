//! The `Log` capability and its HTTP transport (spec.md §4.5/§6): a typed
//! client wrapping a Sigsum log's REST endpoints, with error categories the
//! submit and monitor state machines branch on.

#![warn(rust_2018_idioms, unused_lifetimes)]
#![warn(unused_qualifications, missing_docs)]
#![warn(clippy::all)]
#![forbid(unsafe_code)]

mod http;
mod log;
mod paths;

pub use http::HttpLogClient;
pub use log::{Log, LogError};
pub use paths::{add_leaf, get_consistency_proof, get_inclusion_proof, get_leaves, get_tree_head};
