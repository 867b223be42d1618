//! The `Log` capability (spec.md §4.5): a narrow interface over a log's
//! REST endpoints, with error categories the submit and monitor state
//! machines branch on.

use async_trait::async_trait;
use sigsum_crypto::Hash;
use sigsum_protocol::{CosignedTreeHead, Leaf, LeafRequest, SubmitHeader};
use sigsum_transparency::{ConsistencyProof, InclusionProof};
use thiserror::Error;

/// Errors a [`Log`] implementation returns, categorized the way spec.md
/// §4.5/§7 requires so callers can branch on the category rather than on
/// transport details.
#[derive(Error, Debug)]
pub enum LogError {
    /// The requested object does not exist yet (e.g. no inclusion proof at
    /// this tree size, or no leaves yet at this range). Retryable.
    #[error("not found")]
    NotFound,
    /// A witness rejected an old-size conflict (HTTP 409).
    #[error("conflict")]
    Conflict,
    /// The server rejected the request as unprocessable (HTTP 422). Not
    /// retryable.
    #[error("unprocessable entity")]
    UnprocessableEntity,
    /// A transport-level failure (timeout, connection error, unexpected
    /// status code, malformed response body). Retryable at the caller's
    /// discretion.
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LogError {
    /// Whether the submit/monitor state machines should retry this log
    /// rather than treat it as failed (spec.md §7: retryable transport
    /// failures and `NotFound` while polling).
    pub fn is_retryable(&self) -> bool {
        matches!(self, LogError::NotFound | LogError::Transport(_))
    }
}

/// A log's REST API, narrowed to the operations the submit pipeline and
/// monitor need. Implementations must map HTTP status codes precisely
/// (spec.md §6): `200`→success, `202`→`persisted=false`, `404`→`NotFound`,
/// `409`→`Conflict`, `422`→`UnprocessableEntity`, other 4xx/5xx→`Transport`.
#[async_trait]
pub trait Log: Send + Sync {
    /// Fetches the log's current cosigned tree head.
    async fn get_tree_head(&self) -> Result<CosignedTreeHead, LogError>;

    /// Fetches an inclusion proof for `leaf_hash` in a tree of size `size`.
    async fn get_inclusion_proof(
        &self,
        size: u64,
        leaf_hash: &Hash,
    ) -> Result<InclusionProof, LogError>;

    /// Fetches a consistency proof from `old_size` to `new_size`.
    async fn get_consistency_proof(
        &self,
        old_size: u64,
        new_size: u64,
    ) -> Result<ConsistencyProof, LogError>;

    /// Fetches leaves `[start, end)`.
    async fn get_leaves(&self, start: u64, end: u64) -> Result<Vec<Leaf>, LogError>;

    /// Submits a leaf request, optionally bearing a rate-limit token.
    /// Returns `true` once the log reports the leaf as persisted (HTTP
    /// `200`); `false` while it is only queued (HTTP `202`).
    async fn add_leaf(
        &self,
        request: &LeafRequest,
        header: Option<&SubmitHeader>,
    ) -> Result<bool, LogError>;
}
