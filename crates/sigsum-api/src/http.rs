//! A reqwest-backed [`Log`] implementation speaking the ASCII wire
//! protocol of spec.md §6 to a single log's base URL.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use sigsum_crypto::Hash;
use sigsum_protocol::{
    consistency_proof_from_ascii, inclusion_proof_from_ascii, leaves_from_ascii,
    CosignedTreeHead, Leaf, LeafRequest, SubmitHeader,
};
use sigsum_transparency::{ConsistencyProof, InclusionProof};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::log::{Log, LogError};
use crate::paths;

fn transport_err(e: reqwest::Error) -> LogError {
    LogError::Transport(Box::new(e))
}

#[derive(Debug)]
struct UnexpectedStatus(StatusCode);

impl fmt::Display for UnexpectedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unexpected HTTP status {}", self.0)
    }
}

impl std::error::Error for UnexpectedStatus {}

#[derive(Debug)]
struct MalformedBody {
    endpoint: &'static str,
    reason: String,
}

impl fmt::Display for MalformedBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "malformed response body from {}: {}",
            self.endpoint, self.reason
        )
    }
}

impl std::error::Error for MalformedBody {}

fn malformed(endpoint: &'static str, reason: impl ToString) -> LogError {
    LogError::Transport(Box::new(MalformedBody {
        endpoint,
        reason: reason.to_string(),
    }))
}

/// Maps a non-2xx status into the [`LogError`] category spec.md §6 names
/// for it; anything outside the explicitly mapped set is a transport
/// error.
fn status_to_error(status: StatusCode) -> LogError {
    match status {
        StatusCode::NOT_FOUND => LogError::NotFound,
        StatusCode::CONFLICT => LogError::Conflict,
        StatusCode::UNPROCESSABLE_ENTITY => LogError::UnprocessableEntity,
        other => LogError::Transport(Box::new(UnexpectedStatus(other))),
    }
}

/// An HTTP [`Log`] client for one log's base URL (which must end in `/`).
pub struct HttpLogClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpLogClient {
    /// Builds a client for the log at `base_url`, applying `request_timeout`
    /// to every individual HTTP request (distinct from the submit
    /// pipeline's overall `PerLogTimeout`).
    pub fn new(base_url: Url, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .expect("reqwest client configuration is valid");
        HttpLogClient { base_url, client }
    }

    fn url(&self, path: &str) -> Url {
        self.base_url
            .join(path)
            .expect("path builders never produce an invalid relative URL")
    }

    async fn get_ascii(&self, path: &str) -> Result<String, LogError> {
        let url = self.url(path);
        debug!(method = "GET", %url, "sending log request");
        let response = self.client.get(url.clone()).send().await.map_err(transport_err)?;
        let status = response.status();
        if status == StatusCode::OK {
            response.text().await.map_err(transport_err)
        } else {
            debug!(method = "GET", %url, %status, "log request returned non-2xx");
            Err(status_to_error(status))
        }
    }
}

#[async_trait]
impl Log for HttpLogClient {
    async fn get_tree_head(&self) -> Result<CosignedTreeHead, LogError> {
        let body = self.get_ascii(paths::get_tree_head()).await?;
        CosignedTreeHead::from_ascii(&body).map_err(|e| malformed("get-tree-head", e))
    }

    async fn get_inclusion_proof(
        &self,
        size: u64,
        leaf_hash: &Hash,
    ) -> Result<InclusionProof, LogError> {
        let path = paths::get_inclusion_proof(size, leaf_hash);
        let body = self.get_ascii(&path).await?;
        inclusion_proof_from_ascii(&body).map_err(|e| malformed("get-inclusion-proof", e))
    }

    async fn get_consistency_proof(
        &self,
        old_size: u64,
        new_size: u64,
    ) -> Result<ConsistencyProof, LogError> {
        let path = paths::get_consistency_proof(old_size, new_size);
        let body = self.get_ascii(&path).await?;
        consistency_proof_from_ascii(&body).map_err(|e| malformed("get-consistency-proof", e))
    }

    async fn get_leaves(&self, start: u64, end: u64) -> Result<Vec<Leaf>, LogError> {
        let path = paths::get_leaves(start, end);
        let body = self.get_ascii(&path).await?;
        leaves_from_ascii(&body).map_err(|e| malformed("get-leaves", e))
    }

    async fn add_leaf(
        &self,
        request: &LeafRequest,
        header: Option<&SubmitHeader>,
    ) -> Result<bool, LogError> {
        let url = self.url(paths::add_leaf());
        debug!(method = "POST", %url, "sending log request");
        let mut builder = self.client.post(url.clone()).body(request.to_ascii());
        if let Some(h) = header {
            builder = builder.header("Sigsum-Token", h.to_header_value());
        }
        let response = builder.send().await.map_err(transport_err)?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::ACCEPTED => Ok(false),
            other => {
                debug!(method = "POST", %url, status = %other, "log request returned non-2xx");
                Err(status_to_error(other))
            }
        }
    }
}
