//! Tunables for the submit pipeline and monitor (spec.md §4.6/§4.7).
//!
//! These are plain structs with [`Default`] impls, not a CLI flag parser:
//! flag parsing is out of scope (spec.md §1) and left to embedding
//! binaries.

use sigsum_crypto::Signer;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for [`crate::submit::submit_leaf_request`] and [`crate::submit::Batch`].
#[derive(Clone)]
pub struct SubmitConfig {
    /// Deadline for a single log to persist a leaf and produce a
    /// verifiable inclusion proof, starting when that log is first tried.
    /// Default 45 seconds, per spec.md §4.6.
    pub per_log_timeout: Duration,
    /// How long to sleep between polls of a log that has not yet
    /// persisted a leaf or produced an inclusion proof. Default 2 seconds,
    /// per spec.md §4.6.
    pub poll_delay: Duration,
    /// The rate-limit signer and domain, if this submitter has been
    /// assigned a rate-limit quota. When set, every `add_leaf` call
    /// carries a `Sigsum-Token` header (spec.md §4.6 step 1).
    pub rate_limit: Option<RateLimitConfig>,
}

impl Default for SubmitConfig {
    fn default() -> Self {
        SubmitConfig {
            per_log_timeout: Duration::from_secs(45),
            poll_delay: Duration::from_secs(2),
            rate_limit: None,
        }
    }
}

/// The signer and domain used to mint a `Sigsum-Token` per spec.md §4.6/§4.8.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Signs the submit token over each log's public key.
    pub signer: Arc<dyn Signer + Send + Sync>,
    /// The domain presented alongside the token, which a log verifies via
    /// DNS (spec.md §4.8).
    pub domain: String,
}

/// Tunables for [`crate::monitor::Monitor`].
#[derive(Clone, Copy)]
pub struct MonitorConfig {
    /// How often each per-log task polls for a new tree head. Spec.md
    /// §4.7 names this `QueryInterval` with no fixed default; 30 seconds
    /// matches the poll cadence a human operator would pick for a public
    /// transparency log.
    pub query_interval: Duration,
    /// The maximum number of leaves fetched per `get-leaves` call while
    /// catching up to a new tree head (spec.md §4.7 step 2d, `B`).
    pub leaf_batch_size: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            query_interval: Duration::from_secs(30),
            leaf_batch_size: 256,
        }
    }
}
