//! Single-shot leaf submission (spec.md §4.6 "Single-shot algorithm").
//!
//! The long-lived, multiplexed [`crate::batch::Batch`] surface lives in the
//! sibling `batch` module and reuses [`LogTarget`]/[`SubmitError`] from
//! here.

use rand::seq::SliceRandom;
use sigsum_api::{Log, LogError};
use sigsum_protocol::{
    make_token, CosignedTreeHead, LeafRequest, Policy, SigsumProof, SubmitHeader,
};
use sigsum_transparency::verify_inclusion;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SubmitConfig;
use sigsum_crypto::Hash;

/// One log this submitter is willing to try, paired with the client that
/// talks to it.
#[derive(Clone)]
pub struct LogTarget {
    /// `H(log public key)`.
    pub log_key_hash: Hash,
    /// The log's REST client.
    pub client: Arc<dyn Log>,
}

/// Errors returned by [`submit_leaf_request`] and surfaced to
/// [`crate::batch::Batch`] item callbacks.
#[derive(Error, Debug)]
pub enum SubmitError {
    /// Every log in the policy failed (spec.md §4.6: "If all logs fail,
    /// return AllLogsFailed").
    #[error("submission failed against every configured log")]
    AllLogsFailed,
    /// The ambient context/deadline was cancelled before a proof could be
    /// assembled.
    #[error("submission was cancelled")]
    Cancelled,
    /// No logs were configured to try.
    #[error("policy names no logs with a URL to submit to")]
    NoLogs,
}

/// Why a single log was abandoned; used only for diagnostics (`tracing`),
/// never returned to the caller directly — the pipeline fails over instead.
#[derive(Debug)]
enum LogAttemptError {
    Log(LogError),
    Policy(sigsum_protocol::PolicyError),
    Inclusion(sigsum_transparency::MerkleError),
    Cancelled,
}

impl From<LogError> for LogAttemptError {
    fn from(e: LogError) -> Self {
        LogAttemptError::Log(e)
    }
}

/// Sleeps for `dur`, returning early (without error) if `cancel` fires
/// first. The caller distinguishes the two outcomes via the return value.
async fn cancellable_sleep(dur: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Builds the `Sigsum-Token` header for `log_key_hash`, if a rate-limit
/// signer and domain are configured (spec.md §4.6 step 1).
fn rate_limit_header(
    config: &SubmitConfig,
    log_public_key: &sigsum_crypto::PublicKey,
) -> Option<SubmitHeader> {
    let rl = config.rate_limit.as_ref()?;
    let token = make_token(&*rl.signer, log_public_key);
    Some(SubmitHeader {
        domain: rl.domain.clone(),
        token,
    })
}

/// Submits `request` to one or more of `policy`'s logs (in randomized
/// order) until one of them produces a verifiable inclusion proof, per
/// spec.md §4.6.
///
/// `cancel` bounds the whole call; each log additionally gets its own
/// `config.per_log_timeout` deadline.
pub async fn submit_leaf_request(
    policy: &Policy,
    logs: &[LogTarget],
    request: &LeafRequest,
    config: &SubmitConfig,
    cancel: &CancellationToken,
) -> Result<SigsumProof, SubmitError> {
    if logs.is_empty() {
        return Err(SubmitError::NoLogs);
    }
    let mut order: Vec<&LogTarget> = logs.iter().collect();
    order.shuffle(&mut rand::thread_rng());

    for target in order {
        if cancel.is_cancelled() {
            return Err(SubmitError::Cancelled);
        }
        let Some(log_entry) = policy.log(&target.log_key_hash) else {
            // Not one of the policy's trusted logs; skip rather than fail.
            continue;
        };
        let header = rate_limit_header(config, &log_entry.public_key);

        let attempt = tokio::time::timeout(
            config.per_log_timeout,
            try_one_log(policy, target, request, header.as_ref(), config, cancel),
        )
        .await;

        match attempt {
            Ok(Ok(proof)) => return Ok(proof),
            Ok(Err(LogAttemptError::Cancelled)) => return Err(SubmitError::Cancelled),
            Ok(Err(e)) => {
                warn!(log = %target.log_key_hash, error = ?e, "log failed, trying next");
            }
            Err(_) => {
                warn!(log = %target.log_key_hash, "log timed out, trying next");
            }
        }
    }
    Err(SubmitError::AllLogsFailed)
}

async fn try_one_log(
    policy: &Policy,
    target: &LogTarget,
    request: &LeafRequest,
    header: Option<&SubmitHeader>,
    config: &SubmitConfig,
    cancel: &CancellationToken,
) -> Result<SigsumProof, LogAttemptError> {
    // Step 3: persist the leaf.
    loop {
        match target.client.add_leaf(request, header).await {
            Ok(true) => break,
            Ok(false) => {
                debug!(log = %target.log_key_hash, "leaf accepted, not yet persisted");
                if !cancellable_sleep(config.poll_delay, cancel).await {
                    return Err(LogAttemptError::Cancelled);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }

    let leaf = request
        .clone()
        .into_leaf()
        .expect("request signature was already verified before submission");
    let leaf_hash = leaf.merkle_hash();

    // Step 4/5: poll for a cosigned tree head under which the leaf can be
    // proven included.
    loop {
        let cth: CosignedTreeHead = target.client.get_tree_head().await?;
        if let Err(e) = policy.verify_cosigned_tree_head(&target.log_key_hash, &cth) {
            // A log presenting a head its policy quorum never signs off on
            // is misbehaving, not merely slow; surface it rather than poll
            // forever (spec.md §7).
            return Err(LogAttemptError::Policy(e));
        }
        let size = cth.signed_tree_head.tree_head.size;
        if size == 0 {
            if !cancellable_sleep(config.poll_delay, cancel).await {
                return Err(LogAttemptError::Cancelled);
            }
            continue;
        }
        if size == 1 {
            if cth.signed_tree_head.tree_head.root_hash == leaf_hash {
                return Ok(SigsumProof {
                    log_key_hash: target.log_key_hash,
                    short_leaf: sigsum_protocol::ShortLeaf {
                        signature: leaf.signature,
                        key_hash: leaf.key_hash,
                    },
                    tree_head: cth,
                    inclusion: sigsum_transparency::InclusionProof {
                        leaf_index: 0,
                        path: Vec::new(),
                    },
                });
            }
            if !cancellable_sleep(config.poll_delay, cancel).await {
                return Err(LogAttemptError::Cancelled);
            }
            continue;
        }

        match target.client.get_inclusion_proof(size, &leaf_hash).await {
            Ok(inclusion) => {
                verify_inclusion(
                    &leaf_hash,
                    inclusion.leaf_index,
                    size,
                    &cth.signed_tree_head.tree_head.root_hash,
                    &inclusion,
                )
                .map_err(LogAttemptError::Inclusion)?;
                return Ok(SigsumProof {
                    log_key_hash: target.log_key_hash,
                    short_leaf: sigsum_protocol::ShortLeaf {
                        signature: leaf.signature,
                        key_hash: leaf.key_hash,
                    },
                    tree_head: cth,
                    inclusion,
                });
            }
            Err(LogError::NotFound) => {
                if !cancellable_sleep(config.poll_delay, cancel).await {
                    return Err(LogAttemptError::Cancelled);
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Signs and submits a raw message in one call, combining
/// [`LeafRequest::sign`] with [`submit_leaf_request`].
pub async fn submit_message(
    policy: &Policy,
    logs: &[LogTarget],
    message: Hash,
    signer: &impl sigsum_crypto::Signer,
    config: &SubmitConfig,
    cancel: &CancellationToken,
) -> Result<SigsumProof, SubmitError> {
    let request = LeafRequest::sign(message, signer);
    submit_leaf_request(policy, logs, &request, config, cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use sigsum_crypto::signing::Ed25519Signer;
    use sigsum_crypto::Signer as _;
    use sigsum_protocol::{Leaf, TreeHead};
    use sigsum_transparency::{prove_inclusion, root_from_leaves, ConsistencyProof, InclusionProof};
    use std::sync::Mutex as StdMutex;

    /// An in-memory [`Log`] double: holds a fixed set of already-persisted
    /// leaves (so `add_leaf` always reports `persisted`) and answers
    /// `get_tree_head`/`get_inclusion_proof` against them. `fail_always`
    /// makes every call return a transport error, for the failover test.
    struct MockLog {
        log_signer: Ed25519Signer,
        leaves: Vec<Leaf>,
        fail_always: bool,
        added: StdMutex<Vec<LeafRequest>>,
    }

    impl MockLog {
        fn tree_head(&self) -> CosignedTreeHead {
            let hashes: Vec<Hash> = self.leaves.iter().map(Leaf::merkle_hash).collect();
            let th = TreeHead {
                size: hashes.len() as u64,
                root_hash: root_from_leaves(&hashes),
            };
            let sth = th.sign(self.log_signer.public_key().key_hash(), &self.log_signer);
            CosignedTreeHead {
                signed_tree_head: sth,
                cosignatures: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Log for MockLog {
        async fn get_tree_head(&self) -> Result<CosignedTreeHead, LogError> {
            if self.fail_always {
                return Err(mock_transport_error());
            }
            Ok(self.tree_head())
        }

        async fn get_inclusion_proof(
            &self,
            size: u64,
            leaf_hash: &Hash,
        ) -> Result<InclusionProof, LogError> {
            if self.fail_always {
                return Err(mock_transport_error());
            }
            let hashes: Vec<Hash> = self.leaves.iter().map(Leaf::merkle_hash).collect();
            let index = hashes
                .iter()
                .position(|h| h == leaf_hash)
                .ok_or(LogError::NotFound)?;
            assert_eq!(size, hashes.len() as u64);
            prove_inclusion(&hashes, index as u64).map_err(|_| LogError::NotFound)
        }

        async fn get_consistency_proof(
            &self,
            _old_size: u64,
            _new_size: u64,
        ) -> Result<ConsistencyProof, LogError> {
            Err(LogError::NotFound)
        }

        async fn get_leaves(&self, _start: u64, _end: u64) -> Result<Vec<Leaf>, LogError> {
            Ok(self.leaves.clone())
        }

        async fn add_leaf(
            &self,
            request: &LeafRequest,
            _header: Option<&SubmitHeader>,
        ) -> Result<bool, LogError> {
            if self.fail_always {
                return Err(mock_transport_error());
            }
            self.added.lock().unwrap().push(request.clone());
            Ok(true)
        }
    }

    fn mock_transport_error() -> LogError {
        LogError::Transport(Box::new(std::io::Error::other("mock log is down")))
    }

    fn policy_for(signer: &Ed25519Signer) -> Policy {
        Policy::parse(&format!(
            "log {}\nquorum none\n",
            signer.public_key().to_hex()
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_single_shot_size_one_tree_succeeds() {
        let submitter = Ed25519Signer::generate();
        let log_signer = Ed25519Signer::generate();
        let log_key_hash = log_signer.public_key().key_hash();
        let policy = policy_for(&log_signer);
        let message = Hash::of(b"hello");
        let req = LeafRequest::sign(message, &submitter);
        let leaf = req.clone().into_leaf().unwrap();

        let log = MockLog {
            log_signer,
            leaves: vec![leaf],
            fail_always: false,
            added: StdMutex::new(Vec::new()),
        };
        let target = LogTarget {
            log_key_hash,
            client: Arc::new(log),
        };
        let config = SubmitConfig::default();
        let cancel = CancellationToken::new();

        let proof = submit_leaf_request(&policy, &[target], &req, &config, &cancel)
            .await
            .unwrap();
        assert_eq!(proof.log_key_hash, log_signer.public_key().key_hash());
        assert!(proof.inclusion.path.is_empty());
    }

    #[tokio::test]
    async fn test_single_shot_fails_over_to_second_log() {
        let submitter = Ed25519Signer::generate();
        let bad_signer = Ed25519Signer::generate();
        let good_signer = Ed25519Signer::generate();
        let bad_key_hash = bad_signer.public_key().key_hash();
        let good_key_hash = good_signer.public_key().key_hash();

        let mut policy_text = format!("log {}\n", bad_signer.public_key().to_hex());
        policy_text.push_str(&format!("log {}\n", good_signer.public_key().to_hex()));
        policy_text.push_str("quorum none\n");
        let policy = Policy::parse(&policy_text).unwrap();

        let message = Hash::of(b"hello");
        let req = LeafRequest::sign(message, &submitter);
        let leaf = req.clone().into_leaf().unwrap();

        let bad = MockLog {
            log_signer: bad_signer,
            leaves: Vec::new(),
            fail_always: true,
            added: StdMutex::new(Vec::new()),
        };
        let good = MockLog {
            log_signer: good_signer,
            leaves: vec![leaf],
            fail_always: false,
            added: StdMutex::new(Vec::new()),
        };

        let targets = vec![
            LogTarget {
                log_key_hash: bad_key_hash,
                client: Arc::new(bad),
            },
            LogTarget {
                log_key_hash: good_key_hash,
                client: Arc::new(good),
            },
        ];
        let config = SubmitConfig::default();
        let cancel = CancellationToken::new();

        let proof = submit_leaf_request(&policy, &targets, &req, &config, &cancel)
            .await
            .unwrap();
        assert_eq!(proof.log_key_hash, good_key_hash);
    }

    #[tokio::test]
    async fn test_all_logs_failed() {
        let submitter = Ed25519Signer::generate();
        let bad_signer = Ed25519Signer::generate();
        let bad_key_hash = bad_signer.public_key().key_hash();
        let policy = policy_for(&bad_signer);
        let req = LeafRequest::sign(Hash::of(b"hello"), &submitter);

        let bad = MockLog {
            log_signer: bad_signer,
            leaves: Vec::new(),
            fail_always: true,
            added: StdMutex::new(Vec::new()),
        };
        let target = LogTarget {
            log_key_hash: bad_key_hash,
            client: Arc::new(bad),
        };
        let config = SubmitConfig::default();
        let cancel = CancellationToken::new();

        let err = submit_leaf_request(&policy, &[target], &req, &config, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SubmitError::AllLogsFailed));
    }
}
