//! Per-log monitor state machine (spec.md §4.7).
//!
//! A [`Monitor`] tails every log named in a [`Policy`] that has a URL,
//! verifying each new cosigned tree head, the consistency proof from the
//! previously accepted head, and the inclusion of every newly fetched
//! leaf, before advancing its checkpoint and invoking the caller's
//! callbacks.

use sigsum_api::Log;
use sigsum_crypto::{Hash, PublicKey};
use sigsum_protocol::{CosignedTreeHead, Leaf, Policy};
use sigsum_transparency::verify_inclusion;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::state::{MonitorState, StateDirectory};
use crate::submit::LogTarget;

/// Why a monitor stopped following a log (spec.md §4.7: "`Alert` is
/// reserved for unrecoverable log misbehavior").
#[derive(Debug)]
pub enum Alert {
    /// The log's tree head signature, or a witness cosignature, failed to
    /// verify under the policy.
    PolicyFailure(sigsum_protocol::PolicyError),
    /// No valid consistency proof connects the previous and new tree
    /// heads.
    Inconsistency,
    /// A fetched leaf did not verify as included in the new tree.
    InclusionFailure,
}

/// Callbacks a [`Monitor`] invokes serially, per log, as it advances
/// (spec.md §4.7 "Callback contract"). Default bodies do nothing, so
/// callers implement only what they need.
pub trait MonitorCallbacks: Send + Sync {
    /// A new cosigned tree head was accepted for `log_key_hash`.
    fn new_tree_head(&self, _log_key_hash: Hash, _state: &MonitorState, _cth: &CosignedTreeHead) {}

    /// `leaves[i]` was fetched and verified included at `indices[i]` in the
    /// new tree; both slices are already filtered to known submitters and
    /// share the same length.
    fn new_leaves(&self, _log_key_hash: Hash, _state: &MonitorState, _indices: &[u64], _leaves: &[Leaf]) {}

    /// The log at `log_key_hash` misbehaved; the monitor has stopped
    /// following it.
    fn alert(&self, _log_key_hash: Hash, _alert: Alert) {}
}

/// Assembles a [`Monitor`] over one or more logs, with an optional
/// checkpoint directory and submitter allow-list (spec.md §12: a builder
/// is implied by §4.7's "a task runs" per log, since the spec does not
/// otherwise say how the set of tasks is wired up).
pub struct MonitorBuilder {
    policy: Policy,
    targets: Vec<LogTarget>,
    config: MonitorConfig,
    state_dir: Option<Arc<dyn StateDirectory>>,
    submit_keys: HashMap<Hash, PublicKey>,
}

impl MonitorBuilder {
    /// Starts a builder for `policy`, with default tunables and no
    /// persistence or submitter filter configured yet.
    pub fn new(policy: Policy) -> Self {
        MonitorBuilder {
            policy,
            targets: Vec::new(),
            config: MonitorConfig::default(),
            state_dir: None,
            submit_keys: HashMap::new(),
        }
    }

    /// Overrides the default [`MonitorConfig`].
    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads and persists checkpoints through `dir`.
    pub fn with_state_directory(mut self, dir: Arc<dyn StateDirectory>) -> Self {
        self.state_dir = Some(dir);
        self
    }

    /// Restricts `NewLeaves` reports to leaves submitted by one of
    /// `keys` (keyed by `key_hash`); leaves from unknown submitters are
    /// fetched and verified like any other but never reported.
    pub fn with_submit_keys(mut self, keys: HashMap<Hash, PublicKey>) -> Self {
        self.submit_keys = keys;
        self
    }

    /// Adds one log to follow.
    pub fn add_log(mut self, target: LogTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Spawns one task per log and returns the running [`Monitor`].
    pub async fn build(self, callbacks: Arc<dyn MonitorCallbacks>) -> Monitor {
        let cancel = CancellationToken::new();
        let log_key_hashes: Vec<Hash> = self.targets.iter().map(|t| t.log_key_hash).collect();
        let mut prior_states = match &self.state_dir {
            Some(dir) => dir.read_states(&log_key_hashes).await.unwrap_or_else(|e| {
                warn!(error = ?e, "failed to load prior monitor state, starting fresh");
                HashMap::new()
            }),
            None => HashMap::new(),
        };

        let mut handles = Vec::new();
        for target in self.targets {
            let initial = prior_states
                .remove(&target.log_key_hash)
                .unwrap_or_else(MonitorState::initial);
            let task = MonitorTask {
                target,
                policy: self.policy.clone(),
                config: self.config,
                state_dir: self.state_dir.clone(),
                submit_keys: self.submit_keys.clone(),
                callbacks: callbacks.clone(),
                cancel: cancel.clone(),
            };
            handles.push(tokio::spawn(task.run(initial)));
        }

        Monitor { cancel, handles }
    }
}

/// A running set of per-log monitor tasks.
pub struct Monitor {
    cancel: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl Monitor {
    /// Stops every per-log task and waits for them to exit.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

struct MonitorTask {
    target: LogTarget,
    policy: Policy,
    config: MonitorConfig,
    state_dir: Option<Arc<dyn StateDirectory>>,
    submit_keys: HashMap<Hash, PublicKey>,
    callbacks: Arc<dyn MonitorCallbacks>,
    cancel: CancellationToken,
}

impl MonitorTask {
    async fn run(self, mut state: MonitorState) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(self.config.query_interval) => {}
            }

            match self.tick(&state).await {
                Ok(Some(next)) => state = next,
                Ok(None) => {}
                Err(alert) => {
                    warn!(log = %self.target.log_key_hash, alert = ?alert, "monitor stopping for log");
                    self.callbacks.alert(self.target.log_key_hash, alert);
                    return;
                }
            }
        }
    }

    /// Runs one poll cycle. `Ok(Some(state))` means the checkpoint
    /// advanced; `Ok(None)` means the tree head was unchanged.
    async fn tick(&self, state: &MonitorState) -> Result<Option<MonitorState>, Alert> {
        let cth = match self.target.client.get_tree_head().await {
            Ok(cth) => cth,
            Err(e) if e.is_retryable() => return Ok(None),
            Err(e) => {
                warn!(log = %self.target.log_key_hash, error = ?e, "transport error fetching tree head");
                return Ok(None);
            }
        };
        self.policy
            .verify_cosigned_tree_head(&self.target.log_key_hash, &cth)
            .map_err(Alert::PolicyFailure)?;

        let prior_th = &state.tree_head.signed_tree_head.tree_head;
        let new_th = &cth.signed_tree_head.tree_head;
        if new_th.size == prior_th.size && new_th.root_hash == prior_th.root_hash {
            return Ok(None);
        }

        let consistency = if prior_th.size == 0 {
            sigsum_transparency::ConsistencyProof { path: Vec::new() }
        } else {
            self.target
                .client
                .get_consistency_proof(prior_th.size, new_th.size)
                .await
                .map_err(|_| Alert::Inconsistency)?
        };
        sigsum_transparency::verify_consistency(
            prior_th.size,
            new_th.size,
            &prior_th.root_hash,
            &new_th.root_hash,
            &consistency,
        )
        .map_err(|_| Alert::Inconsistency)?;

        let mut next_leaf_index = state.next_leaf_index;
        while next_leaf_index < new_th.size {
            let end = (next_leaf_index + self.config.leaf_batch_size).min(new_th.size);
            let leaves = self
                .target
                .client
                .get_leaves(next_leaf_index, end)
                .await
                .map_err(|_| Alert::InclusionFailure)?;
            if leaves.len() as u64 != end - next_leaf_index {
                return Err(Alert::InclusionFailure);
            }

            for (offset, leaf) in leaves.iter().enumerate() {
                let index = next_leaf_index + offset as u64;
                let leaf_hash = leaf.merkle_hash();
                let proof = self
                    .target
                    .client
                    .get_inclusion_proof(new_th.size, &leaf_hash)
                    .await
                    .map_err(|_| Alert::InclusionFailure)?;
                verify_inclusion(&leaf_hash, index, new_th.size, &new_th.root_hash, &proof)
                    .map_err(|_| Alert::InclusionFailure)?;
            }

            let mut match_indices = Vec::new();
            let mut matches = Vec::new();
            for (offset, leaf) in leaves.iter().enumerate() {
                if self.submit_keys.contains_key(&leaf.key_hash) {
                    match_indices.push(next_leaf_index + offset as u64);
                    matches.push(leaf.clone());
                }
            }
            if !matches.is_empty() {
                self.callbacks.new_leaves(
                    self.target.log_key_hash,
                    state,
                    &match_indices,
                    &matches,
                );
            }

            next_leaf_index = end;
        }

        let next = MonitorState {
            tree_head: cth.clone(),
            next_leaf_index,
        };
        if let Some(dir) = &self.state_dir {
            if let Err(e) = dir.write_state(&self.target.log_key_hash, &next).await {
                warn!(log = %self.target.log_key_hash, error = ?e, "failed to persist monitor state");
            }
        }
        info!(log = %self.target.log_key_hash, size = next_th_size(&next), "tree head advanced");
        self.callbacks
            .new_tree_head(self.target.log_key_hash, &next, &cth);
        Ok(Some(next))
    }
}

fn next_th_size(state: &MonitorState) -> u64 {
    state.tree_head.signed_tree_head.tree_head.size
}
