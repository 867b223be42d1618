//! The long-lived, multiplexed submission surface (spec.md §4.6 "Batch").
//!
//! A [`Batch`] multiplexes many leaf submissions across all of a policy's
//! logs at once. Each log runs as its own cooperative worker task; items
//! are dispatched to workers round-robin and redistributed if a worker
//! dies.

use sigsum_api::{Log, LogError};
use sigsum_crypto::Hash;
use sigsum_protocol::{make_token, LeafRequest, Policy, SigsumProof, SubmitHeader};
use sigsum_transparency::verify_inclusion;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SubmitConfig;
use crate::submit::{LogTarget, SubmitError};

/// The callback a [`Batch`] item resolves through, per spec.md §4.6
/// ("`SubmitLeafRequest(req, done_callback)`").
pub type DoneCallback = Box<dyn FnOnce(Result<SigsumProof, SubmitError>) + Send>;

/// The lifecycle states of a [`Batch`] (spec.md §4.6 "States").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Waiting,
    Closed,
}

/// The outcome of [`Batch::wait`]/[`Batch::close`]: how many items, if any,
/// were lost since the last call (spec.md §4.6 `Batch.Wait()`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOutcome {
    /// The number of items that failed (no log accepted them, or the log
    /// that held them failed with every peer already gone).
    pub failed: usize,
}

struct WorkItem {
    request: LeafRequest,
    header: Option<SubmitHeader>,
    done: DoneCallback,
}

/// Errors returned by [`Batch::submit_leaf_request`].
#[derive(Error, Debug)]
pub enum BatchSubmitError {
    /// The batch is not in the `Open` state (spec.md §4.6: "SubmitLeafRequest
    /// is accepted only in Open").
    #[error("batch is not open for new submissions")]
    NotOpen,
}

struct Shared {
    phase: Mutex<Phase>,
    pending: AtomicUsize,
    failed_since_wait: AtomicUsize,
    idle: Notify,
    cancel: CancellationToken,
    policy: Policy,
    poll_delay: std::time::Duration,
}

impl Shared {
    fn item_done(&self, ok: bool) {
        if !ok {
            self.failed_since_wait.fetch_add(1, Ordering::SeqCst);
        }
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// A handle to one alive worker: the channel new items are sent to, and
/// the log it serves.
struct WorkerHandle {
    tx: mpsc::UnboundedSender<WorkItem>,
    log_key_hash: Hash,
}

/// Multiplexes many leaf submissions across all logs in a [`Policy`] that
/// have a URL, per spec.md §4.6.
pub struct Batch {
    shared: Arc<Shared>,
    workers: Arc<Mutex<Vec<WorkerHandle>>>,
    next_worker: AtomicUsize,
    rate_limit: Option<crate::config::RateLimitConfig>,
    redistribute_handle: tokio::task::JoinHandle<()>,
}

impl Batch {
    /// Spawns one worker task per log in `targets`, ready to accept
    /// submissions.
    pub fn new(policy: Policy, targets: Vec<LogTarget>, config: SubmitConfig) -> Self {
        let shared = Arc::new(Shared {
            phase: Mutex::new(Phase::Open),
            pending: AtomicUsize::new(0),
            failed_since_wait: AtomicUsize::new(0),
            idle: Notify::new(),
            cancel: CancellationToken::new(),
            policy,
            poll_delay: config.poll_delay,
        });

        let (closing_tx, mut closing_rx) = mpsc::unbounded_channel::<(Hash, Vec<WorkItem>)>();
        let workers = Arc::new(Mutex::new(Vec::new()));

        for target in &targets {
            spawn_worker(target.clone(), shared.clone(), closing_tx.clone(), &workers);
        }

        // The redistribution loop: when a worker dies, its leftover items
        // are handed back here and fanned out round-robin to whichever
        // workers remain (spec.md §4.6 "Worker failure semantics").
        let redistribute_workers = workers.clone();
        let redistribute_shared = shared.clone();
        let redistribute_handle = tokio::spawn(async move {
            while let Some((dead_log, items)) = closing_rx.recv().await {
                redistribute_workers
                    .lock()
                    .unwrap()
                    .retain(|w| w.log_key_hash != dead_log);
                let alive: Vec<mpsc::UnboundedSender<WorkItem>> = redistribute_workers
                    .lock()
                    .unwrap()
                    .iter()
                    .map(|w| w.tx.clone())
                    .collect();
                for (i, item) in items.into_iter().enumerate() {
                    if alive.is_empty() {
                        warn!("no surviving workers, dropping item");
                        (item.done)(Err(SubmitError::AllLogsFailed));
                        redistribute_shared.item_done(false);
                    } else if alive[i % alive.len()].send(item).is_err() {
                        warn!("redistribution target died too, dropping item");
                        redistribute_shared.item_done(false);
                    }
                }
            }
        });

        Batch {
            shared,
            workers,
            next_worker: AtomicUsize::new(0),
            rate_limit: config.rate_limit,
            redistribute_handle,
        }
    }

    /// Submits `request`, invoking `done` exactly once when it either
    /// resolves to a proof or is permanently lost. Accepted only while the
    /// batch is `Open`.
    pub fn submit_leaf_request(
        &self,
        request: LeafRequest,
        done: DoneCallback,
    ) -> Result<(), BatchSubmitError> {
        if *self.shared.phase.lock().unwrap() != Phase::Open {
            return Err(BatchSubmitError::NotOpen);
        }
        let workers = self.workers.lock().unwrap();
        if workers.is_empty() {
            drop(workers);
            done(Err(SubmitError::NoLogs));
            return Ok(());
        }
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % workers.len();
        let log_key_hash = workers[index].log_key_hash;
        let tx = workers[index].tx.clone();
        drop(workers);

        let header = self.rate_limit.as_ref().and_then(|rl| {
            self.shared
                .policy
                .log(&log_key_hash)
                .map(|entry| SubmitHeader {
                    domain: rl.domain.clone(),
                    token: make_token(&*rl.signer, &entry.public_key),
                })
        });

        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        let item = WorkItem {
            request,
            header,
            done,
        };
        if tx.send(item).is_err() {
            // The chosen worker already died; a redistribution for it may
            // already be in flight, but this item missed that window.
            // Fail it rather than risk losing it silently.
            self.shared.item_done(false);
        }
        Ok(())
    }

    /// Waits until every item submitted so far has resolved, then returns
    /// to `Open`. Reports how many were lost since the previous `wait`.
    pub async fn wait(&self) -> WaitOutcome {
        *self.shared.phase.lock().unwrap() = Phase::Waiting;
        loop {
            // `enable()` registers this waiter before the `pending` check:
            // `notify_waiters` only wakes already-registered waiters, so
            // checking first and registering second would let a completion
            // landing in between go unseen and `wait` would hang forever.
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                break;
            }
            notified.await;
        }
        let failed = self.shared.failed_since_wait.swap(0, Ordering::SeqCst);
        *self.shared.phase.lock().unwrap() = Phase::Open;
        WaitOutcome { failed }
    }

    /// Waits for completion (as [`Batch::wait`]) and then permanently
    /// closes the batch, cancelling all worker tasks. Idempotent.
    pub async fn close(self) -> WaitOutcome {
        let outcome = self.wait().await;
        *self.shared.phase.lock().unwrap() = Phase::Closed;
        self.shared.cancel.cancel();
        self.redistribute_handle.abort();
        outcome
    }
}

fn spawn_worker(
    target: LogTarget,
    shared: Arc<Shared>,
    closing_tx: mpsc::UnboundedSender<(Hash, Vec<WorkItem>)>,
    workers: &Arc<Mutex<Vec<WorkerHandle>>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    workers.lock().unwrap().push(WorkerHandle {
        tx,
        log_key_hash: target.log_key_hash,
    });
    tokio::spawn(worker_loop(target, shared, rx, closing_tx));
}

/// One pending item: the request plus the leaf hash the log acknowledged
/// persisting, needed to ask for (and verify) an inclusion proof once the
/// tree head advances.
struct PendingItem {
    item: WorkItem,
    leaf_hash: Hash,
}

async fn worker_loop(
    target: LogTarget,
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    closing_tx: mpsc::UnboundedSender<(Hash, Vec<WorkItem>)>,
) {
    let mut new_items: Vec<WorkItem> = Vec::new();
    let mut pending_items: Vec<PendingItem> = Vec::new();

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                for item in new_items.drain(..).chain(pending_items.drain(..).map(|p| p.item)) {
                    (item.done)(Err(SubmitError::Cancelled));
                    shared.item_done(false);
                }
                return;
            }
            received = rx.recv() => {
                match received {
                    Some(item) => new_items.push(item),
                    None => return,
                }
            }
            _ = tokio::time::sleep(shared.poll_delay) => {}
        }

        let mut i = 0;
        while i < new_items.len() {
            match target
                .client
                .add_leaf(&new_items[i].request, new_items[i].header.as_ref())
                .await
            {
                Ok(true) => {
                    let item = new_items.remove(i);
                    let leaf_hash = item
                        .request
                        .clone()
                        .into_leaf()
                        .expect("signature already verified before acceptance")
                        .merkle_hash();
                    debug!(log = %target.log_key_hash, "leaf persisted");
                    pending_items.push(PendingItem { item, leaf_hash });
                }
                Ok(false) => {
                    i += 1;
                }
                Err(e) => {
                    warn!(log = %target.log_key_hash, error = ?e, "add_leaf failed, worker closing");
                    let leftover: Vec<WorkItem> = new_items
                        .drain(..)
                        .chain(pending_items.drain(..).map(|p| p.item))
                        .collect();
                    let _ = closing_tx.send((target.log_key_hash, leftover));
                    return;
                }
            }
        }

        if pending_items.is_empty() {
            continue;
        }

        let cth = match target.client.get_tree_head().await {
            Ok(cth) => cth,
            Err(e) if e.is_retryable() => continue,
            Err(e) => {
                warn!(log = %target.log_key_hash, error = ?e, "get_tree_head failed, worker closing");
                let leftover: Vec<WorkItem> = new_items
                    .drain(..)
                    .chain(pending_items.drain(..).map(|p| p.item))
                    .collect();
                let _ = closing_tx.send((target.log_key_hash, leftover));
                return;
            }
        };
        if let Err(e) = shared
            .policy
            .verify_cosigned_tree_head(&target.log_key_hash, &cth)
        {
            warn!(log = %target.log_key_hash, error = ?e, "policy rejected tree head, worker closing");
            let leftover: Vec<WorkItem> = new_items
                .drain(..)
                .chain(pending_items.drain(..).map(|p| p.item))
                .collect();
            let _ = closing_tx.send((target.log_key_hash, leftover));
            return;
        }

        let size = cth.signed_tree_head.tree_head.size;
        let mut still_pending = Vec::new();
        let mut worker_failed = false;

        for pending in pending_items.drain(..) {
            if worker_failed {
                still_pending.push(pending);
                continue;
            }
            if size == 0 {
                still_pending.push(pending);
                continue;
            }
            if size == 1 {
                if cth.signed_tree_head.tree_head.root_hash == pending.leaf_hash {
                    complete(pending, &target, cth.clone(), 0, Vec::new());
                    shared.item_done(true);
                } else {
                    still_pending.push(pending);
                }
                continue;
            }
            match target
                .client
                .get_inclusion_proof(size, &pending.leaf_hash)
                .await
            {
                Ok(proof) => {
                    if verify_inclusion(
                        &pending.leaf_hash,
                        proof.leaf_index,
                        size,
                        &cth.signed_tree_head.tree_head.root_hash,
                        &proof,
                    )
                    .is_ok()
                    {
                        complete(pending, &target, cth.clone(), proof.leaf_index, proof.path);
                        shared.item_done(true);
                    } else {
                        still_pending.push(pending);
                    }
                }
                Err(LogError::NotFound) => still_pending.push(pending),
                Err(e) => {
                    warn!(log = %target.log_key_hash, error = ?e, "get_inclusion_proof failed, worker closing");
                    still_pending.push(pending);
                    worker_failed = true;
                }
            }
        }
        pending_items = still_pending;

        if worker_failed {
            let leftover: Vec<WorkItem> = new_items
                .drain(..)
                .chain(pending_items.drain(..).map(|p| p.item))
                .collect();
            let _ = closing_tx.send((target.log_key_hash, leftover));
            return;
        }
    }
}

fn complete(
    pending: PendingItem,
    target: &LogTarget,
    cth: sigsum_protocol::CosignedTreeHead,
    leaf_index: u64,
    path: Vec<Hash>,
) {
    let leaf = pending
        .item
        .request
        .clone()
        .into_leaf()
        .expect("signature already verified before acceptance");
    let proof = SigsumProof {
        log_key_hash: target.log_key_hash,
        short_leaf: sigsum_protocol::ShortLeaf {
            signature: leaf.signature,
            key_hash: leaf.key_hash,
        },
        tree_head: cth,
        inclusion: sigsum_transparency::InclusionProof { leaf_index, path },
    };
    (pending.item.done)(Ok(proof));
}
