//! Monitor state and its optional file-backed persistence (spec.md §3, §4.7,
//! §6).

use async_trait::async_trait;
use sigsum_crypto::Hash;
use sigsum_protocol::{CosignedTreeHead, ParseError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

/// A monitor's verified view of one log: the last cosigned tree head it
/// accepted, and how many leaves it has already fetched and filtered.
///
/// Invariants (spec.md §3): `tree_head`'s signature has been verified
/// under the log's key; `next_leaf_index <= tree_head.size`; this state is
/// reached from the previous one only via a verified consistency proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MonitorState {
    /// The last cosigned tree head this monitor has accepted.
    pub tree_head: CosignedTreeHead,
    /// The index of the next leaf this monitor has not yet fetched.
    pub next_leaf_index: u64,
}

impl MonitorState {
    /// The starting state for a log with no prior history: an empty tree
    /// head, self-signed by no one (size 0, root = `H("")`) and therefore
    /// never itself verified under a policy; only used as the `prior`
    /// input to a consistency check, never returned to callers directly.
    pub fn initial() -> Self {
        MonitorState {
            tree_head: CosignedTreeHead {
                signed_tree_head: sigsum_protocol::SignedTreeHead {
                    tree_head: sigsum_protocol::TreeHead {
                        size: 0,
                        root_hash: Hash::of(&[]),
                    },
                    signature: sigsum_crypto::Signature::from_hex(&"00".repeat(64))
                        .expect("64 zero bytes is a validly-shaped (if unverifiable) signature"),
                },
                cosignatures: Vec::new(),
            },
            next_leaf_index: 0,
        }
    }

    fn to_ascii(&self) -> String {
        let mut doc = self.tree_head.to_ascii();
        doc.push_str(&format!("next_leaf_index={}\n", self.next_leaf_index));
        doc
    }

    fn from_ascii(input: &str) -> Result<Self, ParseError> {
        let mut p = sigsum_protocol::Parser::new(input);
        let tree_head = CosignedTreeHead::parse(&mut p)?;
        let next_leaf_index = p.get_int("next_leaf_index")?;
        p.get_eof()?;
        Ok(MonitorState {
            tree_head,
            next_leaf_index,
        })
    }
}

/// Errors returned while reading or writing monitor state files.
#[derive(Error, Debug)]
pub enum StateError {
    /// The underlying file I/O failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the operation was attempted against.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents were not a well-formed state document.
    #[error("malformed state file at {path}: {source}")]
    Malformed {
        /// The path the operation was attempted against.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: ParseError,
    },
}

/// Persists and loads [`MonitorState`] for a set of logs, keyed by log key
/// hash (spec.md §4.7 step 3, §6).
#[async_trait]
pub trait StateDirectory: Send + Sync {
    /// Persists `state` for `log_key_hash`, replacing any prior state.
    async fn write_state(&self, log_key_hash: &Hash, state: &MonitorState) -> Result<(), StateError>;

    /// Loads whatever state is on record for each of `log_key_hashes`,
    /// omitting entries for logs with no prior state.
    async fn read_states(
        &self,
        log_key_hashes: &[Hash],
    ) -> Result<HashMap<Hash, MonitorState>, StateError>;
}

/// A [`StateDirectory`] backed by one file per log under a directory, named
/// `<log_key_hash_hex>` (spec.md §6). Writes are atomic: a temp file is
/// written in the same directory and renamed into place, so a crash never
/// leaves a torn state file (spec.md §5).
pub struct FileStateDirectory {
    dir: PathBuf,
}

impl FileStateDirectory {
    /// Uses `dir` as the state directory, creating it if it does not
    /// already exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StateError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StateError::Io {
            path: dir.clone(),
            source: e,
        })?;
        Ok(FileStateDirectory { dir })
    }

    fn path_for(&self, log_key_hash: &Hash) -> PathBuf {
        self.dir.join(log_key_hash.to_hex())
    }
}

#[async_trait]
impl StateDirectory for FileStateDirectory {
    async fn write_state(
        &self,
        log_key_hash: &Hash,
        state: &MonitorState,
    ) -> Result<(), StateError> {
        let path = self.path_for(log_key_hash);
        let dir = self.dir.clone();
        let doc = state.to_ascii();
        tokio::task::spawn_blocking(move || write_atomic(&dir, &path, &doc))
            .await
            .expect("blocking state-write task does not panic")
    }

    async fn read_states(
        &self,
        log_key_hashes: &[Hash],
    ) -> Result<HashMap<Hash, MonitorState>, StateError> {
        let mut out = HashMap::new();
        for log_key_hash in log_key_hashes {
            let path = self.path_for(log_key_hash);
            match read_one(&path).await? {
                Some(state) => {
                    out.insert(*log_key_hash, state);
                }
                None => continue,
            }
        }
        Ok(out)
    }
}

fn write_atomic(dir: &Path, path: &Path, doc: &str) -> Result<(), StateError> {
    use std::io::Write;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StateError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    tmp.write_all(doc.as_bytes()).map_err(|e| StateError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    tmp.persist(path).map_err(|e| StateError::Io {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

async fn read_one(path: &Path) -> Result<Option<MonitorState>, StateError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => MonitorState::from_ascii(&contents)
            .map(Some)
            .map_err(|e| StateError::Malformed {
                path: path.to_path_buf(),
                source: e,
            }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StateError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sigsum_crypto::signing::Ed25519Signer;
    use sigsum_crypto::Signer;
    use sigsum_protocol::{SignedTreeHead, TreeHead};

    fn sample_state(size: u64, next_leaf_index: u64) -> MonitorState {
        let log = Ed25519Signer::generate();
        let log_key_hash = log.public_key().key_hash();
        let th = TreeHead {
            size,
            root_hash: Hash::of(b"root"),
        };
        let sth = th.sign(log_key_hash, &log);
        MonitorState {
            tree_head: CosignedTreeHead {
                signed_tree_head: sth,
                cosignatures: Vec::new(),
            },
            next_leaf_index,
        }
    }

    #[test]
    fn test_ascii_roundtrip() {
        let state = sample_state(4, 4);
        let doc = state.to_ascii();
        assert_eq!(MonitorState::from_ascii(&doc).unwrap(), state);
    }

    #[tokio::test]
    async fn test_write_then_read_one_log() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FileStateDirectory::new(tmp.path()).unwrap();
        let log_key_hash = Hash::of(b"log");
        let state = sample_state(10, 10);
        dir.write_state(&log_key_hash, &state).await.unwrap();

        let loaded = dir.read_states(&[log_key_hash]).await.unwrap();
        assert_eq!(loaded.get(&log_key_hash), Some(&state));
    }

    #[tokio::test]
    async fn test_read_states_omits_unknown_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FileStateDirectory::new(tmp.path()).unwrap();
        let unknown = Hash::of(b"nope");
        let loaded = dir.read_states(&[unknown]).await.unwrap();
        assert!(loaded.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_prior_state() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = FileStateDirectory::new(tmp.path()).unwrap();
        let log_key_hash = Hash::of(b"log");
        dir.write_state(&log_key_hash, &sample_state(4, 4))
            .await
            .unwrap();
        dir.write_state(&log_key_hash, &sample_state(9, 9))
            .await
            .unwrap();

        let loaded = dir.read_states(&[log_key_hash]).await.unwrap();
        assert_eq!(loaded[&log_key_hash].tree_head.signed_tree_head.tree_head.size, 9);
    }
}
