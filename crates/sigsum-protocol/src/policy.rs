//! Policy documents: trusted logs, witnesses, and K-of-N quorum rules
//! (spec.md §4.3).

use crate::types::CosignedTreeHead;
use sigsum_crypto::{Hash, PublicKey};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// A known log: its public key and, if the policy lists one, the URL to
/// reach it at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    /// The log's public key.
    pub public_key: PublicKey,
    /// The log's base URL, if known.
    pub url: Option<String>,
}

/// A node in the quorum tree: satisfied iff at least `k` of its `members`
/// are satisfied. A single witness is represented as a group of one leaf
/// with `k = 1`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuorumRule {
    /// No witness cosignature is required at all (`quorum none`).
    None,
    /// A single witness, identified by key hash.
    Witness(Hash),
    /// At least `k` of `members` must be satisfied.
    Group {
        /// The minimum number of satisfied members.
        k: usize,
        /// The member sub-rules.
        members: Vec<QuorumRule>,
    },
}

impl QuorumRule {
    fn is_satisfied(&self, satisfied: &HashSet<Hash>) -> bool {
        match self {
            QuorumRule::None => true,
            QuorumRule::Witness(h) => satisfied.contains(h),
            QuorumRule::Group { k, members } => {
                members.iter().filter(|m| m.is_satisfied(satisfied)).count() >= *k
            }
        }
    }
}

/// Errors returned while parsing a policy document.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyParseError {
    /// A directive keyword other than `log`, `witness`, `group`, `quorum`,
    /// or a comment/blank line.
    #[error("unknown directive {0:?}")]
    UnknownDirective(String),
    /// A directive line did not have the expected number of tokens.
    #[error("malformed {directive} directive: {reason}")]
    Malformed {
        /// The directive keyword.
        directive: String,
        /// What was wrong with it.
        reason: String,
    },
    /// A `log` directive repeated a key hash already declared.
    #[error("duplicate log {0}")]
    DuplicateLog(String),
    /// A `witness`/`group` directive repeated a name already declared.
    #[error("duplicate name {0:?}")]
    DuplicateName(String),
    /// A `group`/`quorum` directive referenced an undeclared witness or
    /// group name.
    #[error("unknown member {0:?}")]
    UnknownMember(String),
    /// A `group` directive's `K` exceeded its member count, or was zero
    /// with at least one member (zero-of-positive is never satisfiable by
    /// construction and almost always a mistake).
    #[error("group {name:?} has invalid quorum size {k} of {n} members")]
    InvalidGroupSize {
        /// The group's name.
        name: String,
        /// The requested `K`.
        k: usize,
        /// The number of members.
        n: usize,
    },
    /// More than one `quorum` directive was present.
    #[error("duplicate quorum directive")]
    DuplicateQuorum,
    /// No `quorum` directive was present.
    #[error("missing quorum directive")]
    MissingQuorum,
    /// A hex key failed to parse.
    #[error("invalid key {0:?}: {1}")]
    InvalidKey(String, String),
}

/// Errors returned while verifying a cosigned tree head under a [`Policy`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PolicyError {
    /// The tree head names a log the policy does not trust.
    #[error("unknown log")]
    UnknownLog,
    /// The log's own signature over the tree head did not verify.
    #[error("bad log signature")]
    BadLogSignature,
    /// Too few witnesses cosigned the head to satisfy the quorum rule.
    #[error("quorum not satisfied")]
    QuorumFailure,
}

/// Trusted logs, witnesses, and the quorum rule a cosigned tree head must
/// satisfy. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Policy {
    logs: HashMap<Hash, LogEntry>,
    witnesses: HashMap<Hash, PublicKey>,
    quorum: QuorumRule,
}

impl Policy {
    /// Parses a policy document: one directive per line, `#` introduces a
    /// comment, whitespace separates tokens.
    ///
    /// ```text
    /// log <hex-key> [url]
    /// witness <name> <hex-key> [url]
    /// group <name> <K> <member> [member...]
    /// quorum <name | "none">
    /// ```
    ///
    /// Reads and parses a policy document from `path`.
    ///
    /// This is the one place in the crate where `anyhow` appears in a
    /// public signature: loading a policy file is an outermost-edge I/O
    /// concern for an embedding application, not a protocol-level failure
    /// callers need to match on, so failures are reported as an opaque,
    /// context-annotated `anyhow::Error` rather than `PolicyParseError`.
    pub fn load_file(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy file `{}`", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("failed to parse policy file `{}`", path.display()))
    }

    /// `group` members may reference witness or group names declared
    /// earlier in the document (forward references are not supported).
    pub fn parse(text: &str) -> Result<Self, PolicyParseError> {
        let mut logs = HashMap::new();
        let mut witness_by_name: HashMap<String, Hash> = HashMap::new();
        let mut witnesses = HashMap::new();
        let mut rule_by_name: HashMap<String, QuorumRule> = HashMap::new();
        let mut quorum: Option<QuorumRule> = None;

        for raw_line in text.lines() {
            let line = match raw_line.split_once('#') {
                Some((before, _)) => before,
                None => raw_line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let directive = tokens.next().expect("non-empty line has a first token");
            let rest: Vec<&str> = tokens.collect();

            match directive {
                "log" => {
                    let (key_hex, url) = match rest.as_slice() {
                        [key] => (*key, None),
                        [key, url] => (*key, Some((*url).to_owned())),
                        _ => {
                            return Err(PolicyParseError::Malformed {
                                directive: "log".to_owned(),
                                reason: "expected <hex-key> [url]".to_owned(),
                            })
                        }
                    };
                    let public_key = PublicKey::from_hex(key_hex)
                        .map_err(|e| PolicyParseError::InvalidKey(key_hex.to_owned(), e.to_string()))?;
                    let key_hash = public_key.key_hash();
                    if logs
                        .insert(key_hash, LogEntry { public_key, url })
                        .is_some()
                    {
                        return Err(PolicyParseError::DuplicateLog(key_hex.to_owned()));
                    }
                }
                "witness" => {
                    let (name, key_hex) = match rest.as_slice() {
                        [name, key] => (*name, *key),
                        [name, key, _url] => (*name, *key),
                        _ => {
                            return Err(PolicyParseError::Malformed {
                                directive: "witness".to_owned(),
                                reason: "expected <name> <hex-key> [url]".to_owned(),
                            })
                        }
                    };
                    if witness_by_name.contains_key(name) || rule_by_name.contains_key(name) {
                        return Err(PolicyParseError::DuplicateName(name.to_owned()));
                    }
                    let public_key = PublicKey::from_hex(key_hex)
                        .map_err(|e| PolicyParseError::InvalidKey(key_hex.to_owned(), e.to_string()))?;
                    let key_hash = public_key.key_hash();
                    witnesses.insert(key_hash, public_key);
                    witness_by_name.insert(name.to_owned(), key_hash);
                    rule_by_name.insert(name.to_owned(), QuorumRule::Witness(key_hash));
                }
                "group" => {
                    let (name, k_str, members) = match rest.as_slice() {
                        [name, k, members @ ..] if !members.is_empty() => (*name, *k, members),
                        _ => {
                            return Err(PolicyParseError::Malformed {
                                directive: "group".to_owned(),
                                reason: "expected <name> <K> <member...>".to_owned(),
                            })
                        }
                    };
                    if witness_by_name.contains_key(name) || rule_by_name.contains_key(name) {
                        return Err(PolicyParseError::DuplicateName(name.to_owned()));
                    }
                    let k: usize = k_str.parse().map_err(|_| PolicyParseError::Malformed {
                        directive: "group".to_owned(),
                        reason: format!("{k_str:?} is not a valid quorum size"),
                    })?;
                    if k == 0 || k > members.len() {
                        return Err(PolicyParseError::InvalidGroupSize {
                            name: name.to_owned(),
                            k,
                            n: members.len(),
                        });
                    }
                    let resolved: Result<Vec<QuorumRule>, PolicyParseError> = members
                        .iter()
                        .map(|m| {
                            rule_by_name
                                .get(*m)
                                .cloned()
                                .ok_or_else(|| PolicyParseError::UnknownMember((*m).to_owned()))
                        })
                        .collect();
                    rule_by_name.insert(
                        name.to_owned(),
                        QuorumRule::Group {
                            k,
                            members: resolved?,
                        },
                    );
                }
                "quorum" => {
                    let name = match rest.as_slice() {
                        [name] => *name,
                        _ => {
                            return Err(PolicyParseError::Malformed {
                                directive: "quorum".to_owned(),
                                reason: "expected <name | \"none\">".to_owned(),
                            })
                        }
                    };
                    if quorum.is_some() {
                        return Err(PolicyParseError::DuplicateQuorum);
                    }
                    quorum = Some(if name == "none" {
                        QuorumRule::None
                    } else {
                        rule_by_name
                            .get(name)
                            .cloned()
                            .ok_or_else(|| PolicyParseError::UnknownMember(name.to_owned()))?
                    });
                }
                other => return Err(PolicyParseError::UnknownDirective(other.to_owned())),
            }
        }

        Ok(Policy {
            logs,
            witnesses,
            quorum: quorum.ok_or(PolicyParseError::MissingQuorum)?,
        })
    }

    /// A synthetic policy trusting only `log` with no witness requirement,
    /// used by [`crate::proof::SigsumProof::verify_no_cosignatures`].
    pub fn trust_single_log(log_key_hash: Hash, log_public_key: PublicKey) -> Self {
        let mut logs = HashMap::new();
        logs.insert(
            log_key_hash,
            LogEntry {
                public_key: log_public_key,
                url: None,
            },
        );
        Policy {
            logs,
            witnesses: HashMap::new(),
            quorum: QuorumRule::None,
        }
    }

    /// Returns the logs that have a known URL.
    pub fn logs_with_url(&self) -> impl Iterator<Item = (&Hash, &LogEntry)> {
        self.logs.iter().filter(|(_, entry)| entry.url.is_some())
    }

    /// The total number of witnesses named in the policy (`N` in a K-of-N
    /// quorum), regardless of whether the active quorum rule references all
    /// of them. Useful for diagnostics and for display to an operator
    /// inspecting a loaded policy.
    pub fn quorum_size(&self) -> usize {
        self.witnesses.len()
    }

    /// Looks up a trusted log entry by its public key hash.
    pub fn log(&self, log_key_hash: &Hash) -> Option<&LogEntry> {
        self.logs.get(log_key_hash)
    }

    /// Verifies a cosigned tree head claimed to come from `log_key_hash`,
    /// per spec.md §4.3.
    pub fn verify_cosigned_tree_head(
        &self,
        log_key_hash: &Hash,
        cth: &CosignedTreeHead,
    ) -> Result<(), PolicyError> {
        let log = self.logs.get(log_key_hash).ok_or(PolicyError::UnknownLog)?;
        cth.signed_tree_head
            .verify(log_key_hash, &log.public_key)
            .map_err(|_| PolicyError::BadLogSignature)?;

        let mut satisfied = HashSet::new();
        for cosig in &cth.cosignatures {
            let Some(witness_key) = self.witnesses.get(&cosig.key_hash) else {
                continue;
            };
            if cosig
                .verify(log_key_hash, &cth.signed_tree_head.tree_head, witness_key)
                .is_ok()
            {
                satisfied.insert(cosig.key_hash);
            }
        }

        if self.quorum.is_satisfied(&satisfied) {
            Ok(())
        } else {
            Err(PolicyError::QuorumFailure)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TreeHead;
    use pretty_assertions::assert_eq;
    use sigsum_crypto::signing::Ed25519Signer;
    use sigsum_crypto::Signer;

    fn policy_with(log: &Ed25519Signer, witnesses: &[&Ed25519Signer], k: usize) -> Policy {
        let mut doc = format!("log {}\n", log.public_key().to_hex());
        let names: Vec<String> = witnesses
            .iter()
            .enumerate()
            .map(|(i, w)| {
                doc.push_str(&format!("witness w{i} {}\n", w.public_key().to_hex()));
                format!("w{i}")
            })
            .collect();
        doc.push_str(&format!("group all {k} {}\n", names.join(" ")));
        doc.push_str("quorum all\n");
        Policy::parse(&doc).unwrap()
    }

    #[test]
    fn test_parse_rejects_unknown_directive() {
        assert_eq!(
            Policy::parse("frobnicate x\n").unwrap_err(),
            PolicyParseError::UnknownDirective("frobnicate".to_owned())
        );
    }

    #[test]
    fn test_parse_comments_and_blank_lines_ignored() {
        let log = Ed25519Signer::generate();
        let doc = format!("# a comment\n\nlog {}\nquorum none\n", log.public_key().to_hex());
        let policy = Policy::parse(&doc).unwrap();
        assert!(policy.log(&log.public_key().key_hash()).is_some());
    }

    #[test]
    fn test_quorum_k_of_n_succeeds_at_threshold() {
        let log = Ed25519Signer::generate();
        let w1 = Ed25519Signer::generate();
        let w2 = Ed25519Signer::generate();
        let w3 = Ed25519Signer::generate();
        let policy = policy_with(&log, &[&w1, &w2, &w3], 2);

        let log_key_hash = log.public_key().key_hash();
        let th = TreeHead {
            size: 4,
            root_hash: Hash::of(b"root"),
        };
        let sth = th.sign(log_key_hash, &log);
        let good1 = crate::types::Cosignature::sign(&log_key_hash, 1, &th, &w1);
        let good2 = crate::types::Cosignature::sign(&log_key_hash, 1, &th, &w2);
        // An invalid cosignature (wrong witness signing over the right data)
        // must not prevent the quorum from being satisfied.
        let mut bad = crate::types::Cosignature::sign(&log_key_hash, 1, &th, &w3);
        bad.signature = good1.signature;

        let cth = CosignedTreeHead {
            signed_tree_head: sth,
            cosignatures: vec![good1, good2, bad],
        };
        policy.verify_cosigned_tree_head(&log_key_hash, &cth).unwrap();
    }

    #[test]
    fn test_quorum_size_counts_all_witnesses() {
        let log = Ed25519Signer::generate();
        let w1 = Ed25519Signer::generate();
        let w2 = Ed25519Signer::generate();
        let w3 = Ed25519Signer::generate();
        let policy = policy_with(&log, &[&w1, &w2, &w3], 2);
        assert_eq!(policy.quorum_size(), 3);
    }

    #[test]
    fn test_quorum_fails_below_threshold() {
        let log = Ed25519Signer::generate();
        let w1 = Ed25519Signer::generate();
        let w2 = Ed25519Signer::generate();
        let w3 = Ed25519Signer::generate();
        let policy = policy_with(&log, &[&w1, &w2, &w3], 2);

        let log_key_hash = log.public_key().key_hash();
        let th = TreeHead {
            size: 4,
            root_hash: Hash::of(b"root"),
        };
        let sth = th.sign(log_key_hash, &log);
        let good1 = crate::types::Cosignature::sign(&log_key_hash, 1, &th, &w1);

        let cth = CosignedTreeHead {
            signed_tree_head: sth,
            cosignatures: vec![good1],
        };
        assert_eq!(
            policy.verify_cosigned_tree_head(&log_key_hash, &cth),
            Err(PolicyError::QuorumFailure)
        );
    }

    #[test]
    fn test_duplicate_witness_cosignature_counts_once() {
        let log = Ed25519Signer::generate();
        let w1 = Ed25519Signer::generate();
        let policy = policy_with(&log, &[&w1], 1);

        let log_key_hash = log.public_key().key_hash();
        let th = TreeHead {
            size: 4,
            root_hash: Hash::of(b"root"),
        };
        let sth = th.sign(log_key_hash, &log);
        let sig = crate::types::Cosignature::sign(&log_key_hash, 1, &th, &w1);

        let cth = CosignedTreeHead {
            signed_tree_head: sth,
            cosignatures: vec![sig, sig],
        };
        policy.verify_cosigned_tree_head(&log_key_hash, &cth).unwrap();
    }

    #[test]
    fn test_unknown_log_rejected() {
        let log = Ed25519Signer::generate();
        let other = Ed25519Signer::generate();
        let policy = Policy::trust_single_log(log.public_key().key_hash(), log.public_key());
        let th = TreeHead {
            size: 1,
            root_hash: Hash::of(b"root"),
        };
        let sth = th.sign(other.public_key().key_hash(), &other);
        let cth = CosignedTreeHead {
            signed_tree_head: sth,
            cosignatures: vec![],
        };
        assert_eq!(
            policy.verify_cosigned_tree_head(&other.public_key().key_hash(), &cth),
            Err(PolicyError::UnknownLog)
        );
    }

    #[test]
    fn test_group_size_must_not_exceed_member_count() {
        let w1 = Ed25519Signer::generate();
        let doc = format!(
            "witness w1 {}\ngroup g 2 w1\nquorum g\n",
            w1.public_key().to_hex()
        );
        assert_eq!(
            Policy::parse(&doc).unwrap_err(),
            PolicyParseError::InvalidGroupSize {
                name: "g".to_owned(),
                k: 2,
                n: 1,
            }
        );
    }

    #[test]
    fn test_load_file_parses_written_document() {
        let log = Ed25519Signer::generate();
        let doc = format!("log {}\nquorum none\n", log.public_key().to_hex());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy");
        std::fs::write(&path, &doc).unwrap();

        let policy = Policy::load_file(&path).unwrap();
        assert_eq!(policy.logs.len(), 1);
    }

    #[test]
    fn test_load_file_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Policy::load_file(dir.path().join("does-not-exist")).unwrap_err();
        assert!(err.to_string().contains("failed to read policy file"));
    }
}
