//! The composite `SigsumProof` and its end-to-end verification (spec.md §4.4).

use crate::ascii::{Emitter, ParseError, Parser};
use crate::policy::{Policy, PolicyError};
use crate::types::{CosignedTreeHead, Leaf};
use sigsum_crypto::{Hash, PublicKey, Signature};
use sigsum_transparency::{verify_inclusion, ConsistencyProof, InclusionProof, MerkleError};
use std::collections::HashMap;
use thiserror::Error;

/// The current (default) proof format version.
pub const VERSION_CURRENT: u64 = 2;
/// The legacy proof format version the codec still accepts, which carries
/// an extra 2-byte truncated checksum in the leaf paragraph.
pub const VERSION_LEGACY: u64 = 1;

/// The submitter half of a [`Leaf`]; the checksum is reconstructed from the
/// message at verification time rather than stored in the proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortLeaf {
    /// The submitter's signature.
    pub signature: Signature,
    /// `H(submitter public key)`.
    pub key_hash: Hash,
}

/// `(log_key_hash, short_leaf, cosigned tree head, inclusion proof)`: binds
/// a message to an append-only log at a specific position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigsumProof {
    /// `H(log public key)`.
    pub log_key_hash: Hash,
    /// The submitter signature and key hash.
    pub short_leaf: ShortLeaf,
    /// The cosigned tree head the leaf is claimed to be included under.
    pub tree_head: CosignedTreeHead,
    /// Empty when `tree_head.signed_tree_head.tree_head.size == 1`.
    pub inclusion: InclusionProof,
}

/// Errors returned while verifying a [`SigsumProof`].
#[derive(Error, Debug, PartialEq, Eq)]
pub enum VerifyError {
    /// `submit_keys` has no entry for the leaf's `key_hash`.
    #[error("unknown submitter key hash")]
    UnknownSubmitter,
    /// The leaf signature did not verify under the submitter's public key.
    #[error("bad leaf signature")]
    BadLeafSignature,
    /// Policy verification of the cosigned tree head failed.
    #[error("policy verification failed: {0}")]
    Policy(#[from] PolicyError),
    /// The tree head claims a size of zero; a proof may never reference an
    /// empty tree.
    #[error("proof references an empty tree")]
    EmptyTree,
    /// A size-1 tree's root hash did not equal the leaf's own Merkle hash.
    #[error("root hash does not match the lone leaf")]
    InclusionMismatch,
    /// The Merkle inclusion proof itself failed to verify.
    #[error("inclusion proof invalid: {0}")]
    InclusionInvalid(#[from] MerkleError),
}

impl SigsumProof {
    /// Verifies this proof for `msg` against `policy`, resolving the
    /// submitter's public key via `submit_keys` (keyed by `key_hash`).
    pub fn verify(
        &self,
        msg: &[u8],
        submit_keys: &HashMap<Hash, PublicKey>,
        policy: &Policy,
    ) -> Result<(), VerifyError> {
        let checksum = Hash::of(msg);
        let public_key = submit_keys
            .get(&self.short_leaf.key_hash)
            .ok_or(VerifyError::UnknownSubmitter)?;
        let leaf = Leaf {
            checksum,
            signature: self.short_leaf.signature,
            key_hash: self.short_leaf.key_hash,
        };
        let message = Hash::of(msg);
        leaf.verify(public_key, message)
            .map_err(|_| VerifyError::BadLeafSignature)?;

        policy.verify_cosigned_tree_head(&self.log_key_hash, &self.tree_head)?;

        let th = &self.tree_head.signed_tree_head.tree_head;
        if th.size == 0 {
            return Err(VerifyError::EmptyTree);
        }
        if th.size == 1 {
            if th.root_hash != leaf.merkle_hash() {
                return Err(VerifyError::InclusionMismatch);
            }
            return Ok(());
        }
        verify_inclusion(
            &leaf.merkle_hash(),
            self.inclusion.leaf_index,
            th.size,
            &th.root_hash,
            &self.inclusion,
        )?;
        Ok(())
    }

    /// `verify` under a synthetic policy trusting only `log_public_key`
    /// with no witness requirement.
    pub fn verify_no_cosignatures(
        &self,
        msg: &[u8],
        submit_keys: &HashMap<Hash, PublicKey>,
        log_public_key: PublicKey,
    ) -> Result<(), VerifyError> {
        let policy = Policy::trust_single_log(self.log_key_hash, log_public_key);
        self.verify(msg, submit_keys, &policy)
    }

    /// Writes this proof as the `version=2` (or `version=1`, if
    /// `legacy_checksum` is supplied) ASCII proof file.
    pub fn to_ascii(&self, legacy_checksum: Option<Hash>) -> String {
        let mut e = Emitter::new();
        let version = if legacy_checksum.is_some() {
            VERSION_LEGACY
        } else {
            VERSION_CURRENT
        };
        e.put_int("version", version);
        e.put_hex("log", self.log_key_hash);
        e.paragraph_break();
        match legacy_checksum {
            Some(checksum) => {
                let truncated = &checksum.as_bytes()[..2];
                e.put_values(
                    "leaf",
                    &[
                        &hex::encode(truncated),
                        &self.short_leaf.key_hash.to_hex(),
                        &self.short_leaf.signature.to_hex(),
                    ],
                );
            }
            None => {
                e.put_values(
                    "leaf",
                    &[
                        &self.short_leaf.key_hash.to_hex(),
                        &self.short_leaf.signature.to_hex(),
                    ],
                );
            }
        }
        e.paragraph_break();
        e.put_raw(&self.tree_head.to_ascii());
        let size = self.tree_head.signed_tree_head.tree_head.size;
        if size > 1 {
            e.paragraph_break();
            e.put_raw(&inclusion_proof_to_ascii(&self.inclusion));
        }
        e.finish()
    }

    /// Parses an ASCII proof file, checking that `msg` is consistent with
    /// any legacy truncated checksum it carries.
    pub fn from_ascii(input: &str, msg: &[u8]) -> Result<Self, ProofParseError> {
        let mut p = Parser::new(input);
        let version = p.get_int("version")?;
        if version == 0 || (version != VERSION_CURRENT && version != VERSION_LEGACY) {
            return Err(ProofParseError::UnsupportedVersion(version));
        }
        let log_key_hash = p.get_hash("log")?;
        p.next_paragraph()?;

        let short_leaf = if version == VERSION_LEGACY {
            let values = p.get_values("leaf", 3)?;
            let truncated = hex::decode(&values[0])
                .map_err(|_| ParseError::MalformedValue {
                    key: "leaf".to_owned(),
                    reason: "truncated checksum is not valid hex".to_owned(),
                })?;
            let checksum = Hash::of(msg);
            if truncated.as_slice() != &checksum.as_bytes()[..2] {
                return Err(ProofParseError::LegacyChecksumMismatch);
            }
            ShortLeaf {
                key_hash: Hash::from_hex(&values[1]).map_err(|e| ParseError::MalformedValue {
                    key: "leaf".to_owned(),
                    reason: e.to_string(),
                })?,
                signature: Signature::from_hex(&values[2]).map_err(|e| {
                    ParseError::MalformedValue {
                        key: "leaf".to_owned(),
                        reason: e.to_string(),
                    }
                })?,
            }
        } else {
            let values = p.get_values("leaf", 2)?;
            ShortLeaf {
                key_hash: Hash::from_hex(&values[0]).map_err(|e| ParseError::MalformedValue {
                    key: "leaf".to_owned(),
                    reason: e.to_string(),
                })?,
                signature: Signature::from_hex(&values[1]).map_err(|e| {
                    ParseError::MalformedValue {
                        key: "leaf".to_owned(),
                        reason: e.to_string(),
                    }
                })?,
            }
        };
        p.next_paragraph()?;

        let tree_head = CosignedTreeHead::parse(&mut p)?;
        let size = tree_head.signed_tree_head.tree_head.size;

        let inclusion = if size > 1 {
            p.next_paragraph()?;
            let leaf_index = p.get_int("leaf_index")?;
            let path = p.get_hash_list("path")?;
            InclusionProof { leaf_index, path }
        } else {
            InclusionProof {
                leaf_index: 0,
                path: Vec::new(),
            }
        };
        p.get_eof()?;

        Ok(SigsumProof {
            log_key_hash,
            short_leaf,
            tree_head,
            inclusion,
        })
    }
}

/// Writes a standalone `InclusionProof` paragraph (`leaf_index`, `path`),
/// as returned by the `get-inclusion-proof` endpoint.
pub fn inclusion_proof_to_ascii(proof: &InclusionProof) -> String {
    let mut e = Emitter::new();
    e.put_int("leaf_index", proof.leaf_index);
    e.put_hash_list("path", &proof.path);
    e.finish()
}

/// Parses a standalone `InclusionProof` paragraph.
pub fn inclusion_proof_from_ascii(input: &str) -> Result<InclusionProof, ParseError> {
    let mut p = Parser::new(input);
    let leaf_index = p.get_int("leaf_index")?;
    let path = p.get_hash_list("path")?;
    p.get_eof()?;
    Ok(InclusionProof { leaf_index, path })
}

/// Writes a standalone `ConsistencyProof` paragraph (`path`), as returned
/// by the `get-consistency-proof` endpoint.
pub fn consistency_proof_to_ascii(proof: &ConsistencyProof) -> String {
    let mut e = Emitter::new();
    e.put_hash_list("path", &proof.path);
    e.finish()
}

/// Parses a standalone `ConsistencyProof` paragraph.
pub fn consistency_proof_from_ascii(input: &str) -> Result<ConsistencyProof, ParseError> {
    let mut p = Parser::new(input);
    let path = p.get_hash_list("path")?;
    p.get_eof()?;
    Ok(ConsistencyProof { path })
}

/// Errors returned while parsing an ASCII proof file.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProofParseError {
    /// A codec-level parse error.
    #[error(transparent)]
    Parse(#[from] ParseError),
    /// The `version` field named a version other than the current or
    /// legacy one (version 0 is explicitly rejected, per spec.md §9).
    #[error("unsupported proof version {0}")]
    UnsupportedVersion(u64),
    /// A legacy (v1) proof's truncated checksum did not match `H(msg)`.
    #[error("legacy truncated checksum does not match the given message")]
    LegacyChecksumMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Policy;
    use crate::types::{Cosignature, CosignedTreeHead, LeafRequest, SignedTreeHead, TreeHead};
    use pretty_assertions::assert_eq;
    use sigsum_crypto::signing::Ed25519Signer;
    use sigsum_crypto::Signer;
    use sigsum_transparency::{prove_inclusion, root_from_leaves};
    use std::collections::HashMap;

    struct Fixture {
        msg: Vec<u8>,
        submit_keys: HashMap<Hash, PublicKey>,
        policy: Policy,
        proof: SigsumProof,
    }

    /// Builds a `size`-leaf tree whose leaf at `index` is `msg`'s leaf,
    /// cosigned by a single witness satisfying a `quorum 1-of-1` policy.
    fn build(size: u64, index: u64, msg: &[u8]) -> Fixture {
        let submitter = Ed25519Signer::generate();
        let log_signer = Ed25519Signer::generate();
        let log_key_hash = log_signer.public_key().key_hash();
        let witness = Ed25519Signer::generate();

        let req = LeafRequest::sign(Hash::of(msg), &submitter);
        let leaf = req.clone().into_leaf().unwrap();
        let mut hashes: Vec<Hash> = (0..size)
            .map(|i| Hash::of(format!("filler-leaf-{i}").as_bytes()))
            .collect();
        hashes[index as usize] = leaf.merkle_hash();
        let root_hash = root_from_leaves(&hashes);

        let th = TreeHead { size, root_hash };
        let sth = th.sign(log_key_hash, &log_signer);
        let cosig = Cosignature::sign(&log_key_hash, 1_700_000_000, &th, &witness);
        let cth = CosignedTreeHead {
            signed_tree_head: SignedTreeHead {
                tree_head: sth.tree_head,
                signature: sth.signature,
            },
            cosignatures: vec![cosig],
        };

        let inclusion = if size > 1 {
            prove_inclusion(&hashes, index).unwrap()
        } else {
            InclusionProof {
                leaf_index: 0,
                path: Vec::new(),
            }
        };

        let mut submit_keys = HashMap::new();
        submit_keys.insert(leaf.key_hash, submitter.public_key());

        let policy_text = format!(
            "log {}\nwitness w {}\nquorum w\n",
            log_signer.public_key().to_hex(),
            witness.public_key().to_hex(),
        );
        let policy = Policy::parse(&policy_text).unwrap();

        let proof = SigsumProof {
            log_key_hash,
            short_leaf: ShortLeaf {
                signature: leaf.signature,
                key_hash: leaf.key_hash,
            },
            tree_head: cth,
            inclusion,
        };

        Fixture {
            msg: msg.to_vec(),
            submit_keys,
            policy,
            proof,
        }
    }

    #[test]
    fn test_verify_size_one_proof_succeeds() {
        let f = build(1, 0, b"hello");
        f.proof.verify(&f.msg, &f.submit_keys, &f.policy).unwrap();
    }

    #[test]
    fn test_verify_size_one_proof_rejects_flipped_root() {
        let mut f = build(1, 0, b"hello");
        f.proof.tree_head.signed_tree_head.tree_head.root_hash = Hash::of(b"not the root");
        // A tampered root also breaks the log's own signature, so this
        // surfaces as a policy failure before the inclusion check runs.
        assert!(f.proof.verify(&f.msg, &f.submit_keys, &f.policy).is_err());
    }

    #[test]
    fn test_verify_size_four_proof_succeeds_and_rejects_wrong_index() {
        let mut f = build(4, 2, b"hello");
        f.proof.verify(&f.msg, &f.submit_keys, &f.policy).unwrap();
        assert_eq!(f.proof.inclusion.path.len(), 2);

        f.proof.inclusion.leaf_index += 1;
        assert_eq!(
            f.proof.verify(&f.msg, &f.submit_keys, &f.policy),
            Err(VerifyError::InclusionInvalid(
                MerkleError::InvalidInclusionProof
            ))
        );
    }

    #[test]
    fn test_verify_rejects_unknown_submitter() {
        let mut f = build(1, 0, b"hello");
        f.submit_keys.clear();
        assert_eq!(
            f.proof.verify(&f.msg, &f.submit_keys, &f.policy),
            Err(VerifyError::UnknownSubmitter)
        );
    }

    #[test]
    fn test_ascii_roundtrip_current_version() {
        let f = build(4, 2, b"hello");
        let doc = f.proof.to_ascii(None);
        let parsed = SigsumProof::from_ascii(&doc, &f.msg).unwrap();
        assert_eq!(parsed, f.proof);
    }

    #[test]
    fn test_ascii_roundtrip_size_one_omits_inclusion_paragraph() {
        let f = build(1, 0, b"hello");
        let doc = f.proof.to_ascii(None);
        assert!(!doc.contains("leaf_index="));
        let parsed = SigsumProof::from_ascii(&doc, &f.msg).unwrap();
        assert_eq!(parsed, f.proof);
    }

    #[test]
    fn test_legacy_version_checksum_cross_check() {
        let f = build(1, 0, b"hello");
        let checksum = Hash::of(&f.msg);
        let doc = f.proof.to_ascii(Some(checksum));
        assert!(doc.starts_with("version=1\n"));
        let parsed = SigsumProof::from_ascii(&doc, &f.msg).unwrap();
        assert_eq!(parsed, f.proof);
    }

    #[test]
    fn test_rejects_version_zero() {
        let doc = "version=0\nlog=00\n";
        assert_eq!(
            SigsumProof::from_ascii(doc, b"hello"),
            Err(ProofParseError::UnsupportedVersion(0))
        );
    }

    #[test]
    fn test_inclusion_proof_standalone_ascii_roundtrip() {
        let proof = InclusionProof {
            leaf_index: 2,
            path: vec![Hash::of(b"a"), Hash::of(b"b")],
        };
        let doc = inclusion_proof_to_ascii(&proof);
        assert_eq!(inclusion_proof_from_ascii(&doc).unwrap(), proof);
    }

    #[test]
    fn test_consistency_proof_standalone_ascii_roundtrip() {
        let proof = ConsistencyProof {
            path: vec![Hash::of(b"a")],
        };
        let doc = consistency_proof_to_ascii(&proof);
        assert_eq!(consistency_proof_from_ascii(&doc).unwrap(), proof);
    }

    #[test]
    fn test_consistency_proof_standalone_ascii_roundtrip_empty() {
        let proof = ConsistencyProof { path: Vec::new() };
        let doc = consistency_proof_to_ascii(&proof);
        assert_eq!(consistency_proof_from_ascii(&doc).unwrap(), proof);
    }
}
