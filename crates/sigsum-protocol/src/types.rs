//! Core wire/signing types: leaves, tree heads, and cosignatures (spec.md §3).

use crate::ascii::{Emitter, ParseError, Parser};
use sigsum_crypto::prefix::{ByteVisitor, PrefixEncodeVisitor, SignedData};
use sigsum_crypto::{Hash, PublicKey, Signature};

/// Fixed namespace a submitter signs `message` under; shared by every log.
const LEAF_NAMESPACE: &str = "sigsum.org/v1/tree-leaf";

/// A 32-byte submitter message, signed directly (not re-hashed) to produce
/// a [`Leaf`]'s signature.
pub struct LeafMessage(pub Hash);

impl SignedData for LeafMessage {
    const NAMESPACE: &'static str = LEAF_NAMESPACE;

    fn visit_pe<BV: ?Sized + ByteVisitor>(&self, visitor: &mut PrefixEncodeVisitor<'_, BV>) {
        visitor.visit_bytes_raw(self.0.as_bytes());
    }
}

/// A request to add a leaf to a log: the message, the submitter's public
/// key, and the submitter's signature over [`LeafMessage`]. The log derives
/// `checksum = H(message)` and `key_hash = H(public_key)` itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LeafRequest {
    /// The 32-byte value the submitter signed.
    pub message: Hash,
    /// The submitter's public key.
    pub public_key: PublicKey,
    /// The submitter's signature over `message` under [`LEAF_NAMESPACE`].
    pub signature: Signature,
}

impl LeafRequest {
    /// Builds the request, signing `message` with `signer`.
    pub fn sign(message: Hash, signer: &impl sigsum_crypto::Signer) -> Self {
        let signature = signer.sign(&LeafMessage(message).signed_bytes());
        LeafRequest {
            message,
            public_key: signer.public_key(),
            signature,
        }
    }

    /// Verifies the embedded signature and turns this request into the
    /// [`Leaf`] a log would store for it.
    pub fn into_leaf(self) -> Result<Leaf, sigsum_crypto::signing::PublicKeyError> {
        self.public_key
            .verify(&LeafMessage(self.message).signed_bytes(), &self.signature)?;
        Ok(Leaf {
            checksum: Hash::of(self.message.as_bytes()),
            signature: self.signature,
            key_hash: self.public_key.key_hash(),
        })
    }

    /// Writes this request as the `add-leaf` POST body.
    pub fn to_ascii(&self) -> String {
        let mut e = Emitter::new();
        e.put_hex("message", self.message);
        e.put_hex("public_key", self.public_key);
        e.put_hex("signature", self.signature);
        e.finish()
    }

    /// Parses an `add-leaf` POST body.
    pub fn from_ascii(input: &str) -> Result<Self, ParseError> {
        let mut p = Parser::new(input);
        let message = p.get_hash("message")?;
        let public_key = p.get_public_key("public_key")?;
        let signature = p.get_signature("signature")?;
        p.get_eof()?;
        Ok(LeafRequest {
            message,
            public_key,
            signature,
        })
    }
}

/// A leaf already accepted by a log (spec.md §3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leaf {
    /// `H(message)`.
    pub checksum: Hash,
    /// The submitter's signature over `message`.
    pub signature: Signature,
    /// `H(public_key)`.
    pub key_hash: Hash,
}

impl Leaf {
    /// Verifies that `self` could have been produced for `message` signed
    /// by `public_key`.
    pub fn verify(
        &self,
        public_key: &PublicKey,
        message: Hash,
    ) -> Result<(), sigsum_crypto::signing::PublicKeyError> {
        if self.checksum != Hash::of(message.as_bytes()) || self.key_hash != public_key.key_hash()
        {
            return Err(sigsum_crypto::signing::PublicKeyError::BadSignature);
        }
        public_key.verify(&LeafMessage(message).signed_bytes(), &self.signature)
    }

    /// The Merkle leaf hash `H(0x00 || checksum || key_hash || signature)`.
    pub fn merkle_hash(&self) -> Hash {
        let mut data = Vec::with_capacity(32 + 32 + 64);
        data.extend_from_slice(self.checksum.as_bytes());
        data.extend_from_slice(self.key_hash.as_bytes());
        data.extend_from_slice(self.signature.as_bytes());
        sigsum_transparency::leaf_hash(&data)
    }

    /// Writes this leaf's `get-leaves` paragraph.
    pub fn to_ascii(&self) -> String {
        let mut e = Emitter::new();
        e.put_hex("checksum", self.checksum);
        e.put_hex("signature", self.signature);
        e.put_hex("key_hash", self.key_hash);
        e.finish()
    }

    /// Parses one `get-leaves` paragraph from `input`, requiring it to be
    /// the only paragraph present.
    pub fn from_ascii(input: &str) -> Result<Self, ParseError> {
        let mut p = Parser::new(input);
        let leaf = Self::parse(&mut p)?;
        p.get_eof()?;
        Ok(leaf)
    }

    /// Parses one `get-leaves` paragraph from a shared parser, leaving the
    /// parser positioned at the following paragraph boundary (if any).
    pub fn parse(p: &mut Parser<'_>) -> Result<Self, ParseError> {
        let checksum = p.get_hash("checksum")?;
        let signature = p.get_signature("signature")?;
        let key_hash = p.get_hash("key_hash")?;
        Ok(Leaf {
            checksum,
            signature,
            key_hash,
        })
    }
}

/// Writes a sequence of leaves as repeated `get-leaves` paragraphs,
/// separated by blank lines.
pub fn leaves_to_ascii(leaves: &[Leaf]) -> String {
    let mut e = Emitter::new();
    for (i, leaf) in leaves.iter().enumerate() {
        if i > 0 {
            e.paragraph_break();
        }
        e.put_raw(&leaf.to_ascii());
    }
    e.finish()
}

/// Parses a `get-leaves` response body: zero or more `Leaf` paragraphs
/// separated by blank lines.
pub fn leaves_from_ascii(input: &str) -> Result<Vec<Leaf>, ParseError> {
    if input.is_empty() {
        return Ok(Vec::new());
    }
    let mut p = Parser::new(input);
    let mut leaves = vec![Leaf::parse(&mut p)?];
    while !p.at_eof() {
        p.next_paragraph()?;
        leaves.push(Leaf::parse(&mut p)?);
    }
    p.get_eof()?;
    Ok(leaves)
}

/// `(size, root_hash)`: a commitment to the first `size` leaves of a log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeHead {
    /// The number of leaves committed to.
    pub size: u64,
    /// The Merkle root over those leaves.
    pub root_hash: Hash,
}

fn tree_head_namespace(log_key_hash: &Hash) -> String {
    format!("sigsum.org/v1/tree-head:{}", log_key_hash.to_hex())
}

impl TreeHead {
    fn signed_bytes(&self, log_key_hash: &Hash) -> Vec<u8> {
        let mut out = Vec::new();
        let mut visitor = PrefixEncodeVisitor::new(&mut out);
        visitor.visit_str_raw(&tree_head_namespace(log_key_hash));
        visitor.visit_unsigned(self.size);
        visitor.visit_bytes_raw(self.root_hash.as_bytes());
        out
    }

    /// Signs this tree head as the given log.
    pub fn sign(self, log_key_hash: Hash, signer: &impl sigsum_crypto::Signer) -> SignedTreeHead {
        let signature = signer.sign(&self.signed_bytes(&log_key_hash));
        SignedTreeHead {
            tree_head: self,
            signature,
        }
    }
}

/// A [`TreeHead`] signed by the log that produced it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SignedTreeHead {
    /// The committed tree head.
    pub tree_head: TreeHead,
    /// The log's signature over `(size, root_hash)`.
    pub signature: Signature,
}

impl SignedTreeHead {
    /// Verifies the log's signature under `log_public_key`, whose key hash
    /// must equal `log_key_hash` (the namespace binds to the hash, not the
    /// key, so callers pass both).
    pub fn verify(
        &self,
        log_key_hash: &Hash,
        log_public_key: &PublicKey,
    ) -> Result<(), sigsum_crypto::signing::PublicKeyError> {
        log_public_key.verify(
            &self.tree_head.signed_bytes(log_key_hash),
            &self.signature,
        )
    }
}

fn cosignature_namespace(log_key_hash: &Hash) -> String {
    format!("sigsum.org/v1/cosignature:{}", log_key_hash.to_hex())
}

/// A witness's signature over a timestamped tree head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cosignature {
    /// `H(witness public key)`.
    pub key_hash: Hash,
    /// Unix timestamp at which the witness observed the head.
    pub timestamp: u64,
    /// The witness's signature.
    pub signature: Signature,
}

impl Cosignature {
    fn signed_bytes(log_key_hash: &Hash, timestamp: u64, tree_head: &TreeHead) -> Vec<u8> {
        let mut out = Vec::new();
        let mut visitor = PrefixEncodeVisitor::new(&mut out);
        visitor.visit_str_raw(&cosignature_namespace(log_key_hash));
        visitor.visit_unsigned(timestamp);
        visitor.visit_unsigned(tree_head.size);
        visitor.visit_bytes_raw(tree_head.root_hash.as_bytes());
        out
    }

    /// Produces a cosignature over `tree_head` as the given witness.
    pub fn sign(
        log_key_hash: &Hash,
        timestamp: u64,
        tree_head: &TreeHead,
        signer: &impl sigsum_crypto::Signer,
    ) -> Self {
        let signature = signer.sign(&Self::signed_bytes(log_key_hash, timestamp, tree_head));
        Cosignature {
            key_hash: signer.public_key().key_hash(),
            timestamp,
            signature,
        }
    }

    /// Verifies this cosignature under `witness_public_key`.
    pub fn verify(
        &self,
        log_key_hash: &Hash,
        tree_head: &TreeHead,
        witness_public_key: &PublicKey,
    ) -> Result<(), sigsum_crypto::signing::PublicKeyError> {
        witness_public_key.verify(
            &Self::signed_bytes(log_key_hash, self.timestamp, tree_head),
            &self.signature,
        )
    }
}

/// A [`SignedTreeHead`] plus the cosignatures collected for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CosignedTreeHead {
    /// The log-signed tree head.
    pub signed_tree_head: SignedTreeHead,
    /// Witness cosignatures gathered for this head, in receipt order.
    pub cosignatures: Vec<Cosignature>,
}

impl CosignedTreeHead {
    /// Writes this cosigned tree head as one ASCII paragraph group (the
    /// tree head fields followed by one `cosignature=` line per witness).
    pub fn to_ascii(&self) -> String {
        let mut e = Emitter::new();
        e.put_int("size", self.signed_tree_head.tree_head.size);
        e.put_hex("root_hash", self.signed_tree_head.tree_head.root_hash);
        e.put_hex("signature", self.signed_tree_head.signature);
        for c in &self.cosignatures {
            e.put_values(
                "cosignature",
                &[
                    &c.key_hash.to_hex(),
                    &c.timestamp.to_string(),
                    &c.signature.to_hex(),
                ],
            );
        }
        e.finish()
    }

    /// Parses a standalone cosigned tree head paragraph group.
    pub fn from_ascii(input: &str) -> Result<Self, ParseError> {
        let mut p = Parser::new(input);
        let cth = Self::parse(&mut p)?;
        p.get_eof()?;
        Ok(cth)
    }

    /// Parses a cosigned tree head paragraph group from a shared parser,
    /// stopping at the next paragraph boundary or end of input.
    pub fn parse(p: &mut Parser<'_>) -> Result<Self, ParseError> {
        let size = p.get_int("size")?;
        let root_hash = p.get_hash("root_hash")?;
        let signature = p.get_signature("signature")?;
        let mut cosignatures = Vec::new();
        while !p.at_paragraph_boundary() {
            let values = p.get_values("cosignature", 3)?;
            let key_hash = Hash::from_hex(&values[0]).map_err(|e| ParseError::MalformedValue {
                key: "cosignature".to_owned(),
                reason: e.to_string(),
            })?;
            let timestamp = values[1]
                .parse::<u64>()
                .map_err(|e| ParseError::MalformedValue {
                    key: "cosignature".to_owned(),
                    reason: e.to_string(),
                })?;
            let signature =
                Signature::from_hex(&values[2]).map_err(|e| ParseError::MalformedValue {
                    key: "cosignature".to_owned(),
                    reason: e.to_string(),
                })?;
            cosignatures.push(Cosignature {
                key_hash,
                timestamp,
                signature,
            });
        }
        Ok(CosignedTreeHead {
            signed_tree_head: SignedTreeHead {
                tree_head: TreeHead { size, root_hash },
                signature,
            },
            cosignatures,
        })
    }
}
