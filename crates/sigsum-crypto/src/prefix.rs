//! Domain-separated binary encoding used for everything this crate signs.
//!
//! Every signature in the Sigsum protocol is computed over a namespace
//! string followed by a small, fixed-shape payload (a leaf message, a tree
//! head, a cosignature, a submit token). [`SignedData`] gives each signable
//! type a single place to describe that payload; [`PrefixEncodeVisitor`]
//! turns the description into the exact bytes that get hashed/signed.

/// Something that can receive raw bytes during prefix encoding.
pub trait ByteVisitor {
    /// Appends `bytes` to the encoding.
    fn visit_bytes(&mut self, bytes: &[u8]);
}

impl ByteVisitor for Vec<u8> {
    fn visit_bytes(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// A type whose signed form is a namespace string followed by a
/// length-prefixed sequence of fields.
pub trait SignedData {
    /// The domain-separation namespace prefixed to every encoding of this
    /// type. Distinct namespaces across types and protocol versions prevent
    /// a signature produced for one purpose from being replayed as another.
    const NAMESPACE: &'static str;

    /// Visits the fields that make up this value's signed payload, in wire
    /// order.
    fn visit_pe<BV: ?Sized + ByteVisitor>(&self, visitor: &mut PrefixEncodeVisitor<'_, BV>);

    /// Returns the exact bytes that should be passed to
    /// [`crate::Signer::sign`] / [`crate::PublicKey::verify`] for this value.
    fn signed_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let mut visitor = PrefixEncodeVisitor::new(&mut out);
        visitor.visit_str_raw(Self::NAMESPACE);
        self.visit_pe(&mut visitor);
        out
    }
}

/// Encodes fields as raw bytes, LEB128-prefixed strings, or LEB128 integers.
pub struct PrefixEncodeVisitor<'a, BV>
where
    BV: ?Sized + ByteVisitor,
{
    buffer: [u8; 10],
    inner: &'a mut BV,
}

impl<'a, BV> PrefixEncodeVisitor<'a, BV>
where
    BV: ?Sized + ByteVisitor,
{
    /// Wraps a byte sink.
    pub fn new(inner: &'a mut BV) -> Self {
        Self {
            buffer: [0u8; 10],
            inner,
        }
    }

    /// Encodes an unsigned integer as LEB128.
    pub fn visit_unsigned(&mut self, i: u64) {
        let len = leb128::write::unsigned(&mut self.buffer.as_mut_slice(), i)
            .expect("buffer is large enough for any u64");
        self.inner.visit_bytes(&self.buffer[..len]);
    }

    /// Appends raw bytes with no length prefix.
    pub fn visit_bytes_raw(&mut self, bytes: &[u8]) {
        self.inner.visit_bytes(bytes);
    }

    /// Appends a raw (un-prefixed) ASCII string. Only safe to use as the
    /// final field, or when the string's length is implied elsewhere (as
    /// with [`SignedData::NAMESPACE`], which is always followed by a
    /// newline in the wire formats that embed it).
    pub fn visit_str_raw(&mut self, s: &str) {
        self.inner.visit_bytes(s.as_bytes());
        self.inner.visit_bytes(b"\n");
    }

    /// Appends a LEB128 length followed by the string's bytes.
    pub fn visit_str(&mut self, s: &str) {
        self.visit_unsigned(s.len() as u64);
        self.inner.visit_bytes(s.as_bytes());
    }
}
