//! Submit-token construction and verification (spec.md §4.8), the
//! `Sigsum-Token:` HTTP header codec (spec.md §6), and the domain
//! normalization used by the DNS-backed verifier in `sigsum-client`.
//!
//! A submit token is a signature, made by whoever controls a domain, over
//! that log's public key. A log checks the token by resolving a TXT record
//! at the domain and verifying the signature against each key found there;
//! that lookup itself lives in `sigsum-client`, since it needs an injected
//! resolver for testability. This module only covers the parts that don't
//! touch the network.

use sigsum_crypto::prefix::PrefixEncodeVisitor;
use sigsum_crypto::signing::{PublicKeyError, SignatureParseError};
use sigsum_crypto::{PublicKey, Signature, Signer};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Namespace for the current (v1) submit-token encoding.
pub const TOKEN_NAMESPACE_CURRENT: &str = "submit-token:v1@sigsum.org";
/// Namespace for the legacy (v0) submit-token encoding, still accepted on
/// verify.
pub const TOKEN_NAMESPACE_LEGACY: &str = "submit-token:v0@sigsum.org";

// Namespace is chosen per call (current to sign, either to verify), so this
// builds the signed bytes directly rather than going through `SignedData`,
// the same way `TreeHead`/`Cosignature` do for their per-instance namespaces.
fn token_signed_bytes(namespace: &str, log_public_key: &PublicKey) -> Vec<u8> {
    let mut out = Vec::new();
    let mut visitor = PrefixEncodeVisitor::new(&mut out);
    visitor.visit_str_raw(namespace);
    visitor.visit_bytes_raw(log_public_key.as_bytes());
    out
}

/// Signs `log_public_key` as a submit token, in the current (v1) encoding.
pub fn make_token<S: Signer + ?Sized>(signer: &S, log_public_key: &PublicKey) -> Signature {
    signer.sign(&token_signed_bytes(TOKEN_NAMESPACE_CURRENT, log_public_key))
}

/// Errors returned while verifying a submit token.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    /// `signature` verified under neither the current nor the legacy
    /// namespace.
    #[error("submit token signature verification failed")]
    BadSignature,
}

/// Verifies `signature` as a submit token over `log_public_key` made by
/// `key`, accepting either the current or legacy namespace.
pub fn verify_token(
    key: &PublicKey,
    log_public_key: &PublicKey,
    signature: &Signature,
) -> Result<(), TokenError> {
    let current = token_signed_bytes(TOKEN_NAMESPACE_CURRENT, log_public_key);
    if key.verify(&current, signature).is_ok() {
        return Ok(());
    }
    let legacy = token_signed_bytes(TOKEN_NAMESPACE_LEGACY, log_public_key);
    key.verify(&legacy, signature)
        .map_err(|_: PublicKeyError| TokenError::BadSignature)
}

/// Errors returned while normalizing a domain name.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum DomainError {
    /// The domain did not pass IDNA to-ASCII processing.
    #[error("domain failed IDNA processing")]
    Idna,
    /// Converting the ASCII form back to a u-label produced a different
    /// string than the NFKC-lowercased input, suggesting a confusable or
    /// non-canonical domain.
    #[error("domain does not round-trip through IDNA canonically")]
    NotCanonical,
}

/// Normalizes `domain` per spec.md §4.8: NFKC, lowercase, IDNA to-ASCII,
/// then back to a u-label to confirm the round trip is lossless. Returns
/// the ASCII (punycode) form, suitable for building a DNS query name.
pub fn normalize_domain(domain: &str) -> Result<String, DomainError> {
    let lowered: String = domain.nfkc().collect::<String>().to_lowercase();
    let ascii = idna::domain_to_ascii(&lowered).map_err(|_| DomainError::Idna)?;
    let (unicode, result) = idna::domain_to_unicode(&ascii);
    result.map_err(|_| DomainError::Idna)?;
    if unicode != lowered {
        return Err(DomainError::NotCanonical);
    }
    Ok(ascii)
}

/// A parsed `Sigsum-Token` HTTP header value: `<domain> <hex-signature>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubmitHeader {
    /// The unnormalized domain as presented in the header.
    pub domain: String,
    /// The submit token.
    pub token: Signature,
}

/// Errors returned while parsing a `Sigsum-Token` header value.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SubmitHeaderParseError {
    /// The value was not exactly `<domain> <hex-signature>`.
    #[error("malformed Sigsum-Token header value")]
    Malformed,
    /// The signature half was not valid hex of the right length.
    #[error("malformed submit token signature: {0}")]
    BadSignature(#[from] SignatureParseError),
}

impl SubmitHeader {
    /// Renders this header's value (the header name itself is
    /// case-insensitive and chosen by the caller).
    pub fn to_header_value(&self) -> String {
        format!("{} {}", self.domain, self.token.to_hex())
    }

    /// Parses a `Sigsum-Token` header value, stripping trailing
    /// whitespace/newlines first.
    pub fn parse(value: &str) -> Result<Self, SubmitHeaderParseError> {
        let trimmed = value.trim_end().trim_end_matches(['\r', '\n']);
        let (domain, token_hex) = trimmed
            .split_once(' ')
            .ok_or(SubmitHeaderParseError::Malformed)?;
        if domain.is_empty() || token_hex.is_empty() || token_hex.contains(' ') {
            return Err(SubmitHeaderParseError::Malformed);
        }
        let token = Signature::from_hex(token_hex)?;
        Ok(SubmitHeader {
            domain: domain.to_owned(),
            token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sigsum_crypto::signing::Ed25519Signer;

    #[test]
    fn test_token_roundtrip_current_namespace() {
        let domain_key = Ed25519Signer::generate();
        let log_key = Ed25519Signer::generate().public_key();
        let token = make_token(&domain_key, &log_key);
        verify_token(&domain_key.public_key(), &log_key, &token).unwrap();
    }

    #[test]
    fn test_legacy_namespace_still_verifies() {
        let domain_key = Ed25519Signer::generate();
        let log_key = Ed25519Signer::generate().public_key();
        let legacy_bytes = token_signed_bytes(TOKEN_NAMESPACE_LEGACY, &log_key);
        let token = domain_key.sign(&legacy_bytes);
        verify_token(&domain_key.public_key(), &log_key, &token).unwrap();
    }

    #[test]
    fn test_token_rejects_wrong_log_key() {
        let domain_key = Ed25519Signer::generate();
        let log_key = Ed25519Signer::generate().public_key();
        let other_log_key = Ed25519Signer::generate().public_key();
        let token = make_token(&domain_key, &log_key);
        assert_eq!(
            verify_token(&domain_key.public_key(), &other_log_key, &token),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn test_normalize_domain_lowercases_ascii() {
        assert_eq!(normalize_domain("Example.TEST").unwrap(), "example.test");
    }

    #[test]
    fn test_normalize_domain_idna_roundtrip() {
        let ascii = normalize_domain("münchen.example").unwrap();
        assert!(ascii.starts_with("xn--"));
    }

    #[test]
    fn test_submit_header_roundtrip() {
        let signer = Ed25519Signer::generate();
        let header = SubmitHeader {
            domain: "example.test".to_owned(),
            token: signer.sign(b"whatever"),
        };
        let value = header.to_header_value();
        assert_eq!(SubmitHeader::parse(&value).unwrap(), header);
    }

    #[test]
    fn test_submit_header_strips_trailing_newline() {
        let signer = Ed25519Signer::generate();
        let token = signer.sign(b"whatever");
        let value = format!("example.test {}\r\n", token.to_hex());
        let header = SubmitHeader::parse(&value).unwrap();
        assert_eq!(header.domain, "example.test");
        assert_eq!(header.token, token);
    }

    #[test]
    fn test_submit_header_rejects_missing_space() {
        assert_eq!(
            SubmitHeader::parse("example.test"),
            Err(SubmitHeaderParseError::Malformed)
        );
    }
}
