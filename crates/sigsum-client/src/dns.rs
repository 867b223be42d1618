//! DNS-backed submit-token verification (spec.md §4.8).
//!
//! DNS resolution is abstracted behind [`TxtLookup`] so tests can supply
//! canned records instead of touching the network (spec.md §1).

use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use sigsum_crypto::{PublicKey, Signature};
use sigsum_protocol::{normalize_domain, verify_token, DomainError};
use thiserror::Error;

/// The maximum number of TXT records a [`DnsVerifier`] will inspect at
/// `_sigsum_v1.<domain>` (spec.md §4.8 step 2).
pub const MAX_TXT_RECORDS: usize = 10;

/// A TXT-record lookup, injected so [`DnsVerifier`] is testable without a
/// real resolver.
#[async_trait]
pub trait TxtLookup: Send + Sync {
    /// Returns the TXT record values at `name`, in whatever order the
    /// resolver returns them.
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError>;
}

/// Errors a [`TxtLookup`] implementation may return.
#[derive(Error, Debug)]
#[error("DNS lookup failed: {0}")]
pub struct DnsLookupError(#[source] pub Box<dyn std::error::Error + Send + Sync>);

/// A [`TxtLookup`] backed by a real resolver (`hickory-resolver`), using
/// the system's configured nameservers.
pub struct HickoryDnsResolver {
    resolver: TokioAsyncResolver,
}

impl HickoryDnsResolver {
    /// Builds a resolver from `/etc/resolv.conf` (or the platform
    /// equivalent), falling back to Cloudflare's public resolver if the
    /// system configuration cannot be read.
    pub fn from_system_conf() -> Result<Self, hickory_resolver::error::ResolveError> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf().or_else(|_| {
            Ok::<_, hickory_resolver::error::ResolveError>(TokioAsyncResolver::tokio(
                ResolverConfig::cloudflare(),
                ResolverOpts::default(),
            ))
        })?;
        Ok(HickoryDnsResolver { resolver })
    }
}

#[async_trait]
impl TxtLookup for HickoryDnsResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, DnsLookupError> {
        let lookup = self
            .resolver
            .txt_lookup(name)
            .await
            .map_err(|e| DnsLookupError(Box::new(e)))?;
        Ok(lookup
            .iter()
            .map(|txt| txt.to_string())
            .collect())
    }
}

/// Errors returned by [`DnsVerifier::verify`].
#[derive(Error, Debug)]
pub enum DnsVerifyError {
    /// The domain failed normalization (spec.md §4.8 step 1).
    #[error("invalid domain: {0}")]
    Domain(#[from] DomainError),
    /// The TXT lookup itself failed.
    #[error(transparent)]
    Lookup(#[from] DnsLookupError),
    /// No TXT record's key verified the signature.
    #[error(
        "no matching key among {checked} checked records ({ignored} ignored beyond the first {MAX_TXT_RECORDS}, {malformed} malformed)"
    )]
    NoMatchingKey {
        /// The number of well-formed hex keys actually checked against the signature.
        checked: usize,
        /// Records beyond the first [`MAX_TXT_RECORDS`] that were not examined.
        ignored: usize,
        /// Records examined but not valid hex-encoded public keys.
        malformed: usize,
    },
}

/// Verifies a submit token's domain binding by resolving TXT records at
/// `_sigsum_v1.<domain>` and checking the signature against each
/// hex-encoded public key found there.
pub struct DnsVerifier<L> {
    lookup: L,
}

impl<L: TxtLookup> DnsVerifier<L> {
    /// Wraps a [`TxtLookup`] implementation.
    pub fn new(lookup: L) -> Self {
        DnsVerifier { lookup }
    }

    /// Verifies that `signature` is a valid submit token over
    /// `log_public_key`, made by the controller of `domain`, per spec.md
    /// §4.8.
    pub async fn verify(
        &self,
        domain: &str,
        log_public_key: &PublicKey,
        signature: &Signature,
    ) -> Result<(), DnsVerifyError> {
        let ascii_domain = normalize_domain(domain)?;
        let name = format!("_sigsum_v1.{ascii_domain}");
        let records = self.lookup.lookup_txt(&name).await?;

        let ignored = records.len().saturating_sub(MAX_TXT_RECORDS);
        let mut malformed = 0;
        let mut checked = 0;
        for record in records.iter().take(MAX_TXT_RECORDS) {
            match PublicKey::from_hex(record.trim()) {
                Ok(key) => {
                    checked += 1;
                    if verify_token(&key, log_public_key, signature).is_ok() {
                        return Ok(());
                    }
                }
                Err(_) => malformed += 1,
            }
        }
        Err(DnsVerifyError::NoMatchingKey {
            checked,
            ignored,
            malformed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sigsum_crypto::signing::Ed25519Signer;
    use sigsum_crypto::Signer;
    use sigsum_protocol::make_token;
    use std::sync::Mutex;

    struct FakeResolver {
        records: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TxtLookup for FakeResolver {
        async fn lookup_txt(&self, _name: &str) -> Result<Vec<String>, DnsLookupError> {
            Ok(self.records.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn test_verify_succeeds_with_matching_record() {
        let domain_key = Ed25519Signer::generate();
        let log_key = Ed25519Signer::generate().public_key();
        let token = make_token(&domain_key, &log_key);

        let resolver = FakeResolver {
            records: Mutex::new(vec![domain_key.public_key().to_hex()]),
        };
        let verifier = DnsVerifier::new(resolver);
        verifier
            .verify("example.test", &log_key, &token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_fails_with_unrelated_record() {
        let domain_key = Ed25519Signer::generate();
        let log_key = Ed25519Signer::generate().public_key();
        let token = make_token(&domain_key, &log_key);

        let unrelated = Ed25519Signer::generate();
        let resolver = FakeResolver {
            records: Mutex::new(vec![unrelated.public_key().to_hex()]),
        };
        let verifier = DnsVerifier::new(resolver);
        let err = verifier.verify("example.test", &log_key, &token).await;
        assert!(matches!(err, Err(DnsVerifyError::NoMatchingKey { .. })));
    }

    #[tokio::test]
    async fn test_verify_ignores_malformed_records() {
        let domain_key = Ed25519Signer::generate();
        let log_key = Ed25519Signer::generate().public_key();
        let token = make_token(&domain_key, &log_key);

        let resolver = FakeResolver {
            records: Mutex::new(vec![
                "not-hex".to_owned(),
                domain_key.public_key().to_hex(),
            ]),
        };
        let verifier = DnsVerifier::new(resolver);
        verifier
            .verify("example.test", &log_key, &token)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_verify_caps_records_checked_at_ten() {
        let log_key = Ed25519Signer::generate().public_key();
        let token = Ed25519Signer::generate().sign(b"irrelevant");

        let records: Vec<String> = (0..15)
            .map(|_| Ed25519Signer::generate().public_key().to_hex())
            .collect();
        let resolver = FakeResolver {
            records: Mutex::new(records),
        };
        let verifier = DnsVerifier::new(resolver);
        let err = verifier
            .verify("example.test", &log_key, &token)
            .await
            .unwrap_err();
        match err {
            DnsVerifyError::NoMatchingKey { checked, ignored, .. } => {
                assert_eq!(checked, MAX_TXT_RECORDS);
                assert_eq!(ignored, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
