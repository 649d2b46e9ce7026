//! Cache-key derivation for enrichment requests.
//!
//! Address normalization proper (suffix tables, unit parsing, geocoding) is an
//! external collaborator; the orchestrator only needs a stable fingerprint so
//! that equivalent requests share one cache entry and one in-flight lookup.

use crate::providers::EnrichmentRequest;
use sha2::{Digest, Sha256};
use std::fmt::Debug;

/// Produces the canonical fingerprint used as the cache key
pub trait AddressNormalizer: Send + Sync + Debug {
    fn fingerprint(&self, request: &EnrichmentRequest) -> String;
}

/// Case, whitespace and punctuation-insensitive SHA-256 fingerprint
#[derive(Debug, Default, Clone, Copy)]
pub struct CanonicalFingerprint;

impl CanonicalFingerprint {
    fn canonical_text(value: &str) -> String {
        value
            .chars()
            .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { ' ' })
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// ZIP+4 and ZIP5 for the same address share a key
    fn canonical_zip(zip: &str) -> String {
        zip.chars().filter(|c| c.is_ascii_digit()).take(5).collect()
    }
}

impl AddressNormalizer for CanonicalFingerprint {
    fn fingerprint(&self, request: &EnrichmentRequest) -> String {
        let canonical = [
            Self::canonical_text(&request.address),
            Self::canonical_text(&request.city),
            Self::canonical_text(&request.state),
            Self::canonical_zip(&request.zip),
            request
                .name
                .as_deref()
                .map(Self::canonical_text)
                .unwrap_or_default(),
        ]
        .join("|");

        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equivalent_requests_share_a_fingerprint() {
        let normalizer = CanonicalFingerprint;
        let a = EnrichmentRequest::new("12 Oak St.", "Dayton", "OH", "45402");
        let b = EnrichmentRequest::new("  12  oak st ", "DAYTON", "oh", "45402-1234");
        assert_eq!(normalizer.fingerprint(&a), normalizer.fingerprint(&b));
        assert_eq!(normalizer.fingerprint(&a).len(), 64);
    }

    #[test]
    fn test_owner_name_distinguishes_requests() {
        let normalizer = CanonicalFingerprint;
        let base = EnrichmentRequest::new("12 Oak St", "Dayton", "OH", "45402");
        let named = base.clone().with_name("Pat Doe");
        assert_ne!(normalizer.fingerprint(&base), normalizer.fingerprint(&named));
    }
}
