//! # Provider Adapters
//!
//! Boundary between third-party skip-trace APIs and the orchestrator. Every
//! adapter turns its provider's response into the tagged [`ProviderResponse`]
//! (found or no hit, both carrying the billed cost) or a [`ProviderCallError`]
//! classified as transient or permanent. Nothing provider-shaped crosses into
//! [`crate::orchestration`].

pub mod http;

use crate::error::{GuardError, GuardResult};
use crate::models::Contact;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub use http::{HttpProviderConfig, HttpSkipTraceProvider};

/// Enrichment input for one property owner
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnrichmentRequest {
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl EnrichmentRequest {
    pub fn new(
        address: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            city: city.into(),
            state: state.into(),
            zip: zip.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Reject requests no provider could answer
    pub fn validate(&self) -> GuardResult<()> {
        if self.address.trim().is_empty() {
            return Err(GuardError::Validation("address is required".to_string()));
        }
        if self.city.trim().is_empty() {
            return Err(GuardError::Validation("city is required".to_string()));
        }

        let state = self.state.trim();
        if state.len() != 2 || !state.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(GuardError::Validation(format!(
                "state must be a two-letter code, got '{}'",
                self.state
            )));
        }

        let digits: String = self.zip.trim().chars().filter(|c| *c != '-').collect();
        let zip_ok = (digits.len() == 5 || digits.len() == 9) && digits.chars().all(|c| c.is_ascii_digit());
        if !zip_ok {
            return Err(GuardError::Validation(format!(
                "zip must be 5 or 9 digits, got '{}'",
                self.zip
            )));
        }

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(GuardError::Validation("name, when given, must not be blank".to_string()));
            }
        }

        Ok(())
    }
}

/// Normalized provider answer. Cost is always reported, including on a no hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ProviderResponse {
    Found {
        contacts: Vec<Contact>,
        cost_cents: i64,
    },
    NoHit {
        cost_cents: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl ProviderResponse {
    pub fn cost_cents(&self) -> i64 {
        match self {
            ProviderResponse::Found { cost_cents, .. } | ProviderResponse::NoHit { cost_cents, .. } => {
                *cost_cents
            }
        }
    }
}

/// Failure to obtain an answer from a provider
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProviderCallError {
    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("HTTP {status}: {message}")]
    Http {
        status: u16,
        message: String,
        /// Cost the provider reported for the failed attempt, if any
        billed_cents: Option<i64>,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderCallError {
    /// Timeouts, transport failures, 429 and 5xx are retried; everything else is permanent
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderCallError::Timeout { .. } | ProviderCallError::Network(_) => true,
            ProviderCallError::Http { status, .. } => *status == 429 || *status >= 500,
            ProviderCallError::InvalidResponse(_) => false,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderCallError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn billed_cents(&self) -> Option<i64> {
        match self {
            ProviderCallError::Http { billed_cents, .. } => *billed_cents,
            _ => None,
        }
    }

    /// Lift into the crate taxonomy for the given provider
    pub fn into_guard_error(self, provider: &str) -> GuardError {
        if self.is_transient() {
            GuardError::TransientProvider {
                provider: provider.to_string(),
                reason: self.to_string(),
            }
        } else {
            GuardError::PermanentProvider {
                provider: provider.to_string(),
                status: self.status(),
                reason: self.to_string(),
            }
        }
    }
}

/// A paid contact-enrichment provider
#[async_trait]
pub trait ProviderAdapter: Send + Sync + Debug {
    /// Stable name used for breakers, ledger rows and logs
    fn name(&self) -> &str;

    /// Whether failed attempts are billed. No-hit responses always carry their cost.
    fn bills_per_attempt(&self) -> bool {
        true
    }

    /// Charge for a failed attempt when the error does not report one
    fn attempt_cost_cents(&self) -> i64 {
        0
    }

    async fn lookup(&self, request: &EnrichmentRequest) -> Result<ProviderResponse, ProviderCallError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> EnrichmentRequest {
        EnrichmentRequest::new("12 Oak St", "Dayton", "OH", "45402")
    }

    #[test]
    fn test_validation_accepts_well_formed_requests() {
        assert!(valid().validate().is_ok());
        assert!(EnrichmentRequest { zip: "45402-1234".into(), ..valid() }.validate().is_ok());
        assert!(valid().with_name("Pat Doe").validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_malformed_fields() {
        let cases = [
            EnrichmentRequest { address: "  ".into(), ..valid() },
            EnrichmentRequest { city: String::new(), ..valid() },
            EnrichmentRequest { state: "Ohio".into(), ..valid() },
            EnrichmentRequest { state: "O1".into(), ..valid() },
            EnrichmentRequest { zip: "4540".into(), ..valid() },
            EnrichmentRequest { zip: "45402-12".into(), ..valid() },
            valid().with_name(" "),
        ];
        for request in cases {
            let err = request.validate().unwrap_err();
            assert_eq!(err.code(), "validation_error", "{request:?}");
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(ProviderCallError::Timeout { after_ms: 10_000 }.is_transient());
        assert!(ProviderCallError::Network("reset".into()).is_transient());
        for status in [429, 500, 502, 503] {
            let err = ProviderCallError::Http { status, message: String::new(), billed_cents: None };
            assert!(err.is_transient(), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            let err = ProviderCallError::Http { status, message: String::new(), billed_cents: None };
            assert!(!err.is_transient(), "{status}");
            assert_eq!(err.into_guard_error("p").code(), "permanent_provider_error");
        }
    }

    #[test]
    fn test_response_serialization_is_tagged() {
        let response = ProviderResponse::NoHit { cost_cents: 10, reason: None };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["result"], "no_hit");
        assert_eq!(json["cost_cents"], 10);
    }
}
