//! Structured result of one enrichment request.
//!
//! "No contact found" and "temporarily unavailable" are distinct reasons, so a
//! caller can decide whether asking again later is worthwhile.

use crate::models::{CacheEntry, Contact};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Request rejected before any other check
    #[serde(rename = "validation_error")]
    Validation,
    /// Daily cap reached; no network call made for this decision
    BudgetExhausted,
    /// Every provider's circuit was open
    CircuitOpen,
    /// At least one provider answered and found nothing
    NoHit,
    /// Providers failed to answer
    ProviderError,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::Validation => "validation_error",
            FailureReason::BudgetExhausted => "budget_exhausted",
            FailureReason::CircuitOpen => "circuit_open",
            FailureReason::NoHit => "no_hit",
            FailureReason::ProviderError => "provider_error",
        }
    }

    /// Whether repeating the request later could succeed
    pub fn is_temporary(&self) -> bool {
        matches!(
            self,
            FailureReason::BudgetExhausted | FailureReason::CircuitOpen | FailureReason::ProviderError
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentOutcome {
    pub success: bool,
    pub contacts: Vec<Contact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Cost incurred by this request, including billed failed attempts
    pub cost_cents: i64,
    /// Providers actually called, in order; skipped providers are absent
    pub providers_tried: Vec<String>,
    /// Provider whose answer was returned (original provider on a cache hit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_by: Option<String>,
    pub cached: bool,
    /// Answer shared from a concurrent identical request
    pub coalesced: bool,
    pub request_key: String,
}

impl EnrichmentOutcome {
    pub fn found(
        request_key: impl Into<String>,
        contacts: Vec<Contact>,
        cost_cents: i64,
        providers_tried: Vec<String>,
        served_by: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            contacts,
            reason: None,
            detail: None,
            cost_cents,
            providers_tried,
            served_by: Some(served_by.into()),
            cached: false,
            coalesced: false,
            request_key: request_key.into(),
        }
    }

    pub fn cache_hit(entry: &CacheEntry) -> Self {
        Self {
            success: true,
            contacts: entry.contacts.clone(),
            reason: None,
            detail: None,
            cost_cents: 0,
            providers_tried: Vec::new(),
            served_by: Some(entry.provider.clone()),
            cached: true,
            coalesced: false,
            request_key: entry.normalized_key.clone(),
        }
    }

    pub fn failure(
        request_key: impl Into<String>,
        reason: FailureReason,
        cost_cents: i64,
        providers_tried: Vec<String>,
        detail: Option<String>,
    ) -> Self {
        Self {
            success: false,
            contacts: Vec::new(),
            reason: Some(reason),
            detail,
            cost_cents,
            providers_tried,
            served_by: None,
            cached: false,
            coalesced: false,
            request_key: request_key.into(),
        }
    }

    /// The copy handed to callers that waited on another caller's lookup
    pub fn into_follower(mut self) -> Self {
        self.cost_cents = 0;
        self.coalesced = true;
        self
    }
}
