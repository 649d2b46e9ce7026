//! # Provider Call Record
//!
//! Append-only ledger of every completed provider attempt.
//!
//! ## Overview
//!
//! The ledger is the durable source of truth for cost accounting. The
//! in-memory [`crate::budget::BudgetTracker`] is only a cache over it: on
//! start-up (or reset) the tracker re-sums today's rows, so the daily cap holds
//! across restarts and across processes sharing one database.
//!
//! A cache hit produces no row. A no-hit still produces a row carrying the
//! billed cost.
//!
//! ## Database Schema
//!
//! Maps to `provider_call_records`:
//! ```sql
//! CREATE TABLE provider_call_records (
//!   id UUID PRIMARY KEY,
//!   provider TEXT NOT NULL,
//!   request_key TEXT NOT NULL,
//!   cost_cents BIGINT NOT NULL,
//!   succeeded BOOLEAN NOT NULL,
//!   outcome TEXT NOT NULL,
//!   detail TEXT,
//!   created_at TIMESTAMPTZ NOT NULL
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// What the provider attempt produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    /// Provider returned contacts
    Found,
    /// Provider answered but had no data for the subject
    NoHit,
    /// Call failed (timeout, transport error, error status)
    Failed,
}

impl CallOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Found => "found",
            CallOutcome::NoHit => "no_hit",
            CallOutcome::Failed => "failed",
        }
    }
}

impl FromStr for CallOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "found" => Ok(CallOutcome::Found),
            "no_hit" => Ok(CallOutcome::NoHit),
            "failed" => Ok(CallOutcome::Failed),
            other => Err(format!("unknown call outcome '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderCallRecord {
    pub id: Uuid,
    pub provider: String,
    pub request_key: String,
    pub cost_cents: i64,
    pub succeeded: bool,
    pub outcome: CallOutcome,
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ProviderCallRecord {
    pub fn new(
        provider: impl Into<String>,
        request_key: impl Into<String>,
        cost_cents: i64,
        outcome: CallOutcome,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            request_key: request_key.into(),
            cost_cents,
            succeeded: outcome == CallOutcome::Found,
            outcome,
            detail: None,
            created_at,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
