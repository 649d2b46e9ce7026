//! Skip-trace result cache entry.
//!
//! Written once on a successful provider call and read-only until it expires.

use super::Contact;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub normalized_key: String,
    pub contacts: Vec<Contact>,
    /// Provider that produced the result
    pub provider: String,
    pub cost_cents_at_original_fetch: i64,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}
