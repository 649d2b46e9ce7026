//! Audit row for one outbound webhook POST.
//!
//! Every attempt is recorded, success or failure; the rows for a job form the
//! replay trail an operator inspects after a terminal failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookDeliveryAttempt {
    pub id: Uuid,
    pub job_id: Uuid,
    pub url: String,
    pub attempt_number: i32,
    /// Present when the endpoint answered
    pub http_status: Option<u16>,
    /// Present when no HTTP response was received
    pub network_error: Option<String>,
    pub duration_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl WebhookDeliveryAttempt {
    pub fn succeeded(&self) -> bool {
        self.http_status.is_some_and(|status| (200..300).contains(&status))
    }
}
