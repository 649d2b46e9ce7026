//! # System Constants
//!
//! Names and defaults that define the operational boundaries of the
//! enrichment governance layer. Event names match the `GuardEvent` variants
//! published on the [`crate::events::EventPublisher`].

/// Observability event names
pub mod events {
    pub const CIRCUIT_STATE_CHANGED: &str = "circuit.state_changed";
    pub const BUDGET_CAP_REACHED: &str = "budget.cap_reached";
    pub const JOB_COMPLETED: &str = "job.completed";
    pub const JOB_RETRY_SCHEDULED: &str = "job.retry_scheduled";
    pub const JOB_DEAD_LETTERED: &str = "job.dead_lettered";
    pub const WEBHOOK_DELIVERED: &str = "webhook.delivered";
    pub const ENRICHMENT_COMPLETED: &str = "enrichment.completed";
}

/// Wire-level names shared by webhook senders and receivers
pub mod webhook {
    pub const SIGNATURE_HEADER: &str = "X-Enrichment-Signature";
    pub const SIGNATURE_PREFIX: &str = "sha256=";
    pub const EVENT_HEADER: &str = "X-Enrichment-Event";
    pub const DELIVERY_HEADER: &str = "X-Enrichment-Delivery";
    pub const ATTEMPT_HEADER: &str = "X-Enrichment-Attempt";
}

/// Default operating limits
pub mod defaults {
    pub const RATE_LIMIT_RPS: u32 = 5;
    pub const REFILL_TICK_MS: u64 = 1_000;

    pub const BREAKER_ERROR_RATE_THRESHOLD: f64 = 0.3;
    pub const BREAKER_MIN_SAMPLES: u32 = 30;
    pub const BREAKER_HALF_OPEN_MS: u64 = 60_000;
    pub const BREAKER_WINDOW_SIZE: u32 = 100;

    pub const DAILY_BUDGET_CAP_CENTS: i64 = 0;

    pub const CACHE_TTL_DAYS: u32 = 30;
    pub const PROVIDER_TIMEOUT_MS: u64 = 10_000;
    pub const PROVIDER_MAX_RETRIES: u32 = 2;
    pub const PROVIDER_RETRY_BASE_MS: u64 = 500;
    pub const PROVIDER_RETRY_MAX_MS: u64 = 5_000;

    pub const JOB_MAX_ATTEMPTS: i32 = 5;
    pub const JOB_BACKOFF_BASE_MS: u64 = 2_000;
    pub const JOB_BACKOFF_MAX_MS: u64 = 300_000;
    pub const JOB_JITTER_MAX_PERCENTAGE: f64 = 0.2;
    pub const JOB_POLL_INTERVAL_MS: u64 = 500;
    pub const JOB_LEASE_TIMEOUT_MS: u64 = 300_000;
    pub const JOB_COMPLETED_RETENTION_HOURS: u64 = 72;
    pub const WORKER_COUNT: usize = 2;

    pub const WEBHOOK_MAX_ATTEMPTS: i32 = 5;
    pub const WEBHOOK_TIMEOUT_MS: u64 = 10_000;
}
