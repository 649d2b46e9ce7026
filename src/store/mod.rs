//! # Durable Stores
//!
//! Persistence seams for the governance layer. Each store is an async trait
//! with two providers:
//!
//! - [`in_memory`] - thread-safe in-process implementation for tests and
//!   single-process development
//! - [`postgres`] - PostgreSQL via `sqlx` for production
//!
//! Components receive stores as `Arc<dyn Trait>` through their constructors and
//! never know which provider backs them.

pub mod in_memory;
pub mod postgres;

use crate::error::GuardResult;
use crate::models::{CacheEntry, Job, JobStatus, ProviderCallRecord, WebhookDeliveryAttempt};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

pub use in_memory::{InMemoryCallLedger, InMemoryDeliveryLog, InMemoryJobStore, InMemoryResultCache};
pub use postgres::{PgCallLedger, PgDeliveryLog, PgJobStore, PgResultCache};

/// Append-only ledger of provider attempts
#[async_trait]
pub trait CallLedger: Send + Sync + Debug {
    async fn append(&self, record: &ProviderCallRecord) -> GuardResult<()>;

    /// Total cost of records with `start <= created_at < end`
    async fn sum_cost_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> GuardResult<i64>;

    /// Newest first, optionally restricted to one provider
    async fn list_recent(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> GuardResult<Vec<ProviderCallRecord>>;
}

/// Skip-trace result cache
#[async_trait]
pub trait ResultCache: Send + Sync + Debug {
    /// Expired entries are reported as misses
    async fn get(&self, key: &str, now: DateTime<Utc>) -> GuardResult<Option<CacheEntry>>;

    /// Insert or replace the entry for its key
    async fn put(&self, entry: &CacheEntry) -> GuardResult<()>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> GuardResult<u64>;
}

/// Per-status job counts for health reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed_retryable: u64,
    pub failed_terminal: u64,
}

impl JobCounts {
    pub fn add(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Queued => self.queued += count,
            JobStatus::Active => self.active += count,
            JobStatus::Completed => self.completed += count,
            JobStatus::FailedRetryable => self.failed_retryable += count,
            JobStatus::FailedTerminal => self.failed_terminal += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.queued + self.active + self.completed + self.failed_retryable + self.failed_terminal
    }
}

/// Durable job queue storage.
///
/// Outcome mutations are lease-guarded: they fail with
/// [`crate::error::GuardError::LeaseLost`] unless `worker_id` holds the job's
/// active lease, and with [`crate::error::GuardError::NotFound`] for unknown ids.
#[async_trait]
pub trait JobStore: Send + Sync + Debug {
    async fn insert(&self, job: &Job) -> GuardResult<()>;

    /// Atomically lease the earliest eligible job and increment its attempts.
    ///
    /// Eligible means queued/failed_retryable with `next_run_at <= now`, or
    /// active with an expired lease. At most one concurrent claimer wins a job.
    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> GuardResult<Option<Job>>;

    /// Move active jobs whose lease expired during their final attempt to
    /// failed_terminal and return them
    async fn fail_abandoned(&self, now: DateTime<Utc>) -> GuardResult<Vec<Job>>;

    async fn mark_completed(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> GuardResult<Job>;

    async fn mark_retryable(
        &self,
        id: Uuid,
        worker_id: &str,
        next_run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Job>;

    async fn mark_terminal(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Job>;

    async fn get(&self, id: Uuid) -> GuardResult<Option<Job>>;

    /// Oldest update first
    async fn list_by_status(&self, status: JobStatus, limit: usize) -> GuardResult<Vec<Job>>;

    /// Return a failed_terminal job to the queue with its attempts reset
    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> GuardResult<Job>;

    /// Delete completed jobs finished before `before`
    async fn purge_completed(&self, before: DateTime<Utc>) -> GuardResult<u64>;

    async fn counts(&self) -> GuardResult<JobCounts>;
}

/// Audit trail of outbound webhook attempts
#[async_trait]
pub trait DeliveryLog: Send + Sync + Debug {
    async fn record(&self, attempt: &WebhookDeliveryAttempt) -> GuardResult<()>;

    /// Ordered by attempt number
    async fn attempts_for_job(&self, job_id: Uuid) -> GuardResult<Vec<WebhookDeliveryAttempt>>;
}

/// The full set of stores, shared by every component
#[derive(Debug, Clone)]
pub struct Stores {
    pub ledger: Arc<dyn CallLedger>,
    pub cache: Arc<dyn ResultCache>,
    pub jobs: Arc<dyn JobStore>,
    pub deliveries: Arc<dyn DeliveryLog>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryCallLedger::new()),
            cache: Arc::new(InMemoryResultCache::new()),
            jobs: Arc::new(InMemoryJobStore::new()),
            deliveries: Arc::new(InMemoryDeliveryLog::new()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            ledger: Arc::new(PgCallLedger::new(pool.clone())),
            cache: Arc::new(PgResultCache::new(pool.clone())),
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            deliveries: Arc::new(PgDeliveryLog::new(pool)),
        }
    }
}
