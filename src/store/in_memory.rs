//! # In-Memory Stores
//!
//! Thread-safe in-process implementations of every store trait, for tests and
//! single-process development.
//!
//! ## Features
//!
//! - **Lease semantics**: claims hold a lease that expires and can be reclaimed,
//!   matching the PostgreSQL provider
//! - **Thread-safe**: uses `tokio::sync::RwLock`; a claim holds the write lock so
//!   two workers never lease the same job

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::models::{CacheEntry, Job, JobStatus, ProviderCallRecord, WebhookDeliveryAttempt};
use crate::store::{CallLedger, DeliveryLog, JobCounts, JobStore, ResultCache};

#[derive(Debug, Default)]
pub struct InMemoryCallLedger {
    records: RwLock<Vec<ProviderCallRecord>>,
}

impl InMemoryCallLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows appended so far
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl CallLedger for InMemoryCallLedger {
    async fn append(&self, record: &ProviderCallRecord) -> GuardResult<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }

    async fn sum_cost_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> GuardResult<i64> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| r.created_at >= start && r.created_at < end)
            .map(|r| r.cost_cents)
            .sum())
    }

    async fn list_recent(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> GuardResult<Vec<ProviderCallRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<ProviderCallRecord> = records
            .iter()
            .filter(|r| provider.map_or(true, |p| r.provider == p))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit);
        Ok(matching)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> GuardResult<Option<CacheEntry>> {
        let entries = self.entries.read().await;
        Ok(entries.get(key).filter(|e| e.is_fresh(now)).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> GuardResult<()> {
        self.entries
            .write()
            .await
            .insert(entry.normalized_key.clone(), entry.clone());
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> GuardResult<u64> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.is_fresh(now));
        Ok((before - entries.len()) as u64)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The job must exist and be leased to `worker_id`
    fn held_job<'a>(
        jobs: &'a mut HashMap<Uuid, Job>,
        id: Uuid,
        worker_id: &str,
    ) -> GuardResult<&'a mut Job> {
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| GuardError::NotFound(format!("job {id}")))?;
        if !job.is_held_by(worker_id) {
            return Err(GuardError::LeaseLost(format!(
                "job {id} is not leased to worker {worker_id}"
            )));
        }
        Ok(job)
    }
}

/// When a claimable job became eligible; used to pick the earliest
fn eligible_since(job: &Job) -> DateTime<Utc> {
    match job.status {
        JobStatus::Active => job.lease_expires_at.unwrap_or(job.next_run_at),
        _ => job.next_run_at,
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: &Job) -> GuardResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(GuardError::Database(format!("duplicate job id {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> GuardResult<Option<Job>> {
        let mut jobs = self.jobs.write().await;

        let next_id = jobs
            .values()
            .filter(|job| job.is_claimable(now))
            .min_by(|a, b| {
                eligible_since(a)
                    .cmp(&eligible_since(b))
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|job| job.id);

        let Some(id) = next_id else {
            return Ok(None);
        };
        let Some(job) = jobs.get_mut(&id) else {
            return Ok(None);
        };

        if job.status == JobStatus::Active {
            debug!(
                job_id = %id,
                previous_owner = ?job.lease_owner,
                "Reclaiming job with expired lease"
            );
        }

        job.status = JobStatus::Active;
        job.attempts += 1;
        job.lease_owner = Some(worker_id.to_string());
        job.lease_expires_at = Some(now + lease);
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn fail_abandoned(&self, now: DateTime<Utc>) -> GuardResult<Vec<Job>> {
        let mut jobs = self.jobs.write().await;
        let mut abandoned = Vec::new();
        for job in jobs.values_mut() {
            let expired = job.lease_expires_at.is_some_and(|expiry| expiry <= now);
            if job.status == JobStatus::Active && expired && !job.has_attempts_remaining() {
                job.status = JobStatus::FailedTerminal;
                job.last_error = Some(format!(
                    "lease held by {} expired during final attempt",
                    job.lease_owner.as_deref().unwrap_or("unknown worker")
                ));
                job.lease_owner = None;
                job.lease_expires_at = None;
                job.updated_at = now;
                job.finished_at = Some(now);
                abandoned.push(job.clone());
            }
        }
        Ok(abandoned)
    }

    async fn mark_completed(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> GuardResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = Self::held_job(&mut jobs, id, worker_id)?;
        job.status = JobStatus::Completed;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.last_error = None;
        job.updated_at = now;
        job.finished_at = Some(now);
        Ok(job.clone())
    }

    async fn mark_retryable(
        &self,
        id: Uuid,
        worker_id: &str,
        next_run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = Self::held_job(&mut jobs, id, worker_id)?;
        job.status = JobStatus::FailedRetryable;
        job.next_run_at = next_run_at;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn mark_terminal(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = Self::held_job(&mut jobs, id, worker_id)?;
        job.status = JobStatus::FailedTerminal;
        job.lease_owner = None;
        job.lease_expires_at = None;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        job.finished_at = Some(now);
        Ok(job.clone())
    }

    async fn get(&self, id: Uuid) -> GuardResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> GuardResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        let mut matching: Vec<Job> = jobs.values().filter(|j| j.status == status).cloned().collect();
        matching.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> GuardResult<Job> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| GuardError::NotFound(format!("job {id}")))?;
        if job.status != JobStatus::FailedTerminal {
            return Err(GuardError::Validation(format!(
                "job {id} is {} and cannot be replayed",
                job.status
            )));
        }
        job.status = JobStatus::Queued;
        job.attempts = 0;
        job.next_run_at = now;
        job.finished_at = None;
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn purge_completed(&self, before: DateTime<Utc>) -> GuardResult<u64> {
        let mut jobs = self.jobs.write().await;
        let count = jobs.len();
        jobs.retain(|_, job| {
            !(job.status == JobStatus::Completed && job.finished_at.is_some_and(|at| at < before))
        });
        Ok((count - jobs.len()) as u64)
    }

    async fn counts(&self) -> GuardResult<JobCounts> {
        let jobs = self.jobs.read().await;
        let mut counts = JobCounts::default();
        for job in jobs.values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDeliveryLog {
    attempts: RwLock<Vec<WebhookDeliveryAttempt>>,
}

impl InMemoryDeliveryLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeliveryLog for InMemoryDeliveryLog {
    async fn record(&self, attempt: &WebhookDeliveryAttempt) -> GuardResult<()> {
        self.attempts.write().await.push(attempt.clone());
        Ok(())
    }

    async fn attempts_for_job(&self, job_id: Uuid) -> GuardResult<Vec<WebhookDeliveryAttempt>> {
        let attempts = self.attempts.read().await;
        let mut matching: Vec<WebhookDeliveryAttempt> =
            attempts.iter().filter(|a| a.job_id == job_id).cloned().collect();
        matching.sort_by_key(|a| a.attempt_number);
        Ok(matching)
    }
}
