//! # Job Queue
//!
//! Producer and bookkeeping API over a [`JobStore`]: enqueue, lease, record
//! outcomes under the retry policy, and dead-letter inspection and replay.
//!
//! Retry policy: a failed attempt with `attempts < max_attempts` is rescheduled
//! as `failed_retryable` with an exponential backoff `next_run_at`; otherwise
//! the job becomes `failed_terminal` and a [`GuardEvent::JobDeadLettered`] is
//! published. Jobs are never attempted past `max_attempts`.

use crate::clock::SharedClock;
use crate::config::GuardConfig;
use crate::error::{GuardError, GuardResult};
use crate::events::{EventPublisher, GuardEvent};
use crate::logging::log_job_operation;
use crate::models::{Job, JobStatus, JobType};
use crate::resilience::BackoffPolicy;
use crate::store::{JobCounts, JobStore};
use chrono::Duration;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Queue policy resolved from [`GuardConfig`]
#[derive(Debug, Clone)]
pub struct JobQueueConfig {
    pub max_attempts: HashMap<JobType, i32>,
    pub backoff: BackoffPolicy,
    pub lease_timeout: Duration,
    pub completed_retention: Duration,
}

impl JobQueueConfig {
    pub fn max_attempts_for(&self, job_type: JobType) -> i32 {
        self.max_attempts
            .get(&job_type)
            .copied()
            .unwrap_or(crate::constants::defaults::JOB_MAX_ATTEMPTS)
    }
}

impl From<&GuardConfig> for JobQueueConfig {
    fn from(config: &GuardConfig) -> Self {
        let max_attempts = JobType::ALL
            .into_iter()
            .map(|job_type| (job_type, config.max_attempts_for(job_type)))
            .collect();

        Self {
            max_attempts,
            backoff: BackoffPolicy::for_jobs(&config.jobs),
            lease_timeout: Duration::milliseconds(config.jobs.lease_timeout_ms as i64),
            completed_retention: Duration::hours(config.jobs.completed_retention_hours as i64),
        }
    }
}

impl Default for JobQueueConfig {
    fn default() -> Self {
        Self::from(&GuardConfig::default())
    }
}

#[derive(Debug)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: JobQueueConfig,
    clock: SharedClock,
    events: Option<EventPublisher>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: JobQueueConfig, clock: SharedClock) -> Self {
        Self {
            store,
            config,
            clock,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &JobQueueConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Enqueue a job that is eligible immediately
    pub async fn enqueue(&self, job_type: JobType, payload: Value) -> GuardResult<Uuid> {
        let now = self.clock.now();
        let job = Job::new(job_type, payload, self.config.max_attempts_for(job_type), now);
        self.store.insert(&job).await?;

        log_job_operation("enqueue", &job.id, job_type.as_str(), 0, job.status.as_str(), None);
        Ok(job.id)
    }

    /// Lease the next eligible job for `worker_id`.
    ///
    /// Jobs whose lease expired during their final attempt are dead-lettered
    /// first so they are never attempted again.
    pub async fn claim(&self, worker_id: &str) -> GuardResult<Option<Job>> {
        let now = self.clock.now();

        for job in self.store.fail_abandoned(now).await? {
            error!(
                job_id = %job.id,
                job_type = %job.job_type,
                attempts = job.attempts,
                "Job abandoned on final attempt; moved to failed_terminal"
            );
            self.publish_dead_letter(&job);
        }

        let claimed = self
            .store
            .claim_next(worker_id, now, self.config.lease_timeout)
            .await?;

        if let Some(job) = &claimed {
            log_job_operation(
                "claim",
                &job.id,
                job.job_type.as_str(),
                job.attempts,
                job.status.as_str(),
                Some(worker_id),
            );
        }
        Ok(claimed)
    }

    pub async fn complete(&self, job: &Job, worker_id: &str) -> GuardResult<Job> {
        let now = self.clock.now();
        let completed = self.store.mark_completed(job.id, worker_id, now).await?;

        info!(
            job_id = %completed.id,
            job_type = %completed.job_type,
            attempts = completed.attempts,
            "Job completed"
        );
        if let Some(events) = &self.events {
            events.publish(GuardEvent::JobCompleted {
                job_id: completed.id,
                job_type: completed.job_type,
                attempts: completed.attempts,
            });
        }
        Ok(completed)
    }

    /// Record a failed attempt and apply the retry policy
    pub async fn fail(&self, job: &Job, worker_id: &str, error: &str) -> GuardResult<Job> {
        let now = self.clock.now();

        if job.has_attempts_remaining() {
            let delay = self.config.backoff.delay_for_attempt(job.attempts.max(1) as u32);
            let next_run_at = now
                + Duration::from_std(delay)
                    .map_err(|e| GuardError::Internal(format!("backoff out of range: {e}")))?;
            let updated = self
                .store
                .mark_retryable(job.id, worker_id, next_run_at, error, now)
                .await?;

            warn!(
                job_id = %updated.id,
                job_type = %updated.job_type,
                attempts = updated.attempts,
                max_attempts = updated.max_attempts,
                next_run_at = %next_run_at,
                error = %error,
                "Job attempt failed; retry scheduled"
            );
            if let Some(events) = &self.events {
                events.publish(GuardEvent::JobRetryScheduled {
                    job_id: updated.id,
                    job_type: updated.job_type,
                    attempts: updated.attempts,
                    next_run_at,
                    error: error.to_string(),
                });
            }
            Ok(updated)
        } else {
            self.fail_terminal(job, worker_id, error).await
        }
    }

    /// Dead-letter the job regardless of remaining attempts
    pub async fn fail_terminal(&self, job: &Job, worker_id: &str, error: &str) -> GuardResult<Job> {
        let now = self.clock.now();
        let updated = self.store.mark_terminal(job.id, worker_id, error, now).await?;

        let exhausted = GuardError::QueueExhaustedRetries {
            job_id: updated.id,
            attempts: updated.attempts,
        };
        error!(
            job_id = %updated.id,
            job_type = %updated.job_type,
            attempts = updated.attempts,
            code = exhausted.code(),
            error = %error,
            "Job moved to failed_terminal"
        );
        self.publish_dead_letter(&updated);
        Ok(updated)
    }

    pub async fn get(&self, id: Uuid) -> GuardResult<Option<Job>> {
        self.store.get(id).await
    }

    /// Dead-lettered jobs awaiting manual replay
    pub async fn failed_terminal(&self, limit: usize) -> GuardResult<Vec<Job>> {
        self.store.list_by_status(JobStatus::FailedTerminal, limit).await
    }

    /// Return a dead-lettered job to the queue with a fresh attempt budget
    pub async fn replay(&self, id: Uuid) -> GuardResult<Job> {
        let job = self.store.replay(id, self.clock.now()).await?;
        log_job_operation("replay", &job.id, job.job_type.as_str(), job.attempts, job.status.as_str(), None);
        Ok(job)
    }

    /// Delete completed jobs older than the retention window
    pub async fn purge_completed(&self) -> GuardResult<u64> {
        let cutoff = self.clock.now() - self.config.completed_retention;
        let purged = self.store.purge_completed(cutoff).await?;
        if purged > 0 {
            info!(purged = purged, cutoff = %cutoff, "Purged completed jobs");
        }
        Ok(purged)
    }

    pub async fn counts(&self) -> GuardResult<JobCounts> {
        self.store.counts().await
    }

    fn publish_dead_letter(&self, job: &Job) {
        if let Some(events) = &self.events {
            events.publish(GuardEvent::JobDeadLettered {
                job_id: job.id,
                job_type: job.job_type,
                attempts: job.attempts,
                error: job.last_error.clone().unwrap_or_default(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::store::InMemoryJobStore;
    use serde_json::json;

    fn queue(clock: Arc<ManualClock>) -> JobQueue {
        let mut config = JobQueueConfig::default();
        config.max_attempts.insert(JobType::Scrape, 3);
        config.backoff = BackoffPolicy::new(
            std::time::Duration::from_secs(2),
            std::time::Duration::from_secs(60),
            0.0,
        );
        JobQueue::new(Arc::new(InMemoryJobStore::new()), config, clock)
    }

    #[tokio::test]
    async fn test_enqueue_uses_per_type_max_attempts() {
        let queue = queue(Arc::new(ManualClock::starting_now()));
        let id = queue.enqueue(JobType::Scrape, json!({ "county": "montgomery" })).await.unwrap();
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.max_attempts, 3);
        assert_eq!(job.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_failure_schedules_backoff_then_dead_letters() {
        let clock = Arc::new(ManualClock::starting_now());
        let events = EventPublisher::new();
        let mut rx = events.subscribe();
        let queue = queue(clock.clone()).with_events(events);
        queue.enqueue(JobType::Scrape, json!({})).await.unwrap();

        let job = queue.claim("w1").await.unwrap().unwrap();
        let retry = queue.fail(&job, "w1", "boom").await.unwrap();
        assert_eq!(retry.status, JobStatus::FailedRetryable);
        assert_eq!(retry.next_run_at, clock.now() + Duration::seconds(2));
        assert!(queue.claim("w1").await.unwrap().is_none(), "not due yet");

        clock.advance(Duration::seconds(2));
        let job = queue.claim("w1").await.unwrap().unwrap();
        let retry = queue.fail(&job, "w1", "boom").await.unwrap();
        assert_eq!(retry.next_run_at, clock.now() + Duration::seconds(4));

        clock.advance(Duration::seconds(4));
        let job = queue.claim("w1").await.unwrap().unwrap();
        assert_eq!(job.attempts, 3);
        let dead = queue.fail(&job, "w1", "boom").await.unwrap();
        assert_eq!(dead.status, JobStatus::FailedTerminal);

        clock.advance(Duration::hours(1));
        assert!(queue.claim("w1").await.unwrap().is_none());
        assert_eq!(queue.failed_terminal(10).await.unwrap().len(), 1);

        let names: Vec<&str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(
            names,
            vec!["job.retry_scheduled", "job.retry_scheduled", "job.dead_lettered"]
        );
    }

    #[tokio::test]
    async fn test_replay_returns_job_to_queue() {
        let clock = Arc::new(ManualClock::starting_now());
        let queue = queue(clock.clone());
        let id = queue.enqueue(JobType::Scrape, json!({})).await.unwrap();
        let job = queue.claim("w1").await.unwrap().unwrap();
        queue.fail_terminal(&job, "w1", "bad payload").await.unwrap();

        let replayed = queue.replay(id).await.unwrap();
        assert_eq!(replayed.status, JobStatus::Queued);
        assert_eq!(replayed.attempts, 0);
        assert_eq!(queue.claim("w2").await.unwrap().map(|j| j.id), Some(id));
    }

    #[tokio::test]
    async fn test_purge_respects_retention() {
        let clock = Arc::new(ManualClock::starting_now());
        let queue = queue(clock.clone());
        queue.enqueue(JobType::Match, json!({})).await.unwrap();
        let job = queue.claim("w1").await.unwrap().unwrap();
        queue.complete(&job, "w1").await.unwrap();

        assert_eq!(queue.purge_completed().await.unwrap(), 0);
        clock.advance(queue.config().completed_retention + Duration::seconds(1));
        assert_eq!(queue.purge_completed().await.unwrap(), 1);
        assert_eq!(queue.counts().await.unwrap().total(), 0);
    }
}
