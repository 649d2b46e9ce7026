//! # Job Model
//!
//! Durable unit of background work (scrape, enrich, match, webhook delivery).
//!
//! ## Lifecycle
//!
//! ```text
//! queued ──claim──▶ active ──ok──▶ completed
//!   ▲                 │
//!   │                 ├─err, attempts < max──▶ failed_retryable ──(next_run_at)──┐
//!   │                 │                                                         │
//!   │                 └─err, attempts = max──▶ failed_terminal (dead letter)    │
//!   └──────────────────────────── replay ◀──────────┘       claim ◀─────────────┘
//! ```
//!
//! A job is only mutated by the worker holding its lease (`lease_owner`).
//! `attempts` is incremented when the job is claimed, so it always equals the
//! number of handler executions started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobType {
    #[serde(rename = "scrape")]
    Scrape,
    #[serde(rename = "enrich")]
    Enrich,
    #[serde(rename = "match")]
    Match,
    #[serde(rename = "webhook-deliver")]
    WebhookDeliver,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::Scrape,
        JobType::Enrich,
        JobType::Match,
        JobType::WebhookDeliver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scrape => "scrape",
            JobType::Enrich => "enrich",
            JobType::Match => "match",
            JobType::WebhookDeliver => "webhook-deliver",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown job type '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Completed,
    FailedRetryable,
    FailedTerminal,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::FailedRetryable => "failed_retryable",
            JobStatus::FailedTerminal => "failed_terminal",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::FailedTerminal)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed_retryable" => Ok(JobStatus::FailedRetryable),
            "failed_terminal" => Ok(JobStatus::FailedTerminal),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub job_type: JobType,
    pub payload: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
    pub status: JobStatus,
    pub next_run_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        job_type: JobType,
        payload: serde_json::Value,
        max_attempts: i32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            payload,
            attempts: 0,
            max_attempts,
            status: JobStatus::Queued,
            next_run_at: now,
            lease_owner: None,
            lease_expires_at: None,
            last_error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Eligible for a worker to claim at `now`
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Queued | JobStatus::FailedRetryable => self.next_run_at <= now,
            // Lease expired: the previous holder is presumed dead
            JobStatus::Active => {
                self.has_attempts_remaining()
                    && self.lease_expires_at.is_some_and(|expiry| expiry <= now)
            }
            JobStatus::Completed | JobStatus::FailedTerminal => false,
        }
    }

    pub fn is_held_by(&self, worker_id: &str) -> bool {
        self.status == JobStatus::Active && self.lease_owner.as_deref() == Some(worker_id)
    }

    pub fn has_attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_job_type_round_trips_through_str() {
        for job_type in JobType::ALL {
            assert_eq!(job_type.as_str().parse::<JobType>(), Ok(job_type));
        }
        assert!("dance".parse::<JobType>().is_err());
        assert_eq!(
            serde_json::to_string(&JobType::WebhookDeliver).unwrap(),
            "\"webhook-deliver\""
        );
    }

    #[test]
    fn test_claimability() {
        let now = Utc::now();
        let mut job = Job::new(JobType::Scrape, serde_json::json!({}), 3, now);
        assert!(job.is_claimable(now));

        job.status = JobStatus::FailedRetryable;
        job.next_run_at = now + Duration::seconds(10);
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + Duration::seconds(10)));

        job.status = JobStatus::Active;
        job.lease_expires_at = Some(now + Duration::seconds(30));
        assert!(!job.is_claimable(now));
        assert!(job.is_claimable(now + Duration::seconds(31)));

        job.attempts = 3;
        assert!(
            !job.is_claimable(now + Duration::seconds(31)),
            "final attempt is never reclaimed"
        );

        job.status = JobStatus::FailedTerminal;
        assert!(!job.is_claimable(now + Duration::days(1)));
    }
}
