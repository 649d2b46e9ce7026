//! # PostgreSQL Stores
//!
//! `sqlx` implementations of the store traits over the schema in `migrations/`.
//!
//! Job claims use `FOR UPDATE SKIP LOCKED` inside a single `UPDATE ... RETURNING`
//! so concurrent workers (in one process or many) never lease the same row.
//! Outcome updates carry `status = 'active' AND lease_owner = $worker` in their
//! `WHERE` clause; a zero-row update means the lease was lost.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{GuardError, GuardResult};
use crate::models::{
    CacheEntry, CallOutcome, Contact, Job, JobStatus, JobType, ProviderCallRecord,
    WebhookDeliveryAttempt,
};
use crate::store::{CallLedger, DeliveryLog, JobCounts, JobStore, ResultCache};

const JOB_COLUMNS: &str = "id, job_type, payload, attempts, max_attempts, status, next_run_at, \
     lease_owner, lease_expires_at, last_error, created_at, updated_at, finished_at";

#[derive(Debug, FromRow)]
struct CallRecordRow {
    id: Uuid,
    provider: String,
    request_key: String,
    cost_cents: i64,
    succeeded: bool,
    outcome: String,
    detail: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CallRecordRow> for ProviderCallRecord {
    type Error = GuardError;

    fn try_from(row: CallRecordRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            provider: row.provider,
            request_key: row.request_key,
            cost_cents: row.cost_cents,
            succeeded: row.succeeded,
            outcome: row.outcome.parse::<CallOutcome>().map_err(GuardError::Database)?,
            detail: row.detail,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct CacheRow {
    normalized_key: String,
    contacts: Json<Vec<Contact>>,
    provider: String,
    cost_cents_at_original_fetch: i64,
    fetched_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl From<CacheRow> for CacheEntry {
    fn from(row: CacheRow) -> Self {
        Self {
            normalized_key: row.normalized_key,
            contacts: row.contacts.0,
            provider: row.provider,
            cost_cents_at_original_fetch: row.cost_cents_at_original_fetch,
            fetched_at: row.fetched_at,
            expires_at: row.expires_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    job_type: String,
    payload: serde_json::Value,
    attempts: i32,
    max_attempts: i32,
    status: String,
    next_run_at: DateTime<Utc>,
    lease_owner: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = GuardError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            job_type: row.job_type.parse::<JobType>().map_err(GuardError::Database)?,
            payload: row.payload,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            status: row.status.parse::<JobStatus>().map_err(GuardError::Database)?,
            next_run_at: row.next_run_at,
            lease_owner: row.lease_owner,
            lease_expires_at: row.lease_expires_at,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct DeliveryRow {
    id: Uuid,
    job_id: Uuid,
    url: String,
    attempt_number: i32,
    http_status: Option<i32>,
    network_error: Option<String>,
    duration_ms: i64,
    created_at: DateTime<Utc>,
}

impl From<DeliveryRow> for WebhookDeliveryAttempt {
    fn from(row: DeliveryRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            url: row.url,
            attempt_number: row.attempt_number,
            http_status: row.http_status.and_then(|s| u16::try_from(s).ok()),
            network_error: row.network_error,
            duration_ms: row.duration_ms,
            created_at: row.created_at,
        }
    }
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[derive(Debug, Clone)]
pub struct PgCallLedger {
    pool: PgPool,
}

impl PgCallLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallLedger for PgCallLedger {
    async fn append(&self, record: &ProviderCallRecord) -> GuardResult<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_call_records
                (id, provider, request_key, cost_cents, succeeded, outcome, detail, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.provider)
        .bind(&record.request_key)
        .bind(record.cost_cents)
        .bind(record.succeeded)
        .bind(record.outcome.as_str())
        .bind(&record.detail)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sum_cost_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> GuardResult<i64> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(cost_cents), 0)::BIGINT
            FROM provider_call_records
            WHERE created_at >= $1 AND created_at < $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(total)
    }

    async fn list_recent(
        &self,
        provider: Option<&str>,
        limit: usize,
    ) -> GuardResult<Vec<ProviderCallRecord>> {
        let rows: Vec<CallRecordRow> = sqlx::query_as(
            r#"
            SELECT id, provider, request_key, cost_cents, succeeded, outcome, detail, created_at
            FROM provider_call_records
            WHERE $1::TEXT IS NULL OR provider = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(provider)
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ProviderCallRecord::try_from).collect()
    }
}

#[derive(Debug, Clone)]
pub struct PgResultCache {
    pool: PgPool,
}

impl PgResultCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResultCache for PgResultCache {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> GuardResult<Option<CacheEntry>> {
        let row: Option<CacheRow> = sqlx::query_as(
            r#"
            SELECT normalized_key, contacts, provider, cost_cents_at_original_fetch,
                   fetched_at, expires_at
            FROM enrichment_cache
            WHERE normalized_key = $1 AND expires_at > $2
            "#,
        )
        .bind(key)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CacheEntry::from))
    }

    async fn put(&self, entry: &CacheEntry) -> GuardResult<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_cache
                (normalized_key, contacts, provider, cost_cents_at_original_fetch, fetched_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (normalized_key) DO UPDATE SET
                contacts = EXCLUDED.contacts,
                provider = EXCLUDED.provider,
                cost_cents_at_original_fetch = EXCLUDED.cost_cents_at_original_fetch,
                fetched_at = EXCLUDED.fetched_at,
                expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(&entry.normalized_key)
        .bind(Json(&entry.contacts))
        .bind(&entry.provider)
        .bind(entry.cost_cents_at_original_fetch)
        .bind(entry.fetched_at)
        .bind(entry.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> GuardResult<u64> {
        let result = sqlx::query("DELETE FROM enrichment_cache WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Distinguish an unknown job from a lost lease after a zero-row update
    async fn lease_failure(&self, id: Uuid, worker_id: &str) -> GuardError {
        match self.get(id).await {
            Ok(Some(_)) => GuardError::LeaseLost(format!("job {id} is not leased to worker {worker_id}")),
            Ok(None) => GuardError::NotFound(format!("job {id}")),
            Err(e) => e,
        }
    }

    async fn held_result(&self, row: Option<JobRow>, id: Uuid, worker_id: &str) -> GuardResult<Job> {
        match row {
            Some(row) => Job::try_from(row),
            None => Err(self.lease_failure(id, worker_id).await),
        }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &Job) -> GuardResult<()> {
        sqlx::query(
            r#"
            INSERT INTO enrichment_jobs
                (id, job_type, payload, attempts, max_attempts, status, next_run_at,
                 lease_owner, lease_expires_at, last_error, created_at, updated_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(job.id)
        .bind(job.job_type.as_str())
        .bind(&job.payload)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(job.status.as_str())
        .bind(job.next_run_at)
        .bind(&job.lease_owner)
        .bind(job.lease_expires_at)
        .bind(&job.last_error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .bind(job.finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> GuardResult<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE enrichment_jobs
            SET status = 'active',
                attempts = attempts + 1,
                lease_owner = $1,
                lease_expires_at = $3,
                updated_at = $2
            WHERE id = (
                SELECT id FROM enrichment_jobs
                WHERE (status IN ('queued', 'failed_retryable') AND next_run_at <= $2)
                   OR (status = 'active' AND lease_expires_at <= $2 AND attempts < max_attempts)
                ORDER BY COALESCE(
                    CASE WHEN status = 'active' THEN lease_expires_at END,
                    next_run_at
                ), created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(worker_id)
            .bind(now)
            .bind(now + lease)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Job::try_from).transpose()
    }

    async fn fail_abandoned(&self, now: DateTime<Utc>) -> GuardResult<Vec<Job>> {
        let sql = format!(
            r#"
            UPDATE enrichment_jobs
            SET status = 'failed_terminal',
                last_error = 'lease held by ' || COALESCE(lease_owner, 'unknown worker')
                    || ' expired during final attempt',
                lease_owner = NULL,
                lease_expires_at = NULL,
                updated_at = $1,
                finished_at = $1
            WHERE status = 'active' AND lease_expires_at <= $1 AND attempts >= max_attempts
            RETURNING {JOB_COLUMNS}
            "#
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql).bind(now).fetch_all(&self.pool).await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn mark_completed(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> GuardResult<Job> {
        let sql = format!(
            r#"
            UPDATE enrichment_jobs
            SET status = 'completed', lease_owner = NULL, lease_expires_at = NULL,
                last_error = NULL, updated_at = $3, finished_at = $3
            WHERE id = $1 AND status = 'active' AND lease_owner = $2
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(worker_id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        self.held_result(row, id, worker_id).await
    }

    async fn mark_retryable(
        &self,
        id: Uuid,
        worker_id: &str,
        next_run_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Job> {
        let sql = format!(
            r#"
            UPDATE enrichment_jobs
            SET status = 'failed_retryable', next_run_at = $3, last_error = $4,
                lease_owner = NULL, lease_expires_at = NULL, updated_at = $5
            WHERE id = $1 AND status = 'active' AND lease_owner = $2
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(worker_id)
            .bind(next_run_at)
            .bind(error)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        self.held_result(row, id, worker_id).await
    }

    async fn mark_terminal(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> GuardResult<Job> {
        let sql = format!(
            r#"
            UPDATE enrichment_jobs
            SET status = 'failed_terminal', last_error = $3,
                lease_owner = NULL, lease_expires_at = NULL, updated_at = $4, finished_at = $4
            WHERE id = $1 AND status = 'active' AND lease_owner = $2
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(worker_id)
            .bind(error)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        self.held_result(row, id, worker_id).await
    }

    async fn get(&self, id: Uuid) -> GuardResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM enrichment_jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_by_status(&self, status: JobStatus, limit: usize) -> GuardResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM enrichment_jobs WHERE status = $1 ORDER BY updated_at LIMIT $2"
        );
        let rows: Vec<JobRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    async fn replay(&self, id: Uuid, now: DateTime<Utc>) -> GuardResult<Job> {
        let sql = format!(
            r#"
            UPDATE enrichment_jobs
            SET status = 'queued', attempts = 0, next_run_at = $2,
                finished_at = NULL, updated_at = $2
            WHERE id = $1 AND status = 'failed_terminal'
            RETURNING {JOB_COLUMNS}
            "#
        );
        let row: Option<JobRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Job::try_from(row),
            None => match self.get(id).await? {
                Some(job) => Err(GuardError::Validation(format!(
                    "job {id} is {} and cannot be replayed",
                    job.status
                ))),
                None => Err(GuardError::NotFound(format!("job {id}"))),
            },
        }
    }

    async fn purge_completed(&self, before: DateTime<Utc>) -> GuardResult<u64> {
        let result = sqlx::query(
            "DELETE FROM enrichment_jobs WHERE status = 'completed' AND finished_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn counts(&self) -> GuardResult<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM enrichment_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let status = status.parse::<JobStatus>().map_err(GuardError::Database)?;
            counts.add(status, u64::try_from(count).unwrap_or(0));
        }
        Ok(counts)
    }
}

#[derive(Debug, Clone)]
pub struct PgDeliveryLog {
    pool: PgPool,
}

impl PgDeliveryLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryLog for PgDeliveryLog {
    async fn record(&self, attempt: &WebhookDeliveryAttempt) -> GuardResult<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_delivery_attempts
                (id, job_id, url, attempt_number, http_status, network_error, duration_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(attempt.id)
        .bind(attempt.job_id)
        .bind(&attempt.url)
        .bind(attempt.attempt_number)
        .bind(attempt.http_status.map(i32::from))
        .bind(&attempt.network_error)
        .bind(attempt.duration_ms)
        .bind(attempt.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn attempts_for_job(&self, job_id: Uuid) -> GuardResult<Vec<WebhookDeliveryAttempt>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(
            r#"
            SELECT id, job_id, url, attempt_number, http_status, network_error, duration_ms, created_at
            FROM webhook_delivery_attempts
            WHERE job_id = $1
            ORDER BY attempt_number
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(WebhookDeliveryAttempt::from).collect())
    }
}
