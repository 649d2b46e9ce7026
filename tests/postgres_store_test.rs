//! PostgreSQL store behavior. Requires a reachable database:
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/enrichment_test cargo test --test postgres_store_test -- --ignored
//! ```

use chrono::{Duration, Utc};
use enrichment_core::budget::{BudgetTracker, DayBoundary};
use enrichment_core::clock::{Clock, ManualClock, SharedClock};
use enrichment_core::models::{
    CacheEntry, CallOutcome, Contact, Job, JobStatus, JobType, ProviderCallRecord, WebhookDeliveryAttempt,
};
use enrichment_core::store::{
    CallLedger, DeliveryLog, JobStore, PgCallLedger, PgDeliveryLog, PgJobStore, PgResultCache, ResultCache,
};
use uuid::Uuid;
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_ledger_sums_only_the_requested_window(pool: PgPool) {
    let ledger = PgCallLedger::new(pool);
    let now = Utc::now();

    for (cost, at) in [(25, now), (40, now - Duration::minutes(5)), (99, now - Duration::days(3))] {
        let record = ProviderCallRecord::new("batchskip", "12 oak st|dayton|oh|45402", cost, CallOutcome::Found, at);
        ledger.append(&record).await.unwrap();
    }
    let failed = ProviderCallRecord::new("batchskip", "k", 10, CallOutcome::Failed, now).with_detail("HTTP 502");
    ledger.append(&failed).await.unwrap();

    let total = ledger
        .sum_cost_between(now - Duration::hours(1), now + Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(total, 75);

    let recent = ledger.list_recent(Some("batchskip"), 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert!(ledger.list_recent(Some("other"), 10).await.unwrap().is_empty());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_budget_bootstraps_from_durable_ledger(pool: PgPool) {
    let clock = Arc::new(ManualClock::starting_now());
    let ledger: Arc<dyn CallLedger> = Arc::new(PgCallLedger::new(pool));
    for _ in 0..4 {
        let record = ProviderCallRecord::new("batchskip", "k", 300, CallOutcome::Found, clock.now());
        ledger.append(&record).await.unwrap();
    }

    let shared: SharedClock = clock.clone();
    let budget = BudgetTracker::bootstrap(1_000, DayBoundary::Local, ledger, shared)
        .await
        .unwrap();
    assert_eq!(budget.spent(), 1_200);
    assert!(budget.at_cap());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_cache_respects_expiry_and_upserts(pool: PgPool) {
    let cache = PgResultCache::new(pool);
    let now = Utc::now();
    let mut entry = CacheEntry {
        normalized_key: "12 oak st|dayton|oh|45402".to_string(),
        contacts: vec![Contact::phone("+19375550100", 0.9)],
        provider: "batchskip".to_string(),
        cost_cents_at_original_fetch: 25,
        fetched_at: now,
        expires_at: now + Duration::days(30),
    };
    cache.put(&entry).await.unwrap();

    let hit = cache.get(&entry.normalized_key, now).await.unwrap().unwrap();
    assert_eq!(hit.contacts, entry.contacts);
    assert_eq!(hit.provider, "batchskip");
    assert!(cache
        .get(&entry.normalized_key, now + Duration::days(31))
        .await
        .unwrap()
        .is_none());

    entry.provider = "fallback".to_string();
    cache.put(&entry).await.unwrap();
    let replaced = cache.get(&entry.normalized_key, now).await.unwrap().unwrap();
    assert_eq!(replaced.provider, "fallback");

    assert_eq!(cache.purge_expired(now + Duration::days(31)).await.unwrap(), 1);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_claims_never_share_a_job(pool: PgPool) {
    let store = Arc::new(PgJobStore::new(pool));
    let now = Utc::now();
    for n in 0..10 {
        store
            .insert(&Job::new(JobType::Enrich, json!({ "n": n }), 3, now))
            .await
            .unwrap();
    }

    let claimers = (0..10).map(|w| {
        let store = store.clone();
        tokio::spawn(async move {
            let worker = format!("worker-{w}");
            store.claim_next(&worker, Utc::now(), Duration::minutes(5)).await.unwrap()
        })
    });
    let mut claimed: Vec<_> = futures::future::join_all(claimers)
        .await
        .into_iter()
        .filter_map(|r| r.unwrap())
        .map(|job| job.id)
        .collect();
    let total = claimed.len();
    claimed.sort();
    claimed.dedup();
    assert_eq!(claimed.len(), total, "a job was claimed twice");
    assert_eq!(total, 10);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_outcome_updates_are_lease_guarded(pool: PgPool) {
    let store = PgJobStore::new(pool);
    let now = Utc::now();
    let job = Job::new(JobType::Scrape, json!({}), 2, now);
    store.insert(&job).await.unwrap();

    let claimed = store
        .claim_next("worker-a", now, Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.attempts, 1);
    assert_eq!(claimed.status, JobStatus::Active);

    let err = store.mark_completed(job.id, "worker-b", now).await.unwrap_err();
    assert_eq!(err.code(), "lease_lost");

    // lease expires on the final attempt: abandoned work is dead-lettered
    let later = now + Duration::seconds(31);
    let reclaimed = store
        .claim_next("worker-b", later, Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed.attempts, 2);

    let stale = store.mark_completed(job.id, "worker-a", later).await.unwrap_err();
    assert_eq!(stale.code(), "lease_lost");

    let abandoned = store.fail_abandoned(later + Duration::seconds(31)).await.unwrap();
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0].status, JobStatus::FailedTerminal);

    let replayed = store.replay(job.id, later).await.unwrap();
    assert_eq!(replayed.status, JobStatus::Queued);
    assert_eq!(replayed.attempts, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL"]
async fn test_delivery_attempts_survive_job_retention_purge(pool: PgPool) {
    let jobs = PgJobStore::new(pool.clone());
    let log = PgDeliveryLog::new(pool);
    let now = Utc::now();
    let job = Job::new(JobType::WebhookDeliver, json!({ "url": "https://crm.example/hooks" }), 5, now);
    jobs.insert(&job).await.unwrap();

    jobs.claim_next("worker-a", now, Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    for (attempt_number, status) in [(1, 503), (2, 204)] {
        let attempt = WebhookDeliveryAttempt {
            id: Uuid::new_v4(),
            job_id: job.id,
            url: "https://crm.example/hooks".to_string(),
            attempt_number,
            http_status: Some(status),
            network_error: None,
            duration_ms: 40,
            created_at: now,
        };
        log.record(&attempt).await.unwrap();
    }
    jobs.mark_completed(job.id, "worker-a", now).await.unwrap();

    let purged = jobs.purge_completed(now + Duration::hours(73)).await.unwrap();
    assert_eq!(purged, 1);
    assert!(jobs.get(job.id).await.unwrap().is_none());

    let history = log.attempts_for_job(job.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert!(history[1].succeeded());
}
