//! End-to-end enrichment: cost accounting, caching and request coalescing.

mod common;

use common::{found, owner_phone, request, HarnessBuilder, ScriptedProvider};
use enrichment_core::models::CallOutcome;
use enrichment_core::orchestration::FailureReason;
use enrichment_core::providers::{EnrichmentRequest, ProviderResponse};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_new_address_is_billed_once_then_served_from_cache() {
    let provider = Arc::new(ScriptedProvider::new("batchskip", found(25)));
    let harness = HarnessBuilder::new(vec![provider.clone()]).build().await;

    let first = harness.orchestrator.enrich(&request()).await.unwrap();
    assert!(first.success);
    assert!(!first.cached);
    assert_eq!(first.cost_cents, 25);
    assert_eq!(first.contacts, vec![owner_phone()]);
    assert_eq!(first.providers_tried, vec!["batchskip"]);
    assert_eq!(harness.guardrails.budget.spent(), 25);

    // same owner, differently formatted
    let repeat = EnrichmentRequest::new("12 OAK ST.", "dayton", "oh", "45402-0001");
    let second = harness.orchestrator.enrich(&repeat).await.unwrap();
    assert!(second.success);
    assert!(second.cached);
    assert_eq!(second.cost_cents, 0);
    assert_eq!(second.contacts, first.contacts);
    assert_eq!(second.served_by.as_deref(), Some("batchskip"));

    assert_eq!(provider.calls(), 1);
    let ledger = harness.stores.ledger.list_recent(None, 10).await.unwrap();
    assert_eq!(ledger.len(), 1, "a cache hit writes no ledger row");
    assert_eq!(ledger[0].cost_cents, 25);
    assert_eq!(ledger[0].outcome, CallOutcome::Found);
    assert_eq!(harness.guardrails.budget.spent(), 25);
}

#[tokio::test]
async fn test_expired_cache_entry_triggers_a_new_paid_lookup() {
    let provider = Arc::new(ScriptedProvider::new("batchskip", found(25)));
    let harness = HarnessBuilder::new(vec![provider.clone()]).build().await;

    harness.orchestrator.enrich(&request()).await.unwrap();
    harness.clock.advance(chrono::Duration::days(30));

    let refreshed = harness.orchestrator.enrich(&request()).await.unwrap();
    assert!(!refreshed.cached);
    assert_eq!(refreshed.cost_cents, 25);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_no_hit_is_billed_and_not_cached() {
    let provider = Arc::new(ScriptedProvider::new(
        "batchskip",
        Ok(ProviderResponse::NoHit {
            cost_cents: 25,
            reason: Some("no owner match".to_string()),
        }),
    ));
    let harness = HarnessBuilder::new(vec![provider.clone()]).build().await;

    let outcome = harness.orchestrator.enrich(&request()).await.unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(FailureReason::NoHit));
    assert!(!FailureReason::NoHit.is_temporary());
    assert_eq!(outcome.cost_cents, 25);
    assert_eq!(outcome.detail.as_deref(), Some("no owner match"));

    harness.orchestrator.enrich(&request()).await.unwrap();
    assert_eq!(provider.calls(), 2, "no-hit answers are not cached");
}

#[tokio::test]
async fn test_concurrent_identical_requests_pay_once() {
    let provider = Arc::new(
        ScriptedProvider::new("batchskip", found(25)).with_delay(Duration::from_millis(50)),
    );
    let harness = HarnessBuilder::new(vec![provider.clone()]).build().await;

    let owner = request();
    let requests: Vec<_> = (0..6).map(|_| harness.orchestrator.enrich(&owner)).collect();
    let outcomes: Vec<_> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    assert_eq!(provider.calls(), 1);
    assert!(outcomes.iter().all(|o| o.success && o.contacts == vec![owner_phone()]));

    let leaders: Vec<_> = outcomes.iter().filter(|o| !o.coalesced).collect();
    assert_eq!(leaders.len(), 1);
    assert_eq!(leaders[0].cost_cents, 25);
    assert_eq!(outcomes.iter().map(|o| o.cost_cents).sum::<i64>(), 25);

    assert_eq!(harness.stores.ledger.list_recent(None, 10).await.unwrap().len(), 1);
    assert_eq!(harness.guardrails.budget.spent(), 25);
}

#[tokio::test]
async fn test_distinct_addresses_are_not_coalesced() {
    let provider = Arc::new(
        ScriptedProvider::new("batchskip", found(25)).with_delay(Duration::from_millis(20)),
    );
    let harness = HarnessBuilder::new(vec![provider.clone()]).build().await;

    let a = EnrichmentRequest::new("12 Oak St", "Dayton", "OH", "45402");
    let b = EnrichmentRequest::new("14 Oak St", "Dayton", "OH", "45402");
    let (first, second) = tokio::join!(harness.orchestrator.enrich(&a), harness.orchestrator.enrich(&b));

    assert!(!first.unwrap().coalesced);
    assert!(!second.unwrap().coalesced);
    assert_eq!(provider.calls(), 2);
}
