//! Daily budget cap: enforcement, restart durability and day rollover.

mod common;

use common::{found, HarnessBuilder, ScriptedProvider};
use enrichment_core::budget::{BudgetTracker, DayBoundary};
use enrichment_core::clock::SharedClock;
use enrichment_core::events::GuardEvent;
use enrichment_core::orchestration::FailureReason;
use enrichment_core::providers::EnrichmentRequest;
use std::sync::Arc;

fn address(n: u32) -> EnrichmentRequest {
    EnrichmentRequest::new(format!("{n} Elm Ave"), "Columbus", "OH", "43004")
}

#[tokio::test]
async fn test_cap_stops_new_paid_calls() {
    let provider = Arc::new(ScriptedProvider::new("batchskip", found(300)));
    let harness = HarnessBuilder::new(vec![provider.clone()])
        .cap_cents(1_000)
        .build()
        .await;
    let mut events = harness.events.subscribe();

    for n in 1..=3 {
        let outcome = harness.orchestrator.enrich(&address(n)).await.unwrap();
        assert!(outcome.success);
    }
    let budget = &harness.guardrails.budget;
    assert_eq!(budget.spent(), 900);
    assert!(!budget.at_cap());
    assert_eq!(budget.remaining(), 100);

    // admitted below the cap, so it completes and overshoots
    let fourth = harness.orchestrator.enrich(&address(4)).await.unwrap();
    assert!(fourth.success);
    assert_eq!(budget.spent(), 1_200);
    assert!(budget.at_cap());
    assert_eq!(budget.remaining(), 0);

    let refused = harness.orchestrator.enrich(&address(5)).await.unwrap();
    assert!(!refused.success);
    assert_eq!(refused.reason, Some(FailureReason::BudgetExhausted));
    assert!(!FailureReason::BudgetExhausted.is_temporary());
    assert_eq!(refused.cost_cents, 0);
    assert_eq!(provider.calls(), 4);

    let cap_events = std::iter::from_fn(|| events.try_recv().ok())
        .filter(|event| matches!(event, GuardEvent::BudgetCapReached { .. }))
        .count();
    assert_eq!(cap_events, 1);
}

#[tokio::test]
async fn test_cached_results_are_served_after_the_cap() {
    let provider = Arc::new(ScriptedProvider::new("batchskip", found(600)));
    let harness = HarnessBuilder::new(vec![provider.clone()])
        .cap_cents(1_000)
        .build()
        .await;

    harness.orchestrator.enrich(&address(1)).await.unwrap();
    harness.orchestrator.enrich(&address(2)).await.unwrap();
    assert!(harness.guardrails.budget.at_cap());

    let cached = harness.orchestrator.enrich(&address(1)).await.unwrap();
    assert!(cached.success);
    assert!(cached.cached);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_restart_recomputes_spend_from_ledger() {
    let provider = Arc::new(ScriptedProvider::new("batchskip", found(300)));
    let harness = HarnessBuilder::new(vec![provider.clone()])
        .cap_cents(1_000)
        .build()
        .await;

    for n in 1..=4 {
        harness.orchestrator.enrich(&address(n)).await.unwrap();
    }
    assert_eq!(harness.guardrails.budget.spent(), 1_200);

    // a fresh process over the same ledger
    let clock: SharedClock = harness.clock.clone();
    let restarted = BudgetTracker::bootstrap(1_000, DayBoundary::Local, harness.stores.ledger.clone(), clock)
        .await
        .unwrap();
    assert_eq!(restarted.spent(), 1_200);
    assert!(restarted.at_cap());
    assert_eq!(restarted.check().unwrap_err().code(), "budget_exhausted");
}

#[tokio::test]
async fn test_new_day_reopens_the_budget() {
    let provider = Arc::new(ScriptedProvider::new("batchskip", found(600)));
    let harness = HarnessBuilder::new(vec![provider.clone()])
        .cap_cents(1_000)
        .build()
        .await;

    harness.orchestrator.enrich(&address(1)).await.unwrap();
    harness.orchestrator.enrich(&address(2)).await.unwrap();
    let refused = harness.orchestrator.enrich(&address(3)).await.unwrap();
    assert_eq!(refused.reason, Some(FailureReason::BudgetExhausted));

    harness.clock.advance(chrono::Duration::hours(36));
    assert_eq!(harness.guardrails.budget.spent(), 0);

    let next_day = harness.orchestrator.enrich(&address(3)).await.unwrap();
    assert!(next_day.success);
    assert_eq!(harness.guardrails.budget.spent(), 600);
    assert_eq!(provider.calls(), 3);
}
