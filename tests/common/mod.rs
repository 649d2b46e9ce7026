//! Shared fixtures for integration tests: a scripted provider and a fully
//! wired orchestrator over in-memory stores and a manual clock.

#![allow(dead_code)]

use async_trait::async_trait;
use enrichment_core::budget::{BudgetTracker, DayBoundary};
use enrichment_core::clock::{ManualClock, SharedClock};
use enrichment_core::events::EventPublisher;
use enrichment_core::models::Contact;
use enrichment_core::orchestration::{Guardrails, OrchestratorConfig, ProviderOrchestrator};
use enrichment_core::providers::{EnrichmentRequest, ProviderAdapter, ProviderCallError, ProviderResponse};
use enrichment_core::resilience::{BackoffPolicy, CircuitBreakerConfig, CircuitBreakerManager, TokenBucket};
use enrichment_core::store::Stores;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub type Reply = Result<ProviderResponse, ProviderCallError>;

/// Provider that plays back queued replies, then a default reply
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    default_reply: Reply,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(name: &str, default_reply: Reply) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(VecDeque::new()),
            default_reply,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    pub fn with_replies(self, replies: Vec<Reply>) -> Self {
        *self.replies.lock() = replies.into();
        self
    }

    /// Every lookup waits this long before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, _request: &EnrichmentRequest) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.replies.lock().pop_front();
        next.unwrap_or_else(|| self.default_reply.clone())
    }
}

pub fn owner_phone() -> Contact {
    Contact::phone("+19375550100", 0.92)
}

pub fn found(cost_cents: i64) -> Reply {
    Ok(ProviderResponse::Found {
        contacts: vec![owner_phone()],
        cost_cents,
    })
}

pub fn server_error() -> Reply {
    Err(ProviderCallError::Http {
        status: 500,
        message: "internal error".to_string(),
        billed_cents: None,
    })
}

pub fn request() -> EnrichmentRequest {
    EnrichmentRequest::new("12 Oak St", "Dayton", "OH", "45402")
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub stores: Stores,
    pub events: EventPublisher,
    pub guardrails: Guardrails,
    pub orchestrator: ProviderOrchestrator,
}

pub struct HarnessBuilder {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    cap_cents: i64,
    breaker: CircuitBreakerConfig,
    requests_per_second: u32,
    stores: Stores,
}

impl HarnessBuilder {
    pub fn new(providers: Vec<Arc<dyn ProviderAdapter>>) -> Self {
        Self {
            providers,
            cap_cents: 0,
            breaker: CircuitBreakerConfig::default(),
            requests_per_second: 1_000,
            stores: Stores::in_memory(),
        }
    }

    pub fn cap_cents(mut self, cap_cents: i64) -> Self {
        self.cap_cents = cap_cents;
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn stores(mut self, stores: Stores) -> Self {
        self.stores = stores;
        self
    }

    pub async fn build(self) -> Harness {
        let clock = Arc::new(ManualClock::starting_now());
        let shared: SharedClock = clock.clone();
        let events = EventPublisher::new();

        let budget = BudgetTracker::bootstrap(
            self.cap_cents,
            DayBoundary::Local,
            self.stores.ledger.clone(),
            shared.clone(),
        )
        .await
        .expect("budget bootstrap")
        .with_events(events.clone());

        let guardrails = Guardrails {
            breakers: Arc::new(
                CircuitBreakerManager::new(self.breaker, shared.clone()).with_events(events.clone()),
            ),
            bucket: Arc::new(TokenBucket::per_second(self.requests_per_second)),
            budget: Arc::new(budget),
        };

        let config = OrchestratorConfig {
            provider_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(50), 0.0),
            cache_ttl: chrono::Duration::days(30),
        };
        let orchestrator =
            ProviderOrchestrator::new(self.providers, guardrails.clone(), &self.stores, shared, config);

        Harness {
            clock,
            stores: self.stores,
            events,
            guardrails,
            orchestrator,
        }
    }
}
