//! # Provider Orchestrator
//!
//! Routes an enrichment request through cache, guardrails and the ordered
//! provider list.
//!
//! ## Flow
//!
//! ```text
//! validate ─▶ fingerprint ─▶ coalesce ─▶ cache hit? ──yes──▶ cost 0
//!                                         │no
//!                                         ▼
//!                                   budget at cap? ──yes──▶ budget_exhausted
//!                                         │no
//!                                         ▼
//!            ┌──── for each provider: circuit open? skip
//!            │        take token ─▶ lookup (timeout) ─▶ charge + ledger row
//!            │        transient error ─▶ backoff, retry (bounded)
//!            │        found ─▶ record(true), cache, return
//!            └──────  no hit / failure ─▶ record, next provider
//! ```
//!
//! Guardrail decisions (validation, budget, circuit) are made before any
//! network call and cost nothing. Budget is re-checked before each paid
//! attempt, so a request never starts a call once the cap is reached.

use super::coalescing::InFlight;
use super::outcome::{EnrichmentOutcome, FailureReason};
use crate::budget::BudgetTracker;
use crate::clock::SharedClock;
use crate::config::EnrichmentConfig;
use crate::constants::events::ENRICHMENT_COMPLETED;
use crate::error::GuardResult;
use crate::jobs::JobQueue;
use crate::logging::log_provider_call;
use crate::models::{CacheEntry, CallOutcome, Contact, ProviderCallRecord};
use crate::normalization::{AddressNormalizer, CanonicalFingerprint};
use crate::providers::{EnrichmentRequest, ProviderAdapter, ProviderCallError, ProviderResponse};
use crate::resilience::{BackoffPolicy, CircuitBreakerManager, TokenBucket};
use crate::store::{CallLedger, ResultCache, Stores};
use crate::webhooks::enqueue_delivery;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard per-attempt limit; expiry counts as a transient failure
    pub provider_timeout: Duration,
    /// Retries after the first attempt, transient failures only
    pub max_retries: u32,
    pub retry_backoff: BackoffPolicy,
    pub cache_ttl: chrono::Duration,
}

impl From<&EnrichmentConfig> for OrchestratorConfig {
    fn from(config: &EnrichmentConfig) -> Self {
        Self {
            provider_timeout: config.provider_timeout(),
            max_retries: config.max_retries,
            retry_backoff: BackoffPolicy::for_provider_retries(config),
            cache_ttl: config.cache_ttl(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from(&EnrichmentConfig::default())
    }
}

/// Process-wide guardrail services shared by every request
#[derive(Debug, Clone)]
pub struct Guardrails {
    pub breakers: Arc<CircuitBreakerManager>,
    pub bucket: Arc<TokenBucket>,
    pub budget: Arc<BudgetTracker>,
}

#[derive(Debug, Clone)]
struct CompletionNotifier {
    queue: Arc<JobQueue>,
    url: String,
}

/// How one provider's attempts ended
#[derive(Debug)]
enum ProviderAttempt {
    Found(Vec<Contact>, i64),
    NoHit(Option<String>),
    Failed {
        error: ProviderCallError,
        /// Retries stopped because the daily cap was reached
        budget_stopped: bool,
    },
}

#[derive(Debug)]
pub struct ProviderOrchestrator {
    providers: Vec<Arc<dyn ProviderAdapter>>,
    guardrails: Guardrails,
    cache: Arc<dyn ResultCache>,
    ledger: Arc<dyn CallLedger>,
    normalizer: Arc<dyn AddressNormalizer>,
    clock: SharedClock,
    config: OrchestratorConfig,
    in_flight: InFlight<EnrichmentOutcome>,
    notifier: Option<CompletionNotifier>,
}

impl ProviderOrchestrator {
    /// `providers` is the fallback order: primary first
    pub fn new(
        providers: Vec<Arc<dyn ProviderAdapter>>,
        guardrails: Guardrails,
        stores: &Stores,
        clock: SharedClock,
        config: OrchestratorConfig,
    ) -> Self {
        info!(
            providers = ?providers.iter().map(|p| p.name()).collect::<Vec<_>>(),
            max_retries = config.max_retries,
            timeout_ms = config.provider_timeout.as_millis() as u64,
            "Provider orchestrator initialized"
        );

        Self {
            providers,
            guardrails,
            cache: stores.cache.clone(),
            ledger: stores.ledger.clone(),
            normalizer: Arc::new(CanonicalFingerprint),
            clock,
            config,
            in_flight: InFlight::new(),
            notifier: None,
        }
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn AddressNormalizer>) -> Self {
        self.normalizer = normalizer;
        self
    }

    /// Enqueue a signed `enrichment.completed` webhook after each paid success
    pub fn with_completion_notifications(mut self, queue: Arc<JobQueue>, url: impl Into<String>) -> Self {
        self.notifier = Some(CompletionNotifier {
            queue,
            url: url.into(),
        });
        self
    }

    pub fn guardrails(&self) -> &Guardrails {
        &self.guardrails
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// Enrich one owner. `Err` is reserved for store failures; every
    /// business outcome, including rejections, is an [`EnrichmentOutcome`].
    pub async fn enrich(&self, request: &EnrichmentRequest) -> GuardResult<EnrichmentOutcome> {
        let key = self.normalizer.fingerprint(request);

        if let Err(e) = request.validate() {
            debug!(request_key = %key, error = %e, "Rejected invalid enrichment request");
            return Ok(EnrichmentOutcome::failure(
                key,
                FailureReason::Validation,
                0,
                Vec::new(),
                Some(e.to_string()),
            ));
        }

        let shared = self
            .in_flight
            .run(&key, || self.lookup(request, &key))
            .await?;

        if shared.led {
            Ok(shared.value)
        } else {
            debug!(request_key = %key, "Served from a concurrent identical request");
            Ok(shared.value.into_follower())
        }
    }

    async fn lookup(&self, request: &EnrichmentRequest, key: &str) -> GuardResult<EnrichmentOutcome> {
        let now = self.clock.now();
        if let Some(entry) = self.cache.get(key, now).await? {
            debug!(request_key = %key, provider = %entry.provider, "Cache hit");
            return Ok(EnrichmentOutcome::cache_hit(&entry));
        }

        if let Err(e) = self.guardrails.budget.check() {
            info!(request_key = %key, error = %e, "Enrichment refused: budget exhausted");
            return Ok(EnrichmentOutcome::failure(
                key,
                FailureReason::BudgetExhausted,
                0,
                Vec::new(),
                Some(e.to_string()),
            ));
        }

        let mut providers_tried = Vec::new();
        let mut cost_cents = 0;
        let mut any_no_hit = false;
        let mut budget_stopped = false;
        let mut last_detail = None;

        for provider in &self.providers {
            if self.guardrails.budget.at_cap() {
                budget_stopped = true;
                break;
            }

            let breaker = self
                .guardrails
                .breakers
                .get_circuit_breaker(provider.name())
                .await;
            if !breaker.allow() {
                debug!(provider = %provider.name(), request_key = %key, "Skipping provider with open circuit");
                continue;
            }
            providers_tried.push(provider.name().to_string());

            let (attempt, spent) = self.call_with_retries(provider.as_ref(), request, key).await?;
            cost_cents += spent;

            match attempt {
                ProviderAttempt::Found(contacts, call_cost) => {
                    breaker.record(true);
                    self.store_result(key, provider.name(), &contacts, call_cost).await;

                    let outcome = EnrichmentOutcome::found(
                        key,
                        contacts,
                        cost_cents,
                        providers_tried,
                        provider.name(),
                    );
                    self.notify_completion(&outcome).await;
                    return Ok(outcome);
                }
                ProviderAttempt::NoHit(reason) => {
                    breaker.record(true);
                    any_no_hit = true;
                    last_detail = reason.or_else(|| Some(format!("{} found no contacts", provider.name())));
                }
                ProviderAttempt::Failed {
                    error,
                    budget_stopped: stopped,
                } => {
                    breaker.record(false);
                    last_detail = Some(format!("{}: {error}", provider.name()));
                    if stopped {
                        budget_stopped = true;
                        break;
                    }
                }
            }
        }

        let reason = if budget_stopped {
            FailureReason::BudgetExhausted
        } else if providers_tried.is_empty() {
            FailureReason::CircuitOpen
        } else if any_no_hit {
            FailureReason::NoHit
        } else {
            FailureReason::ProviderError
        };

        info!(
            request_key = %key,
            reason = %reason,
            cost_cents = cost_cents,
            providers_tried = ?providers_tried,
            "Enrichment finished without contacts"
        );
        Ok(EnrichmentOutcome::failure(
            key,
            reason,
            cost_cents,
            providers_tried,
            last_detail,
        ))
    }

    /// Attempt one provider with bounded retries on transient errors.
    /// Returns the outcome and the total billed across attempts.
    async fn call_with_retries(
        &self,
        provider: &dyn ProviderAdapter,
        request: &EnrichmentRequest,
        key: &str,
    ) -> GuardResult<(ProviderAttempt, i64)> {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 1;
        let mut spent = 0;

        loop {
            self.guardrails.bucket.take(1).await?;

            let result = match tokio::time::timeout(self.config.provider_timeout, provider.lookup(request)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderCallError::Timeout {
                    after_ms: self.config.provider_timeout.as_millis() as u64,
                }),
            };

            match result {
                Ok(ProviderResponse::Found { contacts, cost_cents }) => {
                    self.charge(provider.name(), key, cost_cents, CallOutcome::Found, None, attempt)
                        .await?;
                    return Ok((ProviderAttempt::Found(contacts, cost_cents), spent + cost_cents));
                }
                Ok(ProviderResponse::NoHit { cost_cents, reason }) => {
                    self.charge(
                        provider.name(),
                        key,
                        cost_cents,
                        CallOutcome::NoHit,
                        reason.as_deref(),
                        attempt,
                    )
                    .await?;
                    return Ok((ProviderAttempt::NoHit(reason), spent + cost_cents));
                }
                Err(error) => {
                    let billed = if provider.bills_per_attempt() {
                        error.billed_cents().unwrap_or_else(|| provider.attempt_cost_cents())
                    } else {
                        0
                    };
                    let detail = error.to_string();
                    self.charge(provider.name(), key, billed, CallOutcome::Failed, Some(&detail), attempt)
                        .await?;
                    spent += billed;

                    if !error.is_transient() || attempt >= max_attempts {
                        return Ok((
                            ProviderAttempt::Failed {
                                error,
                                budget_stopped: false,
                            },
                            spent,
                        ));
                    }

                    let delay = self.config.retry_backoff.delay_for_attempt(attempt);
                    warn!(
                        provider = %provider.name(),
                        request_key = %key,
                        attempt = attempt,
                        max_attempts = max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %error,
                        "Transient provider error; retrying"
                    );
                    tokio::time::sleep(delay).await;

                    if self.guardrails.budget.at_cap() {
                        return Ok((
                            ProviderAttempt::Failed {
                                error,
                                budget_stopped: true,
                            },
                            spent,
                        ));
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Budget first so the in-process cap sees the charge even if the ledger write fails
    async fn charge(
        &self,
        provider: &str,
        key: &str,
        cost_cents: i64,
        outcome: CallOutcome,
        detail: Option<&str>,
        attempt: u32,
    ) -> GuardResult<()> {
        self.guardrails.budget.add(cost_cents);

        let mut record = ProviderCallRecord::new(provider, key, cost_cents, outcome, self.clock.now());
        if let Some(detail) = detail {
            record = record.with_detail(detail);
        }
        self.ledger.append(&record).await?;

        log_provider_call(provider, key, outcome.as_str(), cost_cents, attempt, detail);
        Ok(())
    }

    async fn store_result(&self, key: &str, provider: &str, contacts: &[Contact], cost_cents: i64) {
        let now = self.clock.now();
        let entry = CacheEntry {
            normalized_key: key.to_string(),
            contacts: contacts.to_vec(),
            provider: provider.to_string(),
            cost_cents_at_original_fetch: cost_cents,
            fetched_at: now,
            expires_at: now + self.config.cache_ttl,
        };
        // The paid answer is still returned when caching fails
        if let Err(e) = self.cache.put(&entry).await {
            warn!(request_key = %key, provider = %provider, error = %e, "Failed to cache enrichment result");
        }
    }

    async fn notify_completion(&self, outcome: &EnrichmentOutcome) {
        let Some(notifier) = &self.notifier else {
            return;
        };
        match enqueue_delivery(&notifier.queue, &notifier.url, ENRICHMENT_COMPLETED, outcome).await {
            Ok(job_id) => debug!(job_id = %job_id, request_key = %outcome.request_key, "Completion webhook enqueued"),
            Err(e) => warn!(request_key = %outcome.request_key, error = %e, "Failed to enqueue completion webhook"),
        }
    }
}
