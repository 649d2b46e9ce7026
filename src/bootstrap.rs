//! # Guard System Bootstrap
//!
//! Builds every service from one [`GuardConfig`] and injects them through
//! constructors; no component reaches for a global.
//!
//! ## Lifecycle
//!
//! 1. [`GuardSystem::bootstrap`] selects stores (PostgreSQL when
//!    `database.url` is set, in-memory otherwise), recomputes today's spend
//!    from the ledger and starts the token bucket refill.
//! 2. [`GuardSystem::start_workers`] launches the job worker pool.
//! 3. [`GuardSystem::health`] reports breaker, budget, bucket and queue state.
//! 4. [`GuardSystem::shutdown`] drains in-flight jobs and stops the refill.

use crate::budget::{BudgetSnapshot, BudgetTracker};
use crate::clock::{system_clock, SharedClock};
use crate::config::GuardConfig;
use crate::database::{run_migrations, DatabaseConnection};
use crate::error::{GuardError, GuardResult};
use crate::events::EventPublisher;
use crate::jobs::{HandlerRegistry, JobHandler, JobQueue, JobQueueConfig, WorkerPool};
use crate::orchestration::{Guardrails, OrchestratorConfig, ProviderOrchestrator};
use crate::providers::ProviderAdapter;
use crate::resilience::{
    BucketSnapshot, CircuitBreakerConfig, CircuitBreakerManager, RateLimiterConfig,
    SystemCircuitBreakerMetrics, TokenBucket,
};
use crate::store::{JobCounts, Stores};
use crate::webhooks::WebhookDeliveryHandler;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Operator view of every guardrail
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    /// `None` when running on in-memory stores
    pub database_reachable: Option<bool>,
    pub circuit_breakers: SystemCircuitBreakerMetrics,
    pub unhealthy_providers: Vec<String>,
    pub budget: BudgetSnapshot,
    pub rate_limit: BucketSnapshot,
    pub jobs: JobCounts,
}

/// Running system handle
#[derive(Debug)]
pub struct GuardSystem {
    pub config: GuardConfig,
    pub clock: SharedClock,
    pub events: EventPublisher,
    pub stores: Stores,
    pub guardrails: Guardrails,
    pub queue: Arc<JobQueue>,
    pub orchestrator: Arc<ProviderOrchestrator>,
    /// Present when a webhook signing secret is configured
    pub webhooks: Option<Arc<WebhookDeliveryHandler>>,
    handlers: HandlerRegistry,
    database: Option<DatabaseConnection>,
    refill_task: Option<JoinHandle<()>>,
    worker_pool: Option<WorkerPool>,
}

impl GuardSystem {
    /// Bootstrap against the system clock
    pub async fn bootstrap(
        config: GuardConfig,
        providers: Vec<Arc<dyn ProviderAdapter>>,
    ) -> GuardResult<Self> {
        let database = match &config.database.url {
            Some(_) => {
                let connection = DatabaseConnection::connect(&config.database).await?;
                run_migrations(connection.pool()).await?;
                Some(connection)
            }
            None => {
                info!("No database configured; using in-memory stores");
                None
            }
        };
        let stores = match &database {
            Some(connection) => Stores::postgres(connection.pool().clone()),
            None => Stores::in_memory(),
        };

        let mut system = Self::bootstrap_with(config, providers, stores, system_clock()).await?;
        system.database = database;
        Ok(system)
    }

    /// Bootstrap with explicit stores and clock
    pub async fn bootstrap_with(
        config: GuardConfig,
        providers: Vec<Arc<dyn ProviderAdapter>>,
        stores: Stores,
        clock: SharedClock,
    ) -> GuardResult<Self> {
        info!("🚀 BOOTSTRAP: Initializing enrichment guard system");
        config.validate()?;
        if providers.is_empty() {
            return Err(GuardError::Configuration(
                "at least one provider adapter is required".to_string(),
            ));
        }

        let events = EventPublisher::new();

        let breakers = CircuitBreakerManager::new(
            CircuitBreakerConfig::from(&config.circuit_breaker),
            clock.clone(),
        )
        .with_events(events.clone());
        let bucket = Arc::new(TokenBucket::new(&RateLimiterConfig::from(&config.rate_limit)));
        let budget = BudgetTracker::from_config(&config.budget, stores.ledger.clone(), clock.clone())
            .await?
            .with_events(events.clone());
        let guardrails = Guardrails {
            breakers: Arc::new(breakers),
            bucket,
            budget: Arc::new(budget),
        };

        let queue = Arc::new(
            JobQueue::new(stores.jobs.clone(), JobQueueConfig::from(&config), clock.clone())
                .with_events(events.clone()),
        );

        let mut handlers = HandlerRegistry::new();
        let webhooks = if config.webhook.signing_secret.is_empty() {
            warn!("No webhook signing secret configured; webhook delivery disabled");
            None
        } else {
            let handler = Arc::new(
                WebhookDeliveryHandler::new(&config.webhook, stores.deliveries.clone(), clock.clone())?
                    .with_events(events.clone()),
            );
            handlers.register(handler.clone());
            Some(handler)
        };

        let mut orchestrator = ProviderOrchestrator::new(
            providers,
            guardrails.clone(),
            &stores,
            clock.clone(),
            OrchestratorConfig::from(&config.enrichment),
        );
        if let Some(url) = &config.webhook.completion_url {
            orchestrator = orchestrator.with_completion_notifications(queue.clone(), url.clone());
        }

        let refill_task = Some(guardrails.bucket.spawn_refill());

        info!(
            providers = ?orchestrator.provider_names(),
            daily_cap_cents = config.budget.daily_cap_cents,
            spent_today_cents = guardrails.budget.spent(),
            "✅ BOOTSTRAP: Enrichment guard system ready"
        );

        Ok(Self {
            config,
            clock,
            events,
            stores,
            guardrails,
            queue,
            orchestrator: Arc::new(orchestrator),
            webhooks,
            handlers,
            database: None,
            refill_task,
            worker_pool: None,
        })
    }

    /// Add a handler for scrape, enrich or match jobs before starting workers
    pub fn register_handler(&mut self, handler: Arc<dyn JobHandler>) {
        self.handlers.register(handler);
    }

    pub fn start_workers(&mut self) {
        if self.worker_pool.is_some() {
            warn!("Worker pool already running");
            return;
        }
        self.worker_pool = Some(WorkerPool::start(
            "enrichment",
            self.config.jobs.worker_count,
            self.queue.clone(),
            Arc::new(self.handlers.clone()),
            Duration::from_millis(self.config.jobs.poll_interval_ms),
        ));
    }

    pub fn is_running(&self) -> bool {
        self.worker_pool.as_ref().is_some_and(WorkerPool::is_running)
    }

    pub async fn health(&self) -> GuardResult<HealthReport> {
        let database_reachable = match &self.database {
            Some(connection) => Some(connection.health_check().await.unwrap_or_else(|e| {
                warn!(error = %e, "Database health check failed");
                false
            })),
            None => None,
        };

        let circuit_breakers = self.guardrails.breakers.get_system_metrics().await;
        let unhealthy_providers = circuit_breakers.unhealthy();
        for name in &unhealthy_providers {
            if let Some(metrics) = circuit_breakers.circuit_breakers.get(name) {
                warn!(provider = %name, "{}", metrics.format_summary());
            }
        }

        let jobs = match self.queue.counts().await {
            Ok(counts) => counts,
            Err(e) if database_reachable == Some(false) => {
                warn!(error = %e, "Job counts unavailable");
                JobCounts::default()
            }
            Err(e) => return Err(e),
        };

        // Degraded but serving while at least one provider circuit is usable
        let providers = self.orchestrator.provider_names().len();
        let healthy = database_reachable != Some(false) && unhealthy_providers.len() < providers;

        Ok(HealthReport {
            healthy,
            database_reachable,
            circuit_breakers,
            unhealthy_providers,
            budget: self.guardrails.budget.snapshot(),
            rate_limit: self.guardrails.bucket.snapshot(),
            jobs,
        })
    }

    /// Wait for in-flight jobs, then stop background tasks
    pub async fn shutdown(mut self) {
        info!("🛑 Enrichment guard system shutdown requested");
        if let Some(pool) = self.worker_pool.take() {
            pool.shutdown().await;
        }
        if let Some(task) = self.refill_task.take() {
            task.abort();
        }
        if let Some(database) = self.database.take() {
            database.close().await;
        }
        info!("Enrichment guard system stopped");
    }
}
