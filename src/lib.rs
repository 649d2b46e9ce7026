#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Enrichment Core
//!
//! Governance and resilience layer for paid, rate-limited third-party calls
//! (skip-trace contact enrichment) and for the background jobs that feed them.
//!
//! ## Overview
//!
//! Every paid call passes through admission control before it leaves the
//! process: a token bucket caps steady-state request rate, a per-provider
//! circuit breaker stops calling a failing provider until a single probe shows
//! recovery, and a daily budget tracker refuses calls once the spend cap is
//! reached. Results are cached so repeat lookups cost nothing, and every billed
//! attempt is written to an append-only ledger that is the source of truth for
//! the budget across restarts.
//!
//! Background work (scrapes, enrichment batches, matching, webhook delivery)
//! runs on a durable job queue with leases, bounded retries with backoff, and a
//! dead-letter state for manual replay.
//!
//! ## Module Organization
//!
//! - [`resilience`] - token bucket, circuit breakers, backoff
//! - [`budget`] - daily spend cap recomputed from the ledger
//! - [`orchestration`] - the enrichment request path
//! - [`providers`] - provider adapter boundary and HTTP adapter
//! - [`jobs`] - job queue, workers, handler registry
//! - [`webhooks`] - signed outbound delivery and inbound verification
//! - [`store`] / [`database`] - in-memory and PostgreSQL persistence
//! - [`config`] / [`logging`] / [`error`] / [`events`] - ambient plumbing
//! - [`bootstrap`] - wiring everything from one configuration
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use enrichment_core::bootstrap::GuardSystem;
//! use enrichment_core::config::GuardConfig;
//! use enrichment_core::providers::{EnrichmentRequest, HttpProviderConfig, HttpSkipTraceProvider};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! enrichment_core::logging::init_structured_logging();
//!
//! let provider = HttpSkipTraceProvider::new(HttpProviderConfig {
//!     name: "batchskip".to_string(),
//!     base_url: "https://api.batchskip.example".to_string(),
//!     api_key: std::env::var("BATCHSKIP_API_KEY").ok(),
//!     timeout_ms: 10_000,
//!     price_per_call_cents: 25,
//!     bills_per_attempt: true,
//! })?;
//!
//! let mut system = GuardSystem::bootstrap(GuardConfig::from_env()?, vec![Arc::new(provider)]).await?;
//! system.start_workers();
//!
//! let outcome = system
//!     .orchestrator
//!     .enrich(&EnrichmentRequest::new("12 Oak St", "Dayton", "OH", "45402"))
//!     .await?;
//! println!("success={} cost={}c", outcome.success, outcome.cost_cents);
//!
//! system.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod budget;
pub mod clock;
pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod events;
pub mod jobs;
pub mod logging;
pub mod models;
pub mod normalization;
pub mod orchestration;
pub mod providers;
pub mod resilience;
pub mod store;
pub mod webhooks;

pub use bootstrap::GuardSystem;
pub use budget::{BudgetSnapshot, BudgetTracker, DayBoundary};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{ConfigManager, GuardConfig};
pub use error::{GuardError, GuardResult};
pub use events::{EventPublisher, GuardEvent};
pub use jobs::{JobError, JobHandler, JobQueue, WorkerPool};
pub use orchestration::{EnrichmentOutcome, FailureReason, ProviderOrchestrator};
pub use providers::{EnrichmentRequest, ProviderAdapter, ProviderCallError, ProviderResponse};
pub use resilience::{CircuitBreaker, CircuitBreakerManager, CircuitState, TokenBucket};
pub use store::Stores;
