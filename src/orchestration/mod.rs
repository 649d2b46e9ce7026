//! # Enrichment Orchestration
//!
//! The request path for paid contact enrichment.
//!
//! ## Core Components
//!
//! - **ProviderOrchestrator**: cache, budget and circuit admission, then the
//!   ordered provider list with bounded local retries
//! - **InFlight**: per-key coalescing so concurrent identical cache misses
//!   pay for one lookup
//! - **EnrichmentOutcome**: structured result distinguishing "no contact
//!   found" from "temporarily unavailable"
//!
//! All guardrail services are constructor-injected through [`Guardrails`];
//! nothing here is a process global.

pub mod coalescing;
pub mod outcome;
pub mod provider_orchestrator;

pub use coalescing::{InFlight, Shared};
pub use outcome::{EnrichmentOutcome, FailureReason};
pub use provider_orchestrator::{Guardrails, OrchestratorConfig, ProviderOrchestrator};
