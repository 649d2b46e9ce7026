//! # Data Layer
//!
//! Records owned by the governance layer. Persistence lives in
//! [`crate::store`]; these types are storage-agnostic.
//!
//! - [`ProviderCallRecord`] - append-only cost ledger (source of truth for budgets)
//! - [`CacheEntry`] - skip-trace result cache
//! - [`Job`] - durable background work item
//! - [`WebhookDeliveryAttempt`] - outbound delivery audit trail

pub mod cache_entry;
pub mod contact;
pub mod job;
pub mod provider_call_record;
pub mod webhook_delivery_attempt;

pub use cache_entry::CacheEntry;
pub use contact::{Contact, ContactKind};
pub use job::{Job, JobStatus, JobType};
pub use provider_call_record::{CallOutcome, ProviderCallRecord};
pub use webhook_delivery_attempt::WebhookDeliveryAttempt;
