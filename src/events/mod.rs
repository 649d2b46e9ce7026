//! # Event System
//!
//! In-process observability events for the governance layer. Components
//! publish [`GuardEvent`]s on a shared [`EventPublisher`]; operators and tests
//! subscribe to react to breaker transitions, budget exhaustion, and
//! dead-lettered jobs.

pub mod publisher;

pub use publisher::{EventPublisher, EventPublisherConfig, GuardEvent};
