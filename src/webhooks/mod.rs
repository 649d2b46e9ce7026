//! # Webhooks
//!
//! Shared-secret HMAC signatures over the raw body, in both directions.
//!
//! - Outbound: [`WebhookDeliveryHandler`] executes `webhook-deliver` jobs, so
//!   delivery inherits the job queue's retry and dead-letter policy.
//! - Inbound: [`InboundVerifier`] authenticates provider callbacks before any
//!   state mutation.

pub mod delivery;
pub mod inbound;
pub mod signing;

pub use delivery::{enqueue_delivery, WebhookDeliveryHandler, WebhookJobPayload};
pub use inbound::InboundVerifier;
pub use signing::WebhookSigner;
