//! # Event Publisher
//!
//! Broadcast publisher for [`GuardEvent`]s.
//!
//! ## Usage
//!
//! ```rust
//! use enrichment_core::events::{EventPublisher, GuardEvent};
//!
//! # tokio_test::block_on(async {
//! let publisher = EventPublisher::new();
//! let mut events = publisher.subscribe();
//!
//! publisher.publish(GuardEvent::BudgetCapReached {
//!     spent_cents: 1200,
//!     cap_cents: 1000,
//!     at: chrono::Utc::now(),
//! });
//!
//! let event = events.recv().await.unwrap();
//! assert_eq!(event.name(), "budget.cap_reached");
//! # });
//! ```

use crate::constants::events;
use crate::models::JobType;
use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Observability events emitted by the governance layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GuardEvent {
    CircuitStateChanged {
        provider: String,
        from: CircuitState,
        to: CircuitState,
        at: DateTime<Utc>,
    },
    BudgetCapReached {
        spent_cents: i64,
        cap_cents: i64,
        at: DateTime<Utc>,
    },
    JobCompleted {
        job_id: Uuid,
        job_type: JobType,
        attempts: i32,
    },
    JobRetryScheduled {
        job_id: Uuid,
        job_type: JobType,
        attempts: i32,
        next_run_at: DateTime<Utc>,
        error: String,
    },
    JobDeadLettered {
        job_id: Uuid,
        job_type: JobType,
        attempts: i32,
        error: String,
    },
    WebhookDelivered {
        job_id: Uuid,
        url: String,
        attempt_number: i32,
        http_status: u16,
    },
}

impl GuardEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GuardEvent::CircuitStateChanged { .. } => events::CIRCUIT_STATE_CHANGED,
            GuardEvent::BudgetCapReached { .. } => events::BUDGET_CAP_REACHED,
            GuardEvent::JobCompleted { .. } => events::JOB_COMPLETED,
            GuardEvent::JobRetryScheduled { .. } => events::JOB_RETRY_SCHEDULED,
            GuardEvent::JobDeadLettered { .. } => events::JOB_DEAD_LETTERED,
            GuardEvent::WebhookDelivered { .. } => events::WEBHOOK_DELIVERED,
        }
    }
}

/// Event publisher configuration
#[derive(Debug, Clone)]
pub struct EventPublisherConfig {
    /// Maximum number of events buffered per lagging subscriber
    pub buffer_size: usize,
}

impl Default for EventPublisherConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

#[derive(Debug, Clone)]
pub struct EventPublisher {
    sender: broadcast::Sender<GuardEvent>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventPublisher {
    pub fn new() -> Self {
        Self::with_config(EventPublisherConfig::default())
    }

    pub fn with_config(config: EventPublisherConfig) -> Self {
        let (sender, _) = broadcast::channel(config.buffer_size.max(1));
        Self { sender }
    }

    /// Publish without blocking; events with no subscribers are dropped
    pub fn publish(&self, event: GuardEvent) {
        let name = event.name();
        if let Err(e) = self.sender.send(event) {
            if self.sender.receiver_count() > 0 {
                warn!(event_name = name, error = %e, "Failed to broadcast event to subscribers");
            }
            return;
        }
        debug!(event_name = name, "Event published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GuardEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
