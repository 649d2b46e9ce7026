//! Outbound webhook delivery as a `webhook-deliver` job.
//!
//! The payload carries the exact body text that is signed and sent, so every
//! retry delivers identical bytes under an identical signature. Any non-2xx
//! status or transport error fails the attempt and feeds the job retry policy;
//! every attempt is appended to the [`DeliveryLog`].

use super::signing::WebhookSigner;
use crate::clock::SharedClock;
use crate::config::WebhookConfig;
use crate::constants::webhook::{ATTEMPT_HEADER, DELIVERY_HEADER, EVENT_HEADER};
use crate::error::{GuardError, GuardResult};
use crate::events::{EventPublisher, GuardEvent};
use crate::jobs::{JobError, JobHandler, JobQueue};
use crate::models::{Job, JobType, WebhookDeliveryAttempt};
use crate::store::DeliveryLog;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

/// Job payload for a `webhook-deliver` job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookJobPayload {
    pub url: String,
    pub event: String,
    /// Raw JSON text; signed and sent verbatim
    pub body: String,
}

/// Enqueue a signed delivery of `body` to `url`
pub async fn enqueue_delivery<B: Serialize>(
    queue: &JobQueue,
    url: &str,
    event: &str,
    body: &B,
) -> GuardResult<Uuid> {
    let payload = WebhookJobPayload {
        url: url.to_string(),
        event: event.to_string(),
        body: serde_json::to_string(body)?,
    };
    queue
        .enqueue(JobType::WebhookDeliver, serde_json::to_value(&payload)?)
        .await
}

#[derive(Debug, Clone)]
pub struct WebhookDeliveryHandler {
    client: Client,
    signer: WebhookSigner,
    signature_header: String,
    log: Arc<dyn DeliveryLog>,
    clock: SharedClock,
    events: Option<EventPublisher>,
}

impl WebhookDeliveryHandler {
    pub fn new(
        config: &WebhookConfig,
        log: Arc<dyn DeliveryLog>,
        clock: SharedClock,
    ) -> GuardResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .user_agent(concat!("enrichment-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GuardError::Http(format!("Failed to build webhook client: {e}")))?;

        Ok(Self {
            client,
            signer: WebhookSigner::new(&config.signing_secret)?,
            signature_header: config.signature_header.clone(),
            log,
            clock,
            events: None,
        })
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Every recorded attempt for a delivery job, oldest first
    pub async fn delivery_history(&self, job_id: Uuid) -> GuardResult<Vec<WebhookDeliveryAttempt>> {
        self.log.attempts_for_job(job_id).await
    }

    async fn record(&self, attempt: &WebhookDeliveryAttempt) -> Result<(), JobError> {
        self.log
            .record(attempt)
            .await
            .map_err(|e| JobError::retryable(format!("failed to record delivery attempt: {e}")))
    }
}

#[async_trait]
impl JobHandler for WebhookDeliveryHandler {
    fn job_type(&self) -> JobType {
        JobType::WebhookDeliver
    }

    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: WebhookJobPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::permanent(format!("invalid webhook payload: {e}")))?;
        let signature = self
            .signer
            .sign(payload.body.as_bytes())
            .map_err(|e| JobError::permanent(e.to_string()))?;

        let started = Instant::now();
        let result = self
            .client
            .post(&payload.url)
            .header(CONTENT_TYPE, "application/json")
            .header(self.signature_header.as_str(), signature)
            .header(EVENT_HEADER, payload.event.as_str())
            .header(DELIVERY_HEADER, job.id.to_string())
            .header(ATTEMPT_HEADER, job.attempts.to_string())
            .body(payload.body.clone())
            .send()
            .await;
        let duration_ms = started.elapsed().as_millis() as i64;

        let mut attempt = WebhookDeliveryAttempt {
            id: Uuid::new_v4(),
            job_id: job.id,
            url: payload.url.clone(),
            attempt_number: job.attempts,
            http_status: None,
            network_error: None,
            duration_ms,
            created_at: self.clock.now(),
        };

        match result {
            Ok(response) => {
                let status = response.status();
                attempt.http_status = Some(status.as_u16());
                self.record(&attempt).await?;

                if !status.is_success() {
                    warn!(
                        job_id = %job.id,
                        url = %payload.url,
                        attempt = job.attempts,
                        http_status = status.as_u16(),
                        "Webhook endpoint rejected delivery"
                    );
                    return Err(JobError::retryable(format!("HTTP {}", status.as_u16())));
                }

                info!(
                    job_id = %job.id,
                    url = %payload.url,
                    attempt = job.attempts,
                    http_status = status.as_u16(),
                    duration_ms = duration_ms,
                    "Webhook delivered"
                );
                if let Some(events) = &self.events {
                    events.publish(GuardEvent::WebhookDelivered {
                        job_id: job.id,
                        url: payload.url,
                        attempt_number: job.attempts,
                        http_status: status.as_u16(),
                    });
                }
                Ok(())
            }
            Err(e) => {
                attempt.network_error = Some(e.to_string());
                self.record(&attempt).await?;
                warn!(
                    job_id = %job.id,
                    url = %payload.url,
                    attempt = job.attempts,
                    error = %e,
                    "Webhook delivery failed before a response"
                );
                Err(JobError::retryable(format!("network error: {e}")))
            }
        }
    }
}
