//! JSON-over-HTTP skip-trace provider.
//!
//! Wire contract:
//!
//! ```text
//! POST {base_url}/v1/skip-trace
//! { "address": "...", "city": "...", "state": "OH", "zip": "45402", "name": "..." }
//!
//! 200 { "status": "found",  "contacts": [{ "value": "...", "kind": "phone", "confidence": 0.9 }], "cost_cents": 25 }
//! 200 { "status": "no_hit", "cost_cents": 25, "message": "no owner match" }
//! ```
//!
//! Missing `cost_cents` falls back to the configured per-call price.

use super::{EnrichmentRequest, ProviderAdapter, ProviderCallError, ProviderResponse};
use crate::error::{GuardError, GuardResult};
use crate::models::Contact;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub timeout_ms: u64,
    pub price_per_call_cents: i64,
    #[serde(default = "default_bills_per_attempt")]
    pub bills_per_attempt: bool,
}

fn default_bills_per_attempt() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    status: String,
    #[serde(default)]
    contacts: Vec<Contact>,
    #[serde(default)]
    cost_cents: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    cost_cents: Option<i64>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpSkipTraceProvider {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpSkipTraceProvider {
    pub fn new(config: HttpProviderConfig) -> GuardResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(concat!("enrichment-core/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GuardError::Http(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/skip-trace", self.config.base_url.trim_end_matches('/'))
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ProviderCallError {
        if err.is_timeout() {
            ProviderCallError::Timeout {
                after_ms: self.config.timeout_ms,
            }
        } else {
            ProviderCallError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl ProviderAdapter for HttpSkipTraceProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn bills_per_attempt(&self) -> bool {
        self.config.bills_per_attempt
    }

    fn attempt_cost_cents(&self) -> i64 {
        self.config.price_per_call_cents
    }

    async fn lookup(&self, request: &EnrichmentRequest) -> Result<ProviderResponse, ProviderCallError> {
        let mut builder = self.client.post(self.endpoint()).json(request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        debug!(
            provider = %self.config.name,
            status = status.as_u16(),
            "Provider responded"
        );

        if !status.is_success() {
            let parsed: Option<WireError> = serde_json::from_str(&body).ok();
            let billed_cents = parsed.as_ref().and_then(|e| e.cost_cents);
            let message = parsed
                .and_then(|e| e.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(ProviderCallError::Http {
                status: status.as_u16(),
                message,
                billed_cents,
            });
        }

        let wire: WireResponse = serde_json::from_str(&body)
            .map_err(|e| ProviderCallError::InvalidResponse(e.to_string()))?;
        let cost_cents = wire.cost_cents.unwrap_or(self.config.price_per_call_cents);

        match wire.status.as_str() {
            "found" if !wire.contacts.is_empty() => Ok(ProviderResponse::Found {
                contacts: wire.contacts,
                cost_cents,
            }),
            "found" | "no_hit" => Ok(ProviderResponse::NoHit {
                cost_cents,
                reason: wire.message,
            }),
            other => Err(ProviderCallError::InvalidResponse(format!(
                "unknown status '{other}'"
            ))),
        }
    }
}
