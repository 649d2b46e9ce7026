//! Verification of inbound provider callbacks.
//!
//! The signature is checked over the raw body before the body is parsed or
//! any state is touched. A missing or wrong signature is a
//! `signature_invalid` rejection with no side effects.

use super::signing::WebhookSigner;
use crate::config::WebhookConfig;
use crate::error::{GuardError, GuardResult};
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use std::future::Future;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct InboundVerifier {
    signer: WebhookSigner,
    header_name: String,
}

impl InboundVerifier {
    pub fn new(signer: WebhookSigner, header_name: impl Into<String>) -> Self {
        Self {
            signer,
            header_name: header_name.into(),
        }
    }

    pub fn from_config(config: &WebhookConfig) -> GuardResult<Self> {
        Ok(Self::new(
            WebhookSigner::new(&config.signing_secret)?,
            config.signature_header.clone(),
        ))
    }

    pub fn verify(&self, headers: &HeaderMap, raw_body: &[u8]) -> GuardResult<()> {
        let header_value = headers
            .get(self.header_name.as_str())
            .ok_or_else(|| {
                GuardError::SignatureInvalid(format!("missing {} header", self.header_name))
            })?
            .to_str()
            .map_err(|_| {
                GuardError::SignatureInvalid(format!("{} header is not ASCII", self.header_name))
            })?;

        self.signer.verify(raw_body, header_value).inspect_err(|e| {
            warn!(header = %self.header_name, error = %e, "Rejected inbound webhook");
        })
    }

    /// Verify, parse, then hand the payload to `apply`. `apply` never runs on a bad signature.
    pub async fn accept<T, R, F, Fut>(
        &self,
        headers: &HeaderMap,
        raw_body: &[u8],
        apply: F,
    ) -> GuardResult<R>
    where
        T: DeserializeOwned,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = GuardResult<R>>,
    {
        self.verify(headers, raw_body)?;
        let payload: T = serde_json::from_slice(raw_body)
            .map_err(|e| GuardError::Validation(format!("malformed webhook body: {e}")))?;
        apply(payload).await
    }
}
