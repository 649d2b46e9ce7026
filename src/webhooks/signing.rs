//! HMAC-SHA256 webhook signatures.
//!
//! The signature covers the exact raw request body and travels as
//! `sha256=<hex>` in the signature header. Sender and receiver must sign the
//! same bytes; re-serialising a parsed body is not equivalent.

use crate::constants::webhook::SIGNATURE_PREFIX;
use crate::error::{GuardError, GuardResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct WebhookSigner {
    secret: Vec<u8>,
}

impl fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookSigner")
            .field("secret", &"***")
            .finish()
    }
}

impl WebhookSigner {
    /// An empty secret is a configuration error
    pub fn new(secret: impl AsRef<[u8]>) -> GuardResult<Self> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(GuardError::Configuration(
                "webhook signing secret must not be empty".to_string(),
            ));
        }
        Ok(Self {
            secret: secret.to_vec(),
        })
    }

    fn mac(&self) -> GuardResult<HmacSha256> {
        <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .map_err(|e| GuardError::Configuration(format!("invalid signing key: {e}")))
    }

    /// Header value for `body`
    pub fn sign(&self, body: &[u8]) -> GuardResult<String> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(format!(
            "{SIGNATURE_PREFIX}{}",
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Constant-time check of a header value against `body`
    pub fn verify(&self, body: &[u8], header_value: &str) -> GuardResult<()> {
        let hex_signature = header_value
            .trim()
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or_else(|| {
                GuardError::SignatureInvalid(format!("expected '{SIGNATURE_PREFIX}<hex>' format"))
            })?;
        let provided = hex::decode(hex_signature)
            .map_err(|_| GuardError::SignatureInvalid("signature is not valid hex".to_string()))?;

        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| GuardError::SignatureInvalid("signature mismatch".to_string()))
    }
}
