//! Error types for the enrichment governance layer.
//!
//! Every rejection the layer can produce maps onto one stable taxonomy code
//! (see [`GuardError::code`]) so callers and operators can tell a guardrail
//! rejection apart from a provider failure without string matching.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    /// Caller supplied an invalid request; never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Daily spend cap reached; decided before any network call.
    #[error("Budget exhausted: spent {spent_cents} of {cap_cents} cents today")]
    BudgetExhausted { spent_cents: i64, cap_cents: i64 },

    /// Provider circuit is open at this instant.
    #[error("Circuit breaker open for provider {provider}")]
    CircuitOpen { provider: String },

    /// Timeout, 5xx or 429 from a provider; retried locally with backoff.
    #[error("Transient provider error from {provider}: {reason}")]
    TransientProvider { provider: String, reason: String },

    /// Non-429 4xx from a provider; never retried.
    #[error("Permanent provider error from {provider} (status {status:?}): {reason}")]
    PermanentProvider {
        provider: String,
        status: Option<u16>,
        reason: String,
    },

    /// Job reached `failed_terminal`; requires manual replay.
    #[error("Job {job_id} exhausted its retries after {attempts} attempts")]
    QueueExhaustedRetries { job_id: Uuid, attempts: i32 },

    /// Inbound webhook signature missing or wrong; rejected before any mutation.
    #[error("Signature invalid: {0}")]
    SignatureInvalid(String),

    #[error("Database error: {0}")]
    Database(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Lease lost: {0}")]
    LeaseLost(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GuardError {
    /// Stable snake_case code for the error category.
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::Validation(_) => "validation_error",
            GuardError::BudgetExhausted { .. } => "budget_exhausted",
            GuardError::CircuitOpen { .. } => "circuit_open",
            GuardError::TransientProvider { .. } => "transient_provider_error",
            GuardError::PermanentProvider { .. } => "permanent_provider_error",
            GuardError::QueueExhaustedRetries { .. } => "queue_exhausted_retries",
            GuardError::SignatureInvalid(_) => "signature_invalid",
            GuardError::Database(_) => "database_error",
            GuardError::Configuration(_) => "configuration_error",
            GuardError::Serialization(_) => "serialization_error",
            GuardError::Http(_) => "http_error",
            GuardError::NotFound(_) => "not_found",
            GuardError::LeaseLost(_) => "lease_lost",
            GuardError::Internal(_) => "internal_error",
        }
    }

    /// Only transient provider failures are retried locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GuardError::TransientProvider { .. })
    }

    /// Guardrail rejections are decided before any network call and cost nothing.
    pub fn is_guardrail(&self) -> bool {
        matches!(
            self,
            GuardError::Validation(_)
                | GuardError::BudgetExhausted { .. }
                | GuardError::CircuitOpen { .. }
                | GuardError::SignatureInvalid(_)
        )
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(error: serde_json::Error) -> Self {
        GuardError::Serialization(format!("JSON serialization error: {error}"))
    }
}

impl From<sqlx::Error> for GuardError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => GuardError::NotFound("row not found".to_string()),
            other => GuardError::Database(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for GuardError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        GuardError::Database(format!("Migration failed: {err}"))
    }
}

impl From<reqwest::Error> for GuardError {
    fn from(err: reqwest::Error) -> Self {
        GuardError::Http(err.to_string())
    }
}

impl From<config::ConfigError> for GuardError {
    fn from(err: config::ConfigError) -> Self {
        GuardError::Configuration(err.to_string())
    }
}

pub type GuardResult<T> = Result<T, GuardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_taxonomy_codes() {
        assert_eq!(
            GuardError::Validation("bad zip".into()).code(),
            "validation_error"
        );
        assert_eq!(
            GuardError::BudgetExhausted {
                spent_cents: 1000,
                cap_cents: 1000
            }
            .code(),
            "budget_exhausted"
        );
        assert_eq!(
            GuardError::QueueExhaustedRetries {
                job_id: Uuid::nil(),
                attempts: 3
            }
            .code(),
            "queue_exhausted_retries"
        );
        assert_eq!(
            GuardError::SignatureInvalid("mismatch".into()).code(),
            "signature_invalid"
        );
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let transient = GuardError::TransientProvider {
            provider: "primary".into(),
            reason: "timeout".into(),
        };
        let permanent = GuardError::PermanentProvider {
            provider: "primary".into(),
            status: Some(404),
            reason: "not found".into(),
        };
        assert!(transient.is_retryable());
        assert!(!permanent.is_retryable());
        assert!(!GuardError::CircuitOpen {
            provider: "primary".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_guardrails_are_flagged() {
        assert!(GuardError::BudgetExhausted {
            spent_cents: 0,
            cap_cents: 0
        }
        .is_guardrail());
        assert!(!GuardError::Database("down".into()).is_guardrail());
    }
}
