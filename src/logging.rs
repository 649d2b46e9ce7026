//! # Structured Logging Module
//!
//! Environment-aware structured logging via `tracing`. Console output is
//! human-readable by default; `LOG_FORMAT=json` switches to one JSON object per
//! line for log shipping. `RUST_LOG` always wins over the environment default.

use crate::config::ConfigManager;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = ConfigManager::detect_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A host application may already own the global subscriber
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "🔧 STRUCTURED LOGGING: Initialized"
        );
    });
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log one completed provider attempt
pub fn log_provider_call(
    provider: &str,
    request_key: &str,
    outcome: &str,
    cost_cents: i64,
    attempt: u32,
    details: Option<&str>,
) {
    tracing::info!(
        provider = %provider,
        request_key = %request_key,
        outcome = %outcome,
        cost_cents = cost_cents,
        attempt = attempt,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "📞 PROVIDER_CALL"
    );
}

/// Log a job lifecycle transition
pub fn log_job_operation(
    operation: &str,
    job_id: &uuid::Uuid,
    job_type: &str,
    attempts: i32,
    status: &str,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        job_type = %job_type,
        attempts = attempts,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "🧰 JOB_OPERATION"
    );
}

/// Log a budget movement or cap decision
pub fn log_budget_event(operation: &str, spent_cents: i64, cap_cents: i64, delta_cents: i64) {
    tracing::info!(
        operation = %operation,
        spent_cents = spent_cents,
        cap_cents = cap_cents,
        delta_cents = delta_cents,
        timestamp = %Utc::now().to_rfc3339(),
        "💰 BUDGET"
    );
}
