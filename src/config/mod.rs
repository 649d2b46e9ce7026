//! # Enrichment Core Configuration
//!
//! Configuration for every guardrail in the layer: rate limit, circuit breaker,
//! daily budget, provider retry policy, job queue, and webhook delivery.
//!
//! ## Sources
//!
//! - **Defaults**: `GuardConfig::default()` mirrors `crate::constants::defaults`
//! - **Environment**: `GuardConfig::from_env()` reads the flat operator-facing names
//!   (`RATE_LIMIT_RPS`, `DAILY_BUDGET_CAP_CENTS`, `WEBHOOK_MAX_ATTEMPTS`, ...)
//! - **Layered**: [`ConfigManager`] merges defaults, an optional file, and
//!   `ENRICHMENT__SECTION__KEY` overrides through the `config` crate
//!
//! ## Usage
//!
//! ```rust,no_run
//! use enrichment_core::config::GuardConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GuardConfig::from_env()?;
//! config.validate()?;
//! println!("daily cap: {} cents", config.budget.daily_cap_cents);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::constants::defaults;
use crate::models::JobType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GuardConfig {
    /// Token bucket admission ceiling
    pub rate_limit: RateLimitConfig,

    /// Per-provider circuit breaker settings
    pub circuit_breaker: CircuitBreakerSettings,

    /// Daily spend cap
    pub budget: BudgetConfig,

    /// Cache and provider retry policy for enrichment calls
    pub enrichment: EnrichmentConfig,

    /// Background job queue settings
    pub jobs: JobsConfig,

    /// Outbound/inbound webhook settings
    pub webhook: WebhookConfig,

    /// Durable store connection
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Bucket capacity, also the refill amount per second
    pub requests_per_second: u32,
    pub refill_tick_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: defaults::RATE_LIMIT_RPS,
            refill_tick_ms: defaults::REFILL_TICK_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    /// Error ratio (0..=1) at or above which the circuit opens
    pub error_rate_threshold: f64,
    /// Outcomes required in the window before the ratio is evaluated
    pub min_samples: u32,
    /// Cooldown before a half-open probe is allowed
    pub half_open_cooldown_ms: u64,
    /// Rolling outcome buffer cap
    pub window_size: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            error_rate_threshold: defaults::BREAKER_ERROR_RATE_THRESHOLD,
            min_samples: defaults::BREAKER_MIN_SAMPLES,
            half_open_cooldown_ms: defaults::BREAKER_HALF_OPEN_MS,
            window_size: defaults::BREAKER_WINDOW_SIZE,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Daily cap in minor currency units; 0 disables the cap
    pub daily_cap_cents: i64,
    /// Fixed offset for the "local day"; `None` uses the host timezone
    pub utc_offset_minutes: Option<i32>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_cap_cents: defaults::DAILY_BUDGET_CAP_CENTS,
            utc_offset_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub cache_ttl_days: u32,
    pub provider_timeout_ms: u64,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            cache_ttl_days: defaults::CACHE_TTL_DAYS,
            provider_timeout_ms: defaults::PROVIDER_TIMEOUT_MS,
            max_retries: defaults::PROVIDER_MAX_RETRIES,
            retry_base_delay_ms: defaults::PROVIDER_RETRY_BASE_MS,
            retry_max_delay_ms: defaults::PROVIDER_RETRY_MAX_MS,
        }
    }
}

impl EnrichmentConfig {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.cache_ttl_days))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    pub default_max_attempts: i32,
    /// Overrides keyed by job type name (`scrape`, `enrich`, `match`, `webhook-deliver`)
    pub max_attempts_by_type: HashMap<String, i32>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub jitter_max_percentage: f64,
    pub poll_interval_ms: u64,
    pub lease_timeout_ms: u64,
    pub completed_retention_hours: u64,
    pub worker_count: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            default_max_attempts: defaults::JOB_MAX_ATTEMPTS,
            max_attempts_by_type: HashMap::new(),
            backoff_base_ms: defaults::JOB_BACKOFF_BASE_MS,
            backoff_max_ms: defaults::JOB_BACKOFF_MAX_MS,
            jitter_max_percentage: defaults::JOB_JITTER_MAX_PERCENTAGE,
            poll_interval_ms: defaults::JOB_POLL_INTERVAL_MS,
            lease_timeout_ms: defaults::JOB_LEASE_TIMEOUT_MS,
            completed_retention_hours: defaults::JOB_COMPLETED_RETENTION_HOURS,
            worker_count: defaults::WORKER_COUNT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub max_attempts: i32,
    pub signing_secret: String,
    pub signature_header: String,
    pub request_timeout_ms: u64,
    /// Where enrichment completion notifications go; unset disables them
    pub completion_url: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: defaults::WEBHOOK_MAX_ATTEMPTS,
            signing_secret: String::new(),
            signature_header: crate::constants::webhook::SIGNATURE_HEADER.to_string(),
            request_timeout_ms: defaults::WEBHOOK_TIMEOUT_MS,
            completion_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// PostgreSQL URL; `None` selects the in-memory stores
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

fn env_parse<T>(variable: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(variable) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigurationError::environment_variable(variable, raw, e)),
        Err(_) => Ok(None),
    }
}

impl GuardConfig {
    /// Build configuration from defaults overridden by environment variables
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(rps) = env_parse("RATE_LIMIT_RPS")? {
            config.rate_limit.requests_per_second = rps;
        }
        if let Some(threshold) = env_parse("BREAKER_ERROR_THRESHOLD")? {
            config.circuit_breaker.error_rate_threshold = threshold;
        }
        if let Some(min_samples) = env_parse("BREAKER_MIN_SAMPLES")? {
            config.circuit_breaker.min_samples = min_samples;
        }
        if let Some(cooldown) = env_parse("BREAKER_HALF_OPEN_MS")? {
            config.circuit_breaker.half_open_cooldown_ms = cooldown;
        }
        if let Some(cap) = env_parse("DAILY_BUDGET_CAP_CENTS")? {
            config.budget.daily_cap_cents = cap;
        }
        if let Some(ttl) = env_parse("CACHE_TTL_DAYS")? {
            config.enrichment.cache_ttl_days = ttl;
        }
        if let Some(timeout) = env_parse("PROVIDER_TIMEOUT_MS")? {
            config.enrichment.provider_timeout_ms = timeout;
        }
        if let Some(attempts) = env_parse("JOB_MAX_ATTEMPTS")? {
            config.jobs.default_max_attempts = attempts;
        }
        for job_type in JobType::ALL {
            let variable = format!(
                "JOB_MAX_ATTEMPTS_{}",
                job_type.as_str().replace('-', "_").to_uppercase()
            );
            if let Some(attempts) = env_parse::<i32>(&variable)? {
                config
                    .jobs
                    .max_attempts_by_type
                    .insert(job_type.as_str().to_string(), attempts);
            }
        }
        if let Some(attempts) = env_parse("WEBHOOK_MAX_ATTEMPTS")? {
            config.webhook.max_attempts = attempts;
        }
        if let Ok(secret) = std::env::var("WEBHOOK_SIGNING_SECRET") {
            config.webhook.signing_secret = secret;
        }
        if let Ok(url) = std::env::var("WEBHOOK_COMPLETION_URL") {
            config.webhook.completion_url = Some(url);
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = Some(url);
        }

        Ok(config)
    }

    /// Max attempts for a job type; webhook deliveries follow `webhook.max_attempts`
    pub fn max_attempts_for(&self, job_type: JobType) -> i32 {
        if let Some(attempts) = self.jobs.max_attempts_by_type.get(job_type.as_str()) {
            return *attempts;
        }
        match job_type {
            JobType::WebhookDeliver => self.webhook.max_attempts,
            _ => self.jobs.default_max_attempts,
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.rate_limit.requests_per_second == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limit.requests_per_second",
                "0",
                "must be greater than 0",
            ));
        }
        if self.rate_limit.refill_tick_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "rate_limit.refill_tick_ms",
                "0",
                "must be greater than 0",
            ));
        }

        let breaker = &self.circuit_breaker;
        if !(0.0..=1.0).contains(&breaker.error_rate_threshold) {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.error_rate_threshold",
                breaker.error_rate_threshold.to_string(),
                "must be within 0..=1",
            ));
        }
        if breaker.min_samples == 0 {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.min_samples",
                "0",
                "must be greater than 0",
            ));
        }
        if breaker.window_size < breaker.min_samples {
            return Err(ConfigurationError::invalid_value(
                "circuit_breaker.window_size",
                breaker.window_size.to_string(),
                "must be at least min_samples",
            ));
        }

        if self.budget.daily_cap_cents < 0 {
            return Err(ConfigurationError::invalid_value(
                "budget.daily_cap_cents",
                self.budget.daily_cap_cents.to_string(),
                "must be 0 (unlimited) or positive",
            ));
        }

        if self.enrichment.provider_timeout_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "enrichment.provider_timeout_ms",
                "0",
                "must be greater than 0",
            ));
        }

        if self.jobs.default_max_attempts < 1 {
            return Err(ConfigurationError::invalid_value(
                "jobs.default_max_attempts",
                self.jobs.default_max_attempts.to_string(),
                "must be at least 1",
            ));
        }
        if let Some((name, attempts)) = self
            .jobs
            .max_attempts_by_type
            .iter()
            .find(|(_, attempts)| **attempts < 1)
        {
            return Err(ConfigurationError::invalid_value(
                format!("jobs.max_attempts_by_type.{name}"),
                attempts.to_string(),
                "must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.jobs.jitter_max_percentage) {
            return Err(ConfigurationError::invalid_value(
                "jobs.jitter_max_percentage",
                self.jobs.jitter_max_percentage.to_string(),
                "must be within 0..=1",
            ));
        }
        if self.jobs.worker_count == 0 {
            return Err(ConfigurationError::invalid_value(
                "jobs.worker_count",
                "0",
                "must be greater than 0",
            ));
        }

        if self.webhook.max_attempts < 1 {
            return Err(ConfigurationError::invalid_value(
                "webhook.max_attempts",
                self.webhook.max_attempts.to_string(),
                "must be at least 1",
            ));
        }
        if self.webhook.completion_url.is_some() && self.webhook.signing_secret.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "webhook.signing_secret",
                "webhook settings (required when completion_url is set)",
            ));
        }

        Ok(())
    }
}
