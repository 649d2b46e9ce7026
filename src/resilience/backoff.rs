//! Exponential backoff with proportional jitter, shared by the provider retry
//! loop and the job queue.

use crate::config::{EnrichmentConfig, JobsConfig};
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay as a fraction of the base delay
    pub jitter_factor: f64,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, jitter_factor: f64) -> Self {
        Self {
            base_delay,
            max_delay,
            jitter_factor: jitter_factor.clamp(0.0, 1.0),
        }
    }

    pub fn for_provider_retries(config: &EnrichmentConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_base_delay_ms),
            Duration::from_millis(config.retry_max_delay_ms),
            0.1,
        )
    }

    pub fn for_jobs(config: &JobsConfig) -> Self {
        Self::new(
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
            config.jitter_max_percentage,
        )
    }

    /// Delay without jitter for a 1-based attempt: base * 2^(attempt-1), capped
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(30) as i32;
        self.base_delay
            .mul_f64(2f64.powi(exponent))
            .min(self.max_delay)
    }

    /// Delay before retrying after the given 1-based attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt);
        if self.jitter_factor > 0.0 {
            let jitter = rand::thread_rng().gen_range(0.0..=self.jitter_factor);
            delay.mul_f64(1.0 + jitter).min(self.max_delay)
        } else {
            delay
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5), 0.1)
    }
}
