//! # Resilience Configuration
//!
//! Per-instance configuration for circuit breakers and the token bucket, with
//! validation. System-wide settings live in [`crate::config::GuardConfig`];
//! the `From` impls below derive instance configs from it.

use crate::config::{CircuitBreakerSettings, RateLimitConfig};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a single rolling-window circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Error ratio (0.0 - 1.0) at or above which the circuit opens
    pub error_rate_threshold: f64,

    /// Outcomes required in the window before the ratio is evaluated
    pub min_samples: u32,

    /// Time to wait in open state before a single probe is allowed
    pub half_open_cooldown: Duration,

    /// Maximum outcomes retained; oldest evicted first
    pub window_size: u32,
}

impl CircuitBreakerConfig {
    /// Paid skip-trace lookups: trip on 30% errors over at least 30 calls
    pub fn for_skip_trace() -> Self {
        Self {
            error_rate_threshold: 0.3,
            min_samples: 30,
            half_open_cooldown: Duration::from_secs(60),
            window_size: 100,
        }
    }

    /// Property-data enrichment tolerates a noisier upstream
    pub fn for_property_data() -> Self {
        Self {
            error_rate_threshold: 0.5,
            min_samples: 20,
            half_open_cooldown: Duration::from_secs(30),
            window_size: 50,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.error_rate_threshold) {
            return Err("error_rate_threshold must be within 0.0..=1.0".to_string());
        }

        if self.min_samples == 0 {
            return Err("min_samples must be greater than 0".to_string());
        }

        if self.window_size < self.min_samples {
            return Err("window_size must be at least min_samples".to_string());
        }

        if self.half_open_cooldown.is_zero() {
            return Err("half_open_cooldown must be greater than 0".to_string());
        }

        if self.half_open_cooldown > Duration::from_secs(3600) {
            return Err("half_open_cooldown should not exceed one hour".to_string());
        }

        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::for_skip_trace()
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            error_rate_threshold: settings.error_rate_threshold,
            min_samples: settings.min_samples,
            half_open_cooldown: Duration::from_millis(settings.half_open_cooldown_ms),
            window_size: settings.window_size,
        }
    }
}

/// Token bucket configuration; capacity equals refill per second
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    pub requests_per_second: u32,
    pub tick_interval: Duration,
}

impl RateLimiterConfig {
    pub fn per_second(requests_per_second: u32) -> Self {
        Self {
            requests_per_second,
            tick_interval: Duration::from_secs(1),
        }
    }

    /// Thousandths of a token added per tick. A tick of `t` ms at `r` rps adds
    /// `r * t` milli-tokens, so a second of ticks never exceeds `r` tokens.
    pub fn refill_millitokens_per_tick(&self) -> u64 {
        let tick_ms = u64::try_from(self.tick_interval.as_millis()).unwrap_or(u64::MAX);
        u64::from(self.requests_per_second).saturating_mul(tick_ms)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.requests_per_second == 0 {
            return Err("requests_per_second must be greater than 0".to_string());
        }
        if self.tick_interval.is_zero() {
            return Err("tick_interval must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl From<&RateLimitConfig> for RateLimiterConfig {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            requests_per_second: config.requests_per_second,
            tick_interval: Duration::from_millis(config.refill_tick_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_breaker_config_validation() {
        let valid_config = CircuitBreakerConfig::default();
        assert!(valid_config.validate().is_ok());

        let mut invalid_config = CircuitBreakerConfig {
            error_rate_threshold: 1.2,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            min_samples: 0,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            half_open_cooldown: Duration::ZERO,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());

        invalid_config = CircuitBreakerConfig {
            min_samples: 50,
            window_size: 20,
            ..Default::default()
        };
        assert!(invalid_config.validate().is_err());
    }

    #[test]
    fn test_preset_configurations() {
        let skip_trace = CircuitBreakerConfig::for_skip_trace();
        assert_eq!(skip_trace.min_samples, 30);
        assert!(skip_trace.validate().is_ok());

        let property = CircuitBreakerConfig::for_property_data();
        assert!(property.validate().is_ok());
    }

    #[test]
    fn test_refill_scales_with_interval() {
        let per_second = RateLimiterConfig::per_second(10);
        assert_eq!(per_second.refill_millitokens_per_tick(), 10_000);

        let fast_tick = RateLimiterConfig {
            requests_per_second: 3,
            tick_interval: Duration::from_millis(100),
        };
        assert_eq!(fast_tick.refill_millitokens_per_tick(), 300);
    }
}
