//! # Circuit Breaker Metrics
//!
//! Point-in-time snapshots of breaker state for dashboards and health checks.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Provider (component) the breaker protects
    pub name: String,

    /// Current circuit breaker state
    pub current_state: CircuitState,

    /// Outcomes currently held in the rolling window
    pub window_total: u64,

    /// Failures currently held in the rolling window
    pub window_failures: u64,

    /// Window error ratio (0.0 to 1.0)
    pub error_ratio: f64,

    /// Lifetime outcomes recorded
    pub total_calls: u64,

    /// Lifetime successes
    pub success_count: u64,

    /// Lifetime failures
    pub failure_count: u64,

    /// Calls refused by `allow()`
    pub rejected_calls: u64,

    /// When the open circuit will admit a probe
    pub next_probe_at: Option<DateTime<Utc>>,

    /// Whether the single half-open probe is outstanding
    pub probe_in_flight: bool,
}

impl CircuitBreakerMetrics {
    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            CircuitState::Closed => self.error_ratio < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Probing provider health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "{}: {} | Window: {}/{} failed ({:.1}%) | Lifetime calls: {} | Rejected: {}",
            self.name,
            self.state_description(),
            self.window_failures,
            self.window_total,
            self.error_ratio * 100.0,
            self.total_calls,
            self.rejected_calls
        )
    }
}

/// Metrics across every provider breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at,
        }
    }

    pub fn add_circuit_breaker(&mut self, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(metrics.name.clone(), metrics);
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Names of breakers that are not healthy, sorted
    pub fn unhealthy(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .circuit_breakers
            .values()
            .filter(|m| !m.is_healthy())
            .map(|m| m.name.clone())
            .collect();
        names.sort();
        names
    }
}
