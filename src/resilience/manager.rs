//! # Circuit Breaker Manager
//!
//! One breaker per provider, created lazily from shared configuration.
//! Provides centralized control and metrics aggregation.

use crate::clock::SharedClock;
use crate::events::EventPublisher;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Manager for the circuit breakers of every provider
#[derive(Debug)]
pub struct CircuitBreakerManager {
    /// Collection of circuit breakers by provider name
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    /// Configuration shared by every breaker
    config: CircuitBreakerConfig,

    clock: SharedClock,

    events: Option<EventPublisher>,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        info!(
            error_rate_threshold = config.error_rate_threshold,
            min_samples = config.min_samples,
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            config,
            clock,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Get or create circuit breaker for a provider
    pub async fn get_circuit_breaker(&self, provider: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read().await;
            if let Some(breaker) = breakers.get(provider) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write().await;

        // Double-check pattern (another task might have created it)
        if let Some(breaker) = breakers.get(provider) {
            return Arc::clone(breaker);
        }

        let mut breaker = CircuitBreaker::new(provider, self.config.clone(), self.clock.clone());
        if let Some(events) = &self.events {
            breaker = breaker.with_events(events.clone());
        }
        let breaker = Arc::new(breaker);

        breakers.insert(provider.to_string(), Arc::clone(&breaker));

        info!(
            provider = provider,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Get all provider names with a breaker
    pub async fn list_components(&self) -> Vec<String> {
        let breakers = self.circuit_breakers.read().await;
        let mut names: Vec<String> = breakers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get metrics for a specific circuit breaker
    pub async fn get_component_metrics(&self, provider: &str) -> Option<CircuitBreakerMetrics> {
        let breakers = self.circuit_breakers.read().await;
        breakers.get(provider).map(|breaker| breaker.metrics())
    }

    /// Get system-wide circuit breaker metrics
    pub async fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let breakers = self.circuit_breakers.read().await;
        let mut system = SystemCircuitBreakerMetrics::new(self.clock.now());
        for breaker in breakers.values() {
            system.add_circuit_breaker(breaker.metrics());
        }
        system
    }

    /// Force every circuit breaker open
    pub async fn force_all_open(&self) {
        warn!("Forcing all circuit breakers open");
        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_open();
        }
    }

    /// Force every circuit breaker closed
    pub async fn force_all_closed(&self) {
        warn!("Forcing all circuit breakers closed");
        let breakers = self.circuit_breakers.read().await;
        for breaker in breakers.values() {
            breaker.force_closed();
        }
    }
}
