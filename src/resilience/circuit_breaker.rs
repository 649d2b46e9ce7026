//! # Circuit Breaker Implementation
//!
//! Rolling error-ratio circuit breaker guarding one provider. Three states:
//! Closed (normal operation), Open (failing fast) and Half-Open (one probe
//! testing recovery).
//!
//! The breaker keeps a bounded FIFO buffer of recent outcomes. While closed, a
//! failure that leaves the buffer with at least `min_samples` outcomes and an
//! error ratio at or above `error_rate_threshold` opens the circuit. Once the
//! cooldown elapses exactly one caller is admitted as a probe; its outcome
//! either closes the circuit (clearing the buffer) or re-opens it.

use crate::clock::SharedClock;
use crate::events::{EventPublisher, GuardEvent};
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Lock-free lifetime counters; the rolling window lives under the mutex.
#[derive(Debug, Default)]
struct LifetimeCounters {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_calls: AtomicU64,
}

impl LifetimeCounters {
    #[inline]
    fn record(&self, success: bool) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failure_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    fn reject(&self) {
        self.rejected_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast until the next probe time
    Open,
    /// Testing recovery - a single probe call is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    outcomes: VecDeque<bool>,
    failures_in_window: usize,
    next_probe_at: Option<DateTime<Utc>>,
    probe_in_flight: bool,
    probe_started_at: Option<DateTime<Utc>>,
}

impl BreakerInner {
    fn new(window_size: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            outcomes: VecDeque::with_capacity(window_size),
            failures_in_window: 0,
            next_probe_at: None,
            probe_in_flight: false,
            probe_started_at: None,
        }
    }

    fn push_outcome(&mut self, success: bool, cap: usize) {
        if self.outcomes.len() >= cap {
            if let Some(evicted) = self.outcomes.pop_front() {
                if !evicted {
                    self.failures_in_window -= 1;
                }
            }
        }
        self.outcomes.push_back(success);
        if !success {
            self.failures_in_window += 1;
        }
    }

    fn clear_window(&mut self) {
        self.outcomes.clear();
        self.failures_in_window = 0;
    }

    fn clear_probe(&mut self) {
        self.probe_in_flight = false;
        self.probe_started_at = None;
    }

    fn error_ratio(&self) -> f64 {
        if self.outcomes.is_empty() {
            0.0
        } else {
            self.failures_in_window as f64 / self.outcomes.len() as f64
        }
    }
}

/// Rolling-window circuit breaker with a single half-open probe
pub struct CircuitBreaker {
    /// Provider name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    clock: SharedClock,

    inner: Mutex<BreakerInner>,

    counters: LifetimeCounters,

    events: Option<EventPublisher>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig, clock: SharedClock) -> Self {
        let name = name.into();
        info!(
            component = %name,
            error_rate_threshold = config.error_rate_threshold,
            min_samples = config.min_samples,
            half_open_cooldown_ms = config.half_open_cooldown.as_millis() as u64,
            window_size = config.window_size,
            "Circuit breaker initialized"
        );

        let window = config.window_size.max(1) as usize;
        Self {
            name,
            config,
            clock,
            inner: Mutex::new(BreakerInner::new(window)),
            counters: LifetimeCounters::default(),
            events: None,
        }
    }

    /// Publish state transitions on the given event bus
    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Admission check. In half-open state at most one caller receives `true`
    /// until the probe outcome is recorded.
    pub fn allow(&self) -> bool {
        let now = self.clock.now();
        let mut transition = None;

        let allowed = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => true,
                CircuitState::Open => match inner.next_probe_at {
                    Some(probe_at) if now >= probe_at => {
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        inner.probe_started_at = Some(now);
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        true
                    }
                    Some(_) => false,
                    None => {
                        warn!(component = %self.name, "Circuit open but no probe time recorded");
                        inner.state = CircuitState::HalfOpen;
                        inner.probe_in_flight = true;
                        inner.probe_started_at = Some(now);
                        transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                        true
                    }
                },
                CircuitState::HalfOpen => {
                    if !inner.probe_in_flight || self.probe_is_stale(&inner, now) {
                        if inner.probe_in_flight {
                            warn!(component = %self.name, "Half-open probe never resolved, admitting a new probe");
                        }
                        inner.probe_in_flight = true;
                        inner.probe_started_at = Some(now);
                        true
                    } else {
                        false
                    }
                }
            }
        };

        if !allowed {
            self.counters.reject();
            debug!(component = %self.name, "Circuit breaker rejected call");
        }
        if let Some((from, to)) = transition {
            self.announce(from, to, now);
        }
        allowed
    }

    /// Record the outcome of an admitted call
    pub fn record(&self, success: bool) {
        self.counters.record(success);
        let now = self.clock.now();
        let cap = self.config.window_size.max(1) as usize;
        let mut transition = None;

        {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => {
                    inner.push_outcome(success, cap);
                    if !success && self.should_trip(&inner) {
                        let ratio = inner.error_ratio();
                        self.open(&mut inner, now);
                        transition = Some((CircuitState::Closed, CircuitState::Open));
                        warn!(
                            component = %self.name,
                            error_ratio = ratio,
                            window_total = inner.outcomes.len(),
                            "Circuit breaker opened (failing fast)"
                        );
                    }
                }
                CircuitState::HalfOpen => {
                    inner.clear_probe();
                    if success {
                        inner.state = CircuitState::Closed;
                        inner.next_probe_at = None;
                        inner.clear_window();
                        transition = Some((CircuitState::HalfOpen, CircuitState::Closed));
                        info!(component = %self.name, "Circuit breaker closed (recovered)");
                    } else {
                        self.open(&mut inner, now);
                        transition = Some((CircuitState::HalfOpen, CircuitState::Open));
                        warn!(component = %self.name, "Half-open probe failed, circuit re-opened");
                    }
                }
                CircuitState::Open => {
                    // Late result from a call admitted before the circuit opened
                    debug!(component = %self.name, success, "Outcome recorded while circuit is open");
                }
            }
        }

        if let Some((from, to)) = transition {
            self.announce(from, to, now);
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !self.allow() {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        }

        let result = operation().await;
        self.record(result.is_ok());
        result.map_err(CircuitBreakerError::OperationFailed)
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        let now = self.clock.now();
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.clear_probe();
            self.open(&mut inner, now);
            from
        };
        if from != CircuitState::Open {
            self.announce(from, CircuitState::Open, now);
        }
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        let now = self.clock.now();
        let from = {
            let mut inner = self.inner.lock();
            let from = inner.state;
            inner.state = CircuitState::Closed;
            inner.next_probe_at = None;
            inner.clear_probe();
            inner.clear_window();
            from
        };
        if from != CircuitState::Closed {
            self.announce(from, CircuitState::Closed, now);
        }
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            name: self.name.clone(),
            current_state: inner.state,
            window_total: inner.outcomes.len() as u64,
            window_failures: inner.failures_in_window as u64,
            error_ratio: inner.error_ratio(),
            total_calls: self.counters.total_calls.load(Ordering::Relaxed),
            success_count: self.counters.success_count.load(Ordering::Relaxed),
            failure_count: self.counters.failure_count.load(Ordering::Relaxed),
            rejected_calls: self.counters.rejected_calls.load(Ordering::Relaxed),
            next_probe_at: inner.next_probe_at,
            probe_in_flight: inner.probe_in_flight,
        }
    }

    /// Get component name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// When the open circuit will admit its next probe
    pub fn next_probe_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().next_probe_at
    }

    fn should_trip(&self, inner: &BreakerInner) -> bool {
        inner.outcomes.len() >= self.config.min_samples as usize
            && inner.error_ratio() >= self.config.error_rate_threshold
    }

    fn open(&self, inner: &mut BreakerInner, now: DateTime<Utc>) {
        inner.state = CircuitState::Open;
        inner.next_probe_at = Some(now + self.cooldown());
    }

    /// A probe outstanding for longer than a full cooldown is treated as lost
    fn probe_is_stale(&self, inner: &BreakerInner, now: DateTime<Utc>) -> bool {
        inner
            .probe_started_at
            .is_some_and(|started| now - started >= self.cooldown())
    }

    fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.half_open_cooldown)
            .unwrap_or_else(|_| chrono::Duration::seconds(60))
    }

    fn announce(&self, from: CircuitState, to: CircuitState, at: DateTime<Utc>) {
        if let Some(events) = &self.events {
            events.publish(GuardEvent::CircuitStateChanged {
                provider: self.name.clone(),
                from,
                to,
                at,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use std::sync::Arc;
    use std::time::Duration;

    fn breaker(clock: Arc<ManualClock>) -> CircuitBreaker {
        let config = CircuitBreakerConfig {
            error_rate_threshold: 0.3,
            min_samples: 30,
            half_open_cooldown: Duration::from_millis(60_000),
            window_size: 100,
        };
        CircuitBreaker::new("skiptrace-primary", config, clock)
    }

    fn feed(cb: &CircuitBreaker, successes: usize, failures: usize) {
        for _ in 0..successes {
            cb.record(true);
        }
        for _ in 0..failures {
            cb.record(false);
        }
    }

    #[test]
    fn test_circuit_breaker_starts_closed() {
        let cb = breaker(Arc::new(ManualClock::starting_now()));
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.allow());
    }

    #[test]
    fn test_opens_at_threshold_after_min_samples() {
        let clock = Arc::new(ManualClock::starting_now());
        let cb = breaker(clock.clone());

        feed(&cb, 21, 8);
        assert_eq!(cb.state(), CircuitState::Closed, "29 samples is below min_samples");

        cb.record(false);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow());

        let expected_probe = clock.now() + chrono::Duration::milliseconds(60_000);
        assert_eq!(cb.next_probe_at(), Some(expected_probe));
    }

    #[test]
    fn test_failures_below_min_samples_never_open() {
        let cb = breaker(Arc::new(ManualClock::starting_now()));
        feed(&cb, 0, 29);
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_low_error_ratio_stays_closed() {
        let cb = breaker(Arc::new(ManualClock::starting_now()));
        feed(&cb, 22, 8);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(cb.metrics().error_ratio < 0.3);
    }

    #[test]
    fn test_half_open_admits_exactly_one_probe() {
        let clock = Arc::new(ManualClock::starting_now());
        let cb = breaker(clock.clone());
        feed(&cb, 21, 9);
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance_ms(59_999);
        assert!(!cb.allow());

        clock.advance_ms(1);
        assert!(cb.allow(), "first caller after cooldown is the probe");
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.allow());
        assert!(!cb.allow());

        cb.record(true);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.metrics().window_total, 0, "buffer cleared on recovery");
        assert!(cb.allow());
    }

    #[test]
    fn test_failed_probe_reopens_with_new_probe_time() {
        let clock = Arc::new(ManualClock::starting_now());
        let cb = breaker(clock.clone());
        feed(&cb, 0, 30);

        clock.advance_ms(60_000);
        assert!(cb.allow());
        cb.record(false);

        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.metrics().probe_in_flight);
        assert_eq!(
            cb.next_probe_at(),
            Some(clock.now() + chrono::Duration::milliseconds(60_000))
        );
        assert!(!cb.allow());
    }

    #[test]
    fn test_window_evicts_oldest_outcomes() {
        let config = CircuitBreakerConfig {
            error_rate_threshold: 0.5,
            min_samples: 4,
            half_open_cooldown: Duration::from_secs(1),
            window_size: 4,
        };
        let cb = CircuitBreaker::new("p", config, Arc::new(ManualClock::starting_now()));

        feed(&cb, 0, 1);
        feed(&cb, 6, 0);
        let metrics = cb.metrics();
        assert_eq!(metrics.window_total, 4);
        assert_eq!(metrics.window_failures, 0);
        assert_eq!(metrics.total_calls, 7);
    }

    #[test]
    fn test_stale_probe_is_replaced() {
        let clock = Arc::new(ManualClock::starting_now());
        let cb = breaker(clock.clone());
        cb.force_open();

        clock.advance_ms(60_000);
        assert!(cb.allow());
        assert!(!cb.allow());

        clock.advance_ms(60_000);
        assert!(cb.allow(), "probe outstanding for a full cooldown is abandoned");
    }

    #[tokio::test]
    async fn test_call_rejects_when_open() {
        let cb = breaker(Arc::new(ManualClock::starting_now()));
        cb.force_open();

        let result: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::CircuitOpen { .. })));
        assert_eq!(cb.metrics().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_transitions_are_published() {
        let clock = Arc::new(ManualClock::starting_now());
        let events = EventPublisher::new();
        let mut rx = events.subscribe();
        let cb = breaker(clock.clone()).with_events(events);

        feed(&cb, 0, 30);
        match rx.recv().await.unwrap() {
            GuardEvent::CircuitStateChanged { provider, from, to, .. } => {
                assert_eq!(provider, "skiptrace-primary");
                assert_eq!(from, CircuitState::Closed);
                assert_eq!(to, CircuitState::Open);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
