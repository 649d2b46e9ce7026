//! # Resilience Module
//!
//! Admission control and fault isolation for paid, rate-limited providers.
//!
//! ## Architecture
//!
//! - **Token bucket**: bounds steady-state requests per second with bursts up to capacity
//! - **Circuit breakers**: stop calling a provider whose rolling error ratio is too high
//! - **Metrics**: breaker state snapshots for health checks
//! - **Backoff**: exponential delay with jitter for provider and job retries
//!
//! ## Usage
//!
//! ```rust,no_run
//! use enrichment_core::clock::system_clock;
//! use enrichment_core::resilience::{CircuitBreaker, CircuitBreakerConfig, TokenBucket};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let breaker = CircuitBreaker::new("skiptrace", CircuitBreakerConfig::default(), system_clock());
//! let bucket = TokenBucket::per_second(5);
//!
//! if breaker.allow() {
//!     bucket.take(1).await?;
//!     // provider call here
//!     breaker.record(true);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;
pub mod rate_limiter;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerError, CircuitState};
pub use config::{CircuitBreakerConfig, RateLimiterConfig};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
pub use rate_limiter::{BucketSnapshot, TokenBucket};
