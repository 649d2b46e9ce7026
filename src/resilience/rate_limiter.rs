//! # Token Bucket
//!
//! Admission control under a requests-per-second ceiling. Capacity equals the
//! per-second refill, so bursts are bounded by one second of throughput.
//!
//! Refill is a logical [`TokenBucket::tick`]; production wiring drives it from
//! [`TokenBucket::spawn_refill`], tests call `tick()` directly.
//!
//! The balance is kept in thousandths of a token so sub-second ticks carry
//! their fractional refill forward instead of rounding it up.

use crate::error::{GuardError, GuardResult};
use crate::resilience::config::RateLimiterConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Observability view of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSnapshot {
    pub capacity: u32,
    pub tokens: u32,
    pub refill_per_sec: u32,
}

const MILLIS_PER_TOKEN: u64 = 1_000;

#[derive(Debug)]
pub struct TokenBucket {
    capacity: u32,
    refill_millis_per_tick: u64,
    refill_per_sec: u32,
    tick_interval: Duration,
    /// Balance in milli-tokens
    balance: Mutex<u64>,
    refilled: Notify,
}

impl TokenBucket {
    /// Bucket starts full
    pub fn new(config: &RateLimiterConfig) -> Self {
        let capacity = config.requests_per_second.max(1);
        Self {
            capacity,
            refill_millis_per_tick: config.refill_millitokens_per_tick(),
            refill_per_sec: capacity,
            tick_interval: config.tick_interval,
            balance: Mutex::new(u64::from(capacity) * MILLIS_PER_TOKEN),
            refilled: Notify::new(),
        }
    }

    pub fn per_second(requests_per_second: u32) -> Self {
        Self::new(&RateLimiterConfig::per_second(requests_per_second))
    }

    /// Suspend until `n` tokens are available, then debit them.
    ///
    /// Requests larger than the capacity could never be satisfied and are
    /// rejected up front.
    pub async fn take(&self, n: u32) -> GuardResult<()> {
        if n > self.capacity {
            return Err(GuardError::Validation(format!(
                "requested {n} tokens from a bucket with capacity {}",
                self.capacity
            )));
        }

        loop {
            // Register interest before checking so a tick between the check
            // and the await is not missed.
            let refilled = self.refilled.notified();
            if self.try_take(n) {
                return Ok(());
            }
            debug!(requested = n, "Rate limiter waiting for refill");
            refilled.await;
        }
    }

    /// Debit `n` tokens if available without waiting
    pub fn try_take(&self, n: u32) -> bool {
        let cost = u64::from(n) * MILLIS_PER_TOKEN;
        let mut balance = self.balance.lock();
        if *balance >= cost {
            *balance -= cost;
            true
        } else {
            false
        }
    }

    /// Add one tick worth of tokens, clamped to capacity, and wake waiters
    pub fn tick(&self) {
        {
            let mut balance = self.balance.lock();
            *balance = balance
                .saturating_add(self.refill_millis_per_tick)
                .min(self.capacity_millis());
        }
        self.refilled.notify_waiters();
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        BucketSnapshot {
            capacity: self.capacity,
            tokens: (*self.balance.lock() / MILLIS_PER_TOKEN) as u32,
            refill_per_sec: self.refill_per_sec,
        }
    }

    fn capacity_millis(&self) -> u64 {
        u64::from(self.capacity) * MILLIS_PER_TOKEN
    }

    /// Drive `tick()` from a tokio interval until the handle is aborted
    pub fn spawn_refill(self: &Arc<Self>) -> JoinHandle<()> {
        let bucket = Arc::clone(self);
        let period = self.tick_interval;
        info!(
            capacity = self.capacity,
            tick_ms = period.as_millis() as u64,
            "Starting token bucket refill"
        );
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // First tick completes immediately; the bucket already starts full
            interval.tick().await;
            loop {
                interval.tick().await;
                bucket.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::poll;
    use proptest::prelude::*;

    #[tokio::test]
    async fn test_capacity_takes_are_immediate_then_waits_for_tick() {
        let bucket = TokenBucket::per_second(3);

        for _ in 0..3 {
            let fut = bucket.take(1);
            tokio::pin!(fut);
            assert!(poll!(fut.as_mut()).is_ready());
        }

        let fourth = bucket.take(1);
        tokio::pin!(fourth);
        assert!(poll!(fourth.as_mut()).is_pending());
        assert!(poll!(fourth.as_mut()).is_pending());

        bucket.tick();
        assert!(fourth.await.is_ok());
        assert_eq!(bucket.snapshot().tokens, 2);
    }

    #[tokio::test]
    async fn test_take_more_than_capacity_is_rejected() {
        let bucket = TokenBucket::per_second(2);
        let err = bucket.take(3).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_tick_clamps_to_capacity() {
        let bucket = TokenBucket::per_second(5);
        bucket.tick();
        bucket.tick();
        assert_eq!(
            bucket.snapshot(),
            BucketSnapshot {
                capacity: 5,
                tokens: 5,
                refill_per_sec: 5
            }
        );
    }

    #[test]
    fn test_sub_second_ticks_never_exceed_rate() {
        let bucket = TokenBucket::new(&RateLimiterConfig {
            requests_per_second: 3,
            tick_interval: Duration::from_millis(100),
        });
        while bucket.try_take(1) {}

        let mut granted = 0;
        for _ in 0..10 {
            bucket.tick();
            while bucket.try_take(1) {
                granted += 1;
            }
        }
        assert_eq!(granted, 3, "one second of 100ms ticks at 3 rps");

        // fractional refill carries over between seconds
        let mut granted = 0;
        for _ in 0..20 {
            bucket.tick();
            while bucket.try_take(1) {
                granted += 1;
            }
        }
        assert_eq!(granted, 6);
    }

    #[test]
    fn test_partial_refill_is_not_visible_as_a_token() {
        let bucket = TokenBucket::new(&RateLimiterConfig {
            requests_per_second: 2,
            tick_interval: Duration::from_millis(250),
        });
        assert!(bucket.try_take(2));
        bucket.tick();
        assert_eq!(bucket.snapshot().tokens, 0);
        assert!(!bucket.try_take(1));
        bucket.tick();
        assert_eq!(bucket.snapshot().tokens, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_refill_releases_waiter() {
        let bucket = Arc::new(TokenBucket::per_second(1));
        assert!(bucket.try_take(1));

        let handle = bucket.spawn_refill();
        tokio::time::timeout(Duration::from_secs(5), bucket.take(1))
            .await
            .expect("refill should release the waiter")
            .unwrap();
        handle.abort();
    }

    proptest! {
        #[test]
        fn test_tokens_stay_within_bounds(
            capacity in 1u32..20,
            ops in proptest::collection::vec((any::<bool>(), 1u32..25), 0..60)
        ) {
            let bucket = TokenBucket::per_second(capacity);
            for (is_tick, n) in ops {
                if is_tick {
                    bucket.tick();
                } else {
                    let before = bucket.snapshot().tokens;
                    let taken = bucket.try_take(n);
                    prop_assert_eq!(taken, before >= n);
                }
                let snapshot = bucket.snapshot();
                prop_assert!(snapshot.tokens <= snapshot.capacity);
            }
        }
    }
}
