//! # Budget Tracker
//!
//! Hard daily spend ceiling in integer cents.
//!
//! The in-memory counter is a cache over the [`CallLedger`]: construction and
//! [`BudgetTracker::reset`] re-sum today's ledger rows, so the cap holds across
//! restarts and across processes sharing the ledger. "Today" is the local
//! calendar day, either the host's time zone or a configured fixed offset.
//!
//! A cap of `0` disables the ceiling.

use crate::clock::SharedClock;
use crate::config::BudgetConfig;
use crate::error::{GuardError, GuardResult};
use crate::events::{EventPublisher, GuardEvent};
use crate::logging::log_budget_event;
use crate::store::CallLedger;
use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Which calendar defines "today"
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayBoundary {
    /// Host time zone
    Local,
    Fixed(FixedOffset),
}

impl DayBoundary {
    pub fn from_config(config: &BudgetConfig) -> GuardResult<Self> {
        match config.utc_offset_minutes {
            None => Ok(DayBoundary::Local),
            Some(minutes) => FixedOffset::east_opt(minutes * 60)
                .map(DayBoundary::Fixed)
                .ok_or_else(|| {
                    GuardError::Configuration(format!("utc_offset_minutes {minutes} is out of range"))
                }),
        }
    }

    /// The local day containing `now` and its `[start, end)` bounds in UTC
    pub fn day_bounds(&self, now: DateTime<Utc>) -> (NaiveDate, DateTime<Utc>, DateTime<Utc>) {
        match self {
            DayBoundary::Local => local_day_bounds(&Local, now),
            DayBoundary::Fixed(offset) => local_day_bounds(offset, now),
        }
    }
}

fn local_day_bounds<Tz: TimeZone>(
    tz: &Tz,
    now: DateTime<Utc>,
) -> (NaiveDate, DateTime<Utc>, DateTime<Utc>) {
    let day = now.with_timezone(tz).date_naive();
    let start = local_midnight(tz, day);
    let end = day
        .succ_opt()
        .map(|next| local_midnight(tz, next))
        .unwrap_or(start + Duration::days(1));
    (day, start, end)
}

fn local_midnight<Tz: TimeZone>(tz: &Tz, day: NaiveDate) -> DateTime<Utc> {
    let midnight = day.and_time(NaiveTime::MIN);
    // DST gaps can skip midnight; fall back to the UTC reading
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&midnight))
}

/// Dashboard view of the budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSnapshot {
    pub day: NaiveDate,
    pub cap_cents: i64,
    pub spent_cents: i64,
    pub remaining_cents: i64,
    pub at_cap: bool,
}

#[derive(Debug)]
struct BudgetState {
    day: NaiveDate,
    spent_cents: i64,
    cap_announced: bool,
}

#[derive(Debug)]
pub struct BudgetTracker {
    cap_cents: i64,
    boundary: DayBoundary,
    ledger: Arc<dyn CallLedger>,
    clock: SharedClock,
    state: Mutex<BudgetState>,
    events: Option<EventPublisher>,
}

impl BudgetTracker {
    /// Build a tracker whose spend is recomputed from today's ledger rows
    pub async fn bootstrap(
        cap_cents: i64,
        boundary: DayBoundary,
        ledger: Arc<dyn CallLedger>,
        clock: SharedClock,
    ) -> GuardResult<Self> {
        let (day, start, end) = boundary.day_bounds(clock.now());
        let spent_cents = ledger.sum_cost_between(start, end).await?;

        info!(
            cap_cents = cap_cents,
            spent_cents = spent_cents,
            day = %day,
            "Budget tracker bootstrapped from ledger"
        );

        Ok(Self {
            cap_cents: cap_cents.max(0),
            boundary,
            ledger,
            clock,
            state: Mutex::new(BudgetState {
                day,
                spent_cents,
                cap_announced: false,
            }),
            events: None,
        })
    }

    pub async fn from_config(
        config: &BudgetConfig,
        ledger: Arc<dyn CallLedger>,
        clock: SharedClock,
    ) -> GuardResult<Self> {
        let boundary = DayBoundary::from_config(config)?;
        Self::bootstrap(config.daily_cap_cents, boundary, ledger, clock).await
    }

    pub fn with_events(mut self, events: EventPublisher) -> Self {
        self.events = Some(events);
        self
    }

    /// Record billed cost after a provider call
    pub fn add(&self, cents: i64) {
        if cents < 0 {
            warn!(cents = cents, "Ignoring negative budget charge");
            return;
        }
        if cents == 0 {
            return;
        }

        let now = self.clock.now();
        let (spent, crossed) = {
            let mut state = self.state.lock();
            self.roll_day(&mut state, now);
            state.spent_cents = state.spent_cents.saturating_add(cents);
            let crossed = self.is_at_cap(state.spent_cents) && !state.cap_announced;
            if crossed {
                state.cap_announced = true;
            }
            (state.spent_cents, crossed)
        };

        log_budget_event("charge", spent, self.cap_cents, cents);

        if crossed {
            warn!(spent_cents = spent, cap_cents = self.cap_cents, "Daily budget cap reached");
            if let Some(events) = &self.events {
                events.publish(GuardEvent::BudgetCapReached {
                    spent_cents: spent,
                    cap_cents: self.cap_cents,
                    at: now,
                });
            }
        }
    }

    /// `max(0, cap - spent)`; meaningless when the cap is disabled
    pub fn remaining(&self) -> i64 {
        (self.cap_cents - self.spent()).max(0)
    }

    pub fn at_cap(&self) -> bool {
        self.is_at_cap(self.spent())
    }

    /// Admission check used before every paid call
    pub fn check(&self) -> GuardResult<()> {
        let spent = self.spent();
        if self.is_at_cap(spent) {
            debug!(spent_cents = spent, cap_cents = self.cap_cents, "Budget check rejected call");
            return Err(GuardError::BudgetExhausted {
                spent_cents: spent,
                cap_cents: self.cap_cents,
            });
        }
        Ok(())
    }

    /// Spend recorded for the current local day
    pub fn spent(&self) -> i64 {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll_day(&mut state, now);
        state.spent_cents
    }

    pub fn cap_cents(&self) -> i64 {
        self.cap_cents
    }

    pub fn is_unlimited(&self) -> bool {
        self.cap_cents == 0
    }

    /// Re-sum today's spend from the ledger
    pub async fn reset(&self) -> GuardResult<i64> {
        let now = self.clock.now();
        let (day, start, end) = self.boundary.day_bounds(now);
        let spent_cents = self.ledger.sum_cost_between(start, end).await?;

        {
            let mut state = self.state.lock();
            state.day = day;
            state.spent_cents = spent_cents;
            state.cap_announced = self.is_at_cap(spent_cents);
        }

        log_budget_event("reset", spent_cents, self.cap_cents, 0);
        Ok(spent_cents)
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let now = self.clock.now();
        let mut state = self.state.lock();
        self.roll_day(&mut state, now);
        BudgetSnapshot {
            day: state.day,
            cap_cents: self.cap_cents,
            spent_cents: state.spent_cents,
            remaining_cents: (self.cap_cents - state.spent_cents).max(0),
            at_cap: self.is_at_cap(state.spent_cents),
        }
    }

    fn is_at_cap(&self, spent: i64) -> bool {
        self.cap_cents > 0 && spent >= self.cap_cents
    }

    fn roll_day(&self, state: &mut BudgetState, now: DateTime<Utc>) {
        let (today, _, _) = self.boundary.day_bounds(now);
        if today != state.day {
            info!(
                previous_day = %state.day,
                previous_spent_cents = state.spent_cents,
                day = %today,
                "Budget day rolled over"
            );
            state.day = today;
            state.spent_cents = 0;
            state.cap_announced = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::models::{CallOutcome, ProviderCallRecord};
    use crate::store::InMemoryCallLedger;
    use proptest::prelude::*;

    fn utc() -> DayBoundary {
        DayBoundary::Fixed(FixedOffset::east_opt(0).unwrap())
    }

    fn clock_at(y: i32, m: u32, d: u32, h: u32) -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()))
    }

    async fn tracker(cap: i64, clock: Arc<ManualClock>) -> BudgetTracker {
        BudgetTracker::bootstrap(cap, utc(), Arc::new(InMemoryCallLedger::new()), clock)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_cap_reached_exactly_and_remaining_never_negative() {
        let budget = tracker(1000, clock_at(2026, 3, 1, 12)).await;

        for _ in 0..3 {
            budget.add(300);
        }
        assert_eq!(budget.spent(), 900);
        assert!(!budget.at_cap());
        assert_eq!(budget.remaining(), 100);

        budget.add(300);
        assert_eq!(budget.spent(), 1200);
        assert!(budget.at_cap());
        assert_eq!(budget.remaining(), 0);
        assert_eq!(budget.check().unwrap_err().code(), "budget_exhausted");
    }

    #[tokio::test]
    async fn test_zero_cap_is_unlimited() {
        let budget = tracker(0, clock_at(2026, 3, 1, 12)).await;
        budget.add(1_000_000);
        assert!(budget.is_unlimited());
        assert!(!budget.at_cap());
        assert!(budget.check().is_ok());
    }

    #[tokio::test]
    async fn test_bootstrap_sums_only_today() {
        let clock = clock_at(2026, 3, 2, 9);
        let ledger = Arc::new(InMemoryCallLedger::new());
        let yesterday = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        let today = Utc.with_ymd_and_hms(2026, 3, 2, 0, 1, 0).unwrap();

        for (at, cost) in [(yesterday, 700), (today, 25), (today, 25)] {
            ledger
                .append(&ProviderCallRecord::new("p", "k", cost, CallOutcome::Found, at))
                .await
                .unwrap();
        }

        let budget = BudgetTracker::bootstrap(1000, utc(), ledger, clock).await.unwrap();
        assert_eq!(budget.spent(), 50);
    }

    #[tokio::test]
    async fn test_fixed_offset_moves_the_day_boundary() {
        // 03:00 UTC is still the previous evening at UTC-5
        let clock = clock_at(2026, 3, 2, 3);
        let ledger = Arc::new(InMemoryCallLedger::new());
        let evening_before = Utc.with_ymd_and_hms(2026, 3, 1, 23, 0, 0).unwrap();
        ledger
            .append(&ProviderCallRecord::new("p", "k", 40, CallOutcome::NoHit, evening_before))
            .await
            .unwrap();

        let eastern = DayBoundary::Fixed(FixedOffset::west_opt(5 * 3600).unwrap());
        let budget = BudgetTracker::bootstrap(1000, eastern, ledger, clock).await.unwrap();
        assert_eq!(budget.spent(), 40);
        assert_eq!(budget.snapshot().day, NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
    }

    #[tokio::test]
    async fn test_day_rollover_resets_spend() {
        let clock = clock_at(2026, 3, 1, 23);
        let budget = tracker(1000, clock.clone()).await;
        budget.add(1000);
        assert!(budget.at_cap());

        clock.advance(Duration::hours(2));
        assert_eq!(budget.spent(), 0);
        assert!(!budget.at_cap());
    }

    #[tokio::test]
    async fn test_reset_recomputes_from_ledger() {
        let clock = clock_at(2026, 3, 1, 12);
        let ledger = Arc::new(InMemoryCallLedger::new());
        let budget = BudgetTracker::bootstrap(1000, utc(), ledger.clone(), clock.clone())
            .await
            .unwrap();

        // Another process billed through the shared ledger
        ledger
            .append(&ProviderCallRecord::new("p", "k", 250, CallOutcome::Found, clock.now()))
            .await
            .unwrap();
        assert_eq!(budget.spent(), 0);
        assert_eq!(budget.reset().await.unwrap(), 250);
        assert_eq!(budget.remaining(), 750);
    }

    #[tokio::test]
    async fn test_cap_event_published_once() {
        let events = EventPublisher::new();
        let mut rx = events.subscribe();
        let budget = tracker(500, clock_at(2026, 3, 1, 12)).await.with_events(events);

        budget.add(300);
        budget.add(300);
        budget.add(300);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "budget.cap_reached");
        assert!(rx.try_recv().is_err());
    }

    proptest! {
        #[test]
        fn test_remaining_is_never_negative(
            cap in 0i64..5_000,
            charges in proptest::collection::vec(0i64..1_000, 0..30)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let budget = runtime.block_on(tracker(cap, clock_at(2026, 3, 1, 12)));
            let mut expected = 0;
            for cents in charges {
                budget.add(cents);
                expected += cents;
                prop_assert!(budget.remaining() >= 0);
                prop_assert_eq!(budget.spent(), expected);
                prop_assert_eq!(budget.at_cap(), cap > 0 && expected >= cap);
            }
        }
    }
}
