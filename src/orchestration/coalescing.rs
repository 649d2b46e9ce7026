//! Per-key request coalescing.
//!
//! Concurrent callers with the same cache key share one lookup: the first
//! caller runs it, the others wait on the same cell and receive its result.
//! The entry is removed once the leader finishes, so a later request starts
//! fresh (and normally finds the cache populated).

use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// What a caller got back from [`InFlight::run`]
#[derive(Debug)]
pub struct Shared<T> {
    pub value: T,
    /// True when this caller executed the lookup itself
    pub led: bool,
}

#[derive(Debug)]
pub struct InFlight<T> {
    cells: DashMap<String, Arc<OnceCell<T>>>,
}

impl<T> Default for InFlight<T> {
    fn default() -> Self {
        Self {
            cells: DashMap::new(),
        }
    }
}

impl<T: Clone> InFlight<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a lookup in progress
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Run `lookup` for `key` unless an identical lookup is already running.
    ///
    /// A failed leader leaves the cell empty; a waiting caller then runs the
    /// lookup itself.
    pub async fn run<E, F, Fut>(&self, key: &str, lookup: F) -> Result<Shared<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cell = Arc::clone(
            self.cells
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .value(),
        );

        let led = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| {
                led.store(true, Ordering::SeqCst);
                lookup()
            })
            .await
            .cloned();

        let led = led.load(Ordering::SeqCst);
        if led {
            self.cells.remove_if(key, |_, current| Arc::ptr_eq(current, &cell));
        }

        result.map(|value| Shared { value, led })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_lookup() {
        let in_flight = Arc::new(InFlight::<u32>::new());
        let lookups = Arc::new(AtomicU32::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let in_flight = in_flight.clone();
                let lookups = lookups.clone();
                tokio::spawn(async move {
                    in_flight
                        .run("key", || async {
                            lookups.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(42)
                        })
                        .await
                })
            })
            .collect();

        let mut leaders = 0;
        for task in tasks {
            let shared = task.await.unwrap().unwrap();
            assert_eq!(shared.value, 42);
            if shared.led {
                leaders += 1;
            }
        }

        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(leaders, 1);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_failed_lookup_is_not_cached() {
        let in_flight = InFlight::<u32>::new();
        let first = in_flight.run("key", || async { Err::<u32, _>("boom") }).await;
        assert_eq!(first.unwrap_err(), "boom");
        assert!(in_flight.is_empty());

        let second = in_flight.run("key", || async { Ok::<_, &str>(7) }).await.unwrap();
        assert!(second.led);
        assert_eq!(second.value, 7);
    }
}
