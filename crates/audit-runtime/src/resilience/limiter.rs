//! Leaky-bucket rate limiter on the tokio clock.
//!
//! A limiter built from `Quota { count, period }` holds at most `count`
//! units and drains at `count / period` units per second. Acquiring `n`
//! units waits until the bucket has room for them. Waiters are served in
//! arrival order because the bucket lock (a tokio mutex, which is fair) is
//! held across the sleep.

use audit_core::Quota;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Floor on a single wait so rounding never spins.
const MIN_WAIT: Duration = Duration::from_millis(1);

const EPSILON: f64 = 1e-9;

struct Bucket {
    level: f64,
    updated: Instant,
}

/// Async leaky-bucket limiter.
pub struct RateLimiter {
    quota: Quota,
    capacity: f64,
    /// Units drained per second; zero means unlimited.
    rate: f64,
    bucket: Mutex<Bucket>,
    acquired: AtomicU64,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("quota", &self.quota)
            .field("acquired", &self.acquired())
            .finish()
    }
}

impl RateLimiter {
    /// A quota with a zero count or zero period never blocks.
    pub fn new(quota: Quota) -> Self {
        let capacity = f64::from(quota.count);
        let rate = if quota.count == 0 || quota.period.is_zero() {
            0.0
        } else {
            capacity / quota.period.as_secs_f64()
        };

        Self {
            quota,
            capacity,
            rate,
            bucket: Mutex::new(Bucket {
                level: 0.0,
                updated: Instant::now(),
            }),
            acquired: AtomicU64::new(0),
        }
    }

    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Total units handed out since construction.
    pub fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    /// Wait until `amount` units fit in the bucket, then take them.
    ///
    /// Amounts above capacity are clamped to capacity, so a single oversized
    /// request waits for an empty bucket instead of failing. Returns the time
    /// spent waiting.
    pub async fn acquire(&self, amount: u32) -> Duration {
        self.acquired.fetch_add(u64::from(amount), Ordering::Relaxed);
        if self.rate == 0.0 || amount == 0 {
            return Duration::ZERO;
        }

        let amount = f64::from(amount).min(self.capacity);
        let started = Instant::now();
        let mut bucket = self.bucket.lock().await;

        loop {
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(bucket.updated).as_secs_f64();
            bucket.level = (bucket.level - elapsed * self.rate).max(0.0);
            bucket.updated = now;

            let overflow = bucket.level + amount - self.capacity;
            if overflow <= EPSILON {
                bucket.level += amount;
                return started.elapsed();
            }

            let wait = Duration::from_secs_f64(overflow / self.rate).max(MIN_WAIT);
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_up_to_capacity_is_free() {
        let limiter = RateLimiter::new(Quota::per_secs(5, 4));
        for _ in 0..5 {
            assert_eq!(limiter.acquire(1).await, Duration::ZERO);
        }
        assert_eq!(limiter.acquired(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sixth_request_waits_for_drain() {
        let limiter = RateLimiter::new(Quota::per_secs(5, 4));
        for _ in 0..5 {
            limiter.acquire(1).await;
        }

        // 5 per 4s drains one unit every 800ms
        let waited = limiter.acquire(1).await;
        assert!(waited >= Duration::from_millis(800), "waited {waited:?}");
        assert!(waited < Duration::from_millis(810), "waited {waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_request_is_clamped() {
        let limiter = RateLimiter::new(Quota::per_secs(100, 60));
        let waited = limiter.acquire(250).await;
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(limiter.acquired(), 250);

        // Bucket is now full; the next unit waits 600ms
        let waited = limiter.acquire(1).await;
        assert!(waited >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_unlimited() {
        let limiter = RateLimiter::new(Quota {
            count: 1,
            period: Duration::ZERO,
        });
        for _ in 0..1000 {
            assert_eq!(limiter.acquire(1).await, Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_served_in_arrival_order() {
        let limiter = Arc::new(RateLimiter::new(Quota::per_secs(1, 1)));
        limiter.acquire(1).await;

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..4 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire(1).await;
                order.lock().push(i);
            }));
            // Let each task reach the lock before spawning the next
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sustained_rate() {
        let limiter = RateLimiter::new(Quota::per_secs(10, 1));
        let start = Instant::now();
        for _ in 0..30 {
            limiter.acquire(1).await;
        }
        // 10 free, then 20 more at 10/s
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(2100), "elapsed {elapsed:?}");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn paused_runtime() -> tokio::runtime::Runtime {
            tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .start_paused(true)
                .build()
                .unwrap()
        }

        proptest! {
            #[test]
            fn within_capacity_never_waits(amounts in proptest::collection::vec(0u32..50, 0..20)) {
                let total: u32 = amounts.iter().sum();
                let limiter = RateLimiter::new(Quota::per_secs(total.max(1), 10));
                let waited = paused_runtime().block_on(async {
                    let mut waited = Duration::ZERO;
                    for amount in &amounts {
                        waited += limiter.acquire(*amount).await;
                    }
                    waited
                });
                prop_assert_eq!(waited, Duration::ZERO);
                prop_assert_eq!(limiter.acquired(), u64::from(total));
            }

            #[test]
            fn wait_matches_drain_rate(count in 1u32..20, extra in 1u32..20) {
                // Fill the bucket, then ask for `extra` more units
                let limiter = RateLimiter::new(Quota::per_secs(count, 2));
                let extra = extra.min(count);
                let waited = paused_runtime().block_on(async {
                    limiter.acquire(count).await;
                    limiter.acquire(extra).await
                });
                let expected = Duration::from_secs_f64(2.0 * f64::from(extra) / f64::from(count));
                prop_assert!(waited + Duration::from_millis(2) >= expected, "waited {:?}, expected {:?}", waited, expected);
                prop_assert!(waited <= expected + Duration::from_millis(5), "waited {:?}, expected {:?}", waited, expected);
            }
        }
    }
}
