//! Sliding-window rate limiter.

use std::sync::Arc;
use tracing::{debug, trace};

use super::clock::{Clock, Timestamp};
use super::limits::LimitConfig;
use super::store::{StoreError, WindowStore};

/// Outcome of evaluating one request against a limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The configured maximum for the window
    pub limit: u32,
    /// Requests still available in the current window; zero when denied
    pub remaining: u32,
}

impl Verdict {
    fn allowed(limit: u32, remaining: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
        }
    }

    fn denied(limit: u32) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
        }
    }
}

/// Sliding-window limiter over a shared [`WindowStore`].
///
/// Each evaluation reads the caller's window, drops entries that aged out,
/// decides, and writes the window back with a TTL equal to the window length.
///
/// The read and the write are separate store calls. Concurrent evaluations for
/// the same key can both read one snapshot and both be admitted, leaving the
/// stored count one short. Keys never interfere with each other.
pub struct SlidingWindowLimiter<S: WindowStore> {
    store: S,
    clock: Arc<dyn Clock>,
}

impl<S: WindowStore> SlidingWindowLimiter<S> {
    /// Create a limiter over `store`, stamping requests with `clock`.
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Evaluate one request from `key` against `limit` at the clock's current time.
    pub async fn check(&self, key: &str, limit: &LimitConfig) -> Result<Verdict, StoreError> {
        let now = self.clock.now_millis();
        self.evaluate(key, now, limit).await
    }

    /// Evaluate one request from `key` arriving at `now`.
    ///
    /// A denied request is not recorded, so it never consumes a slot, but the
    /// pruned window is still persisted with a refreshed TTL.
    pub async fn evaluate(
        &self,
        key: &str,
        now: Timestamp,
        limit: &LimitConfig,
    ) -> Result<Verdict, StoreError> {
        let mut window = self.store.get(key).await?;
        let expired = window.prune(now, limit.window());
        let count_before = window.len();

        trace!(
            key = %key,
            now = now,
            count = count_before,
            expired = expired,
            limit = limit.max_requests(),
            "Evaluating sliding window"
        );

        let verdict = if count_before >= limit.max_requests() as usize {
            debug!(
                key = %key,
                count = count_before,
                limit = limit.max_requests(),
                "Rate limit exceeded"
            );
            Verdict::denied(limit.max_requests())
        } else {
            if window.is_empty() {
                debug!(key = %key, "Opening new window");
            }
            window.record(now);
            let remaining = limit.max_requests() - window.len() as u32;
            Verdict::allowed(limit.max_requests(), remaining)
        };

        self.store.put(key, window, limit.window()).await?;
        Ok(verdict)
    }

    /// The store backing this limiter.
    pub fn store(&self) -> &S {
        &self.store
    }
}

#[async_trait::async_trait]
impl<S: WindowStore> super::backend::RateLimiterBackend for SlidingWindowLimiter<S> {
    async fn check_rate_limit(
        &self,
        key: &str,
        limit: &LimitConfig,
    ) -> Result<Verdict, StoreError> {
        self.check(key, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::store::InMemoryWindowStore;
    use crate::ratelimit::window::Window;
    use async_trait::async_trait;
    use std::time::Duration;

    const SECOND: u64 = 1_000;

    fn limiter_at(now: Timestamp) -> (Arc<ManualClock>, SlidingWindowLimiter<InMemoryWindowStore>) {
        let clock = Arc::new(ManualClock::new(now));
        let store = InMemoryWindowStore::new(clock.clone());
        (clock.clone(), SlidingWindowLimiter::new(store, clock))
    }

    fn limit(max: u32, secs: u64) -> LimitConfig {
        LimitConfig::new(max, Duration::from_secs(secs)).unwrap()
    }

    #[tokio::test]
    async fn test_two_per_minute_scenario() {
        let (clock, limiter) = limiter_at(0);
        let limit = limit(2, 60);

        let mut verdicts = Vec::new();
        for t in [0, 10, 20, 61] {
            clock.set(t * SECOND);
            verdicts.push(limiter.check("X", &limit).await.unwrap());
        }

        assert_eq!(verdicts[0], Verdict::allowed(2, 1));
        assert_eq!(verdicts[1], Verdict::allowed(2, 0));
        assert_eq!(verdicts[2], Verdict::denied(2));
        assert_eq!(verdicts[3], Verdict::allowed(2, 0));
    }

    #[tokio::test]
    async fn test_entry_exactly_window_old_is_expired() {
        let (_clock, limiter) = limiter_at(0);
        let limit = limit(1, 60);

        assert!(limiter.evaluate("k", 0, &limit).await.unwrap().allowed);
        assert!(!limiter.evaluate("k", 59_999, &limit).await.unwrap().allowed);
        assert!(limiter.evaluate("k", 60_000, &limit).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_entry_just_inside_window_is_retained() {
        let (_clock, limiter) = limiter_at(0);
        let limit = limit(1, 60);

        limiter.evaluate("k", 1, &limit).await.unwrap();
        let verdict = limiter.evaluate("k", 60_000, &limit).await.unwrap();

        assert!(!verdict.allowed);
        assert_eq!(verdict.remaining, 0);
    }

    #[tokio::test]
    async fn test_denied_request_is_not_recorded() {
        let (clock, limiter) = limiter_at(0);
        let limit = limit(2, 60);

        limiter.check("k", &limit).await.unwrap();
        limiter.check("k", &limit).await.unwrap();
        for _ in 0..5 {
            clock.advance(Duration::from_secs(1));
            assert!(!limiter.check("k", &limit).await.unwrap().allowed);
        }

        let window = limiter.store().get("k").await.unwrap();
        assert_eq!(window.entries(), &[0, 0]);

        clock.set(60 * SECOND);
        assert_eq!(limiter.check("k", &limit).await.unwrap(), Verdict::allowed(2, 1));
    }

    #[tokio::test]
    async fn test_denied_request_persists_pruning() {
        let (_clock, limiter) = limiter_at(0);
        let limit = limit(1, 60);
        limiter
            .store()
            .put("k", Window::from_entries(vec![30_000, 0]), Duration::from_secs(60))
            .await
            .unwrap();

        let verdict = limiter.evaluate("k", 60_000, &limit).await.unwrap();

        assert!(!verdict.allowed);
        let window = limiter.store().get("k").await.unwrap();
        assert_eq!(window.entries(), &[30_000]);
    }

    #[tokio::test]
    async fn test_zero_limit_denies_everything() {
        let (_clock, limiter) = limiter_at(0);
        let limit = limit(0, 60);

        let verdict = limiter.check("k", &limit).await.unwrap();

        assert_eq!(verdict, Verdict::denied(0));
        assert!(limiter.store().get("k").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let (_clock, limiter) = limiter_at(0);
        let limit = limit(3, 60);

        for _ in 0..3 {
            limiter.check("a", &limit).await.unwrap();
        }
        assert!(!limiter.check("a", &limit).await.unwrap().allowed);

        let verdict = limiter.check("b", &limit).await.unwrap();
        assert_eq!(verdict, Verdict::allowed(3, 2));
    }

    #[tokio::test]
    async fn test_denied_iff_prior_requests_fill_window() {
        let (clock, limiter) = limiter_at(0);
        let limit = limit(3, 10);
        let spacing = 4 * SECOND;
        let mut history: Vec<Timestamp> = Vec::new();

        for i in 0..12u64 {
            let now = i * spacing;
            clock.set(now);
            let prior = history.iter().filter(|&&t| now - t < 10 * SECOND).count();
            let verdict = limiter.check("k", &limit).await.unwrap();

            assert_eq!(verdict.allowed, prior < 3, "request {} at {}ms", i, now);
            if verdict.allowed {
                history.push(now);
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_keys_do_not_interfere() {
        let (_clock, limiter) = limiter_at(0);
        let limit = limit(1, 60);
        let keys: Vec<String> = (0..16).map(|i| format!("10.0.0.{}", i)).collect();

        let verdicts =
            futures::future::join_all(keys.iter().map(|k| limiter.check(k, &limit))).await;

        for verdict in verdicts {
            assert_eq!(verdict.unwrap(), Verdict::allowed(1, 0));
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl WindowStore for UnavailableStore {
        async fn get(&self, _key: &str) -> Result<Window, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }

        async fn put(&self, _key: &str, _window: Window, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_not_treated_as_empty() {
        let limiter = SlidingWindowLimiter::new(UnavailableStore, Arc::new(ManualClock::new(0)));

        let result = limiter.check("k", &limit(10, 60)).await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }
}
