//! Expiring storage for per-caller windows.
//!
//! The limiter never talks to a concrete cache; it is handed something that
//! implements [`WindowStore`]. The in-process [`InMemoryWindowStore`] is the
//! default, and a networked cache can be dropped in behind the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::clock::{Clock, Timestamp};
use super::window::Window;

/// Errors raised by a window store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("window store unavailable: {0}")]
    Unavailable(String),
}

/// Expiring key-value storage mapping a caller key to its [`Window`].
///
/// Implementations provide no compare-and-swap. Two evaluations for the same
/// key may read the same snapshot and both write back; the last write wins.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Fetch the window for `key`, or an empty window when absent or expired.
    async fn get(&self, key: &str) -> Result<Window, StoreError>;

    /// Replace the window for `key` and reset its expiry to `ttl` from now.
    async fn put(&self, key: &str, window: Window, ttl: Duration) -> Result<(), StoreError>;
}

#[async_trait]
impl<S: WindowStore + ?Sized> WindowStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Window, StoreError> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, window: Window, ttl: Duration) -> Result<(), StoreError> {
        (**self).put(key, window, ttl).await
    }
}

#[derive(Debug, Clone)]
struct StoredWindow {
    window: Window,
    expires_at: Timestamp,
}

impl StoredWindow {
    fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }
}

/// In-process window store backed by a `DashMap`.
///
/// Expiry is measured against the injected clock. Expired windows are dropped
/// lazily on read and eagerly by [`InMemoryWindowStore::purge_expired`].
#[derive(Debug)]
pub struct InMemoryWindowStore {
    windows: DashMap<String, StoredWindow>,
    clock: Arc<dyn Clock>,
}

impl InMemoryWindowStore {
    /// Create an empty store that ages entries with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
        }
    }

    /// Number of keys currently held, including ones that expired but have
    /// not been reclaimed yet.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Remove every expired window. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.windows.len();
        self.windows.retain(|_, stored| stored.is_live(now));
        before.saturating_sub(self.windows.len())
    }

    /// Periodically purge expired windows on the current tokio runtime.
    pub fn spawn_reaper(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let purged = self.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = self.len(), "Reclaimed expired windows");
                }
            }
        })
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn get(&self, key: &str) -> Result<Window, StoreError> {
        let now = self.clock.now_millis();

        if let Some(stored) = self.windows.get(key) {
            if stored.is_live(now) {
                return Ok(stored.window.clone());
            }
        }

        if self.windows.remove_if(key, |_, stored| !stored.is_live(now)).is_some() {
            trace!(key = %key, "Dropped expired window on read");
        }
        Ok(Window::new())
    }

    async fn put(&self, key: &str, window: Window, ttl: Duration) -> Result<(), StoreError> {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_millis().saturating_add(ttl_ms);
        self.windows
            .insert(key.to_string(), StoredWindow { window, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;

    const MINUTE: Duration = Duration::from_secs(60);

    fn store_at(now: Timestamp) -> (Arc<ManualClock>, InMemoryWindowStore) {
        let clock = Arc::new(ManualClock::new(now));
        let store = InMemoryWindowStore::new(clock.clone());
        (clock, store)
    }

    #[tokio::test]
    async fn test_get_missing_key_is_empty() {
        let (_clock, store) = store_at(0);
        let window = store.get("nobody").await.unwrap();
        assert!(window.is_empty());
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (_clock, store) = store_at(1_000);
        store
            .put("a", Window::from_entries(vec![1_000]), MINUTE)
            .await
            .unwrap();

        let window = store.get("a").await.unwrap();
        assert_eq!(window.entries(), &[1_000]);
    }

    #[tokio::test]
    async fn test_window_expires_after_ttl() {
        let (clock, store) = store_at(0);
        store
            .put("a", Window::from_entries(vec![0]), MINUTE)
            .await
            .unwrap();

        clock.advance(Duration::from_millis(59_999));
        assert_eq!(store.get("a").await.unwrap().len(), 1);

        clock.advance(Duration::from_millis(1));
        assert!(store.get("a").await.unwrap().is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_refreshes_ttl() {
        let (clock, store) = store_at(0);
        store.put("a", Window::from_entries(vec![0]), MINUTE).await.unwrap();

        clock.advance(Duration::from_secs(50));
        store
            .put("a", Window::from_entries(vec![50_000, 0]), MINUTE)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(50));
        assert_eq!(store.get("a").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_expired_only_removes_stale_keys() {
        let (clock, store) = store_at(0);
        store.put("old", Window::from_entries(vec![0]), MINUTE).await.unwrap();
        clock.advance(Duration::from_secs(30));
        store
            .put("fresh", Window::from_entries(vec![30_000]), MINUTE)
            .await
            .unwrap();

        clock.advance(Duration::from_secs(30));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("fresh").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_reclaims_in_background() {
        let (clock, store) = store_at(0);
        let store = Arc::new(store);
        store.put("a", Window::from_entries(vec![0]), MINUTE).await.unwrap();

        clock.advance(MINUTE);
        let handle = store.clone().spawn_reaper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(store.is_empty());
        handle.abort();
    }
}
