//! In-process counter store.
//!
//! Keeps the window counter and block marker of every key in a sharded
//! concurrent map. The admission sequence for a key runs while holding that
//! key's shard lock, which makes it atomic with respect to every other task
//! in the process. It cannot coordinate separate processes; use
//! [`RedisStore`](super::RedisStore) for that.
//!
//! Expiry is evaluated lazily against [`tokio::time::Instant`], so tests can
//! drive it deterministically with a paused clock. Keys whose records have
//! all expired are swept out every `sweep_interval` admissions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::key::RateLimitKey;
use super::policy::WINDOW;
use super::store::CounterStore;
use crate::error::StoreError;

/// Counter and block records of one key.
#[derive(Debug, Default)]
struct KeyRecords {
    /// Requests counted in the current window
    count: u64,
    /// When the current window's counter expires (None = no counter)
    window_expires_at: Option<Instant>,
    /// When the block expires (None = not blocked)
    blocked_until: Option<Instant>,
}

impl KeyRecords {
    /// Drop records whose TTL has elapsed. Returns true if nothing is left.
    fn expire(&mut self, now: Instant) -> bool {
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
        if self.window_expires_at.is_some_and(|at| at <= now) {
            self.window_expires_at = None;
            self.count = 0;
        }
        self.blocked_until.is_none() && self.window_expires_at.is_none()
    }

    fn live_count(&self, now: Instant) -> Option<u64> {
        self.window_expires_at
            .filter(|at| *at > now)
            .map(|_| self.count)
    }

    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }
}

/// Default number of admissions between sweeps of expired keys.
pub const DEFAULT_SWEEP_INTERVAL: u64 = 4096;

/// Stand-in deadline for blocks too long to represent as an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + duration`, saturating to a far-future instant on overflow.
fn deadline_after(now: Instant, duration: Duration) -> Instant {
    now.checked_add(duration)
        .unwrap_or_else(|| now + FAR_FUTURE)
}

/// A counter store local to this process.
#[derive(Debug)]
pub struct InMemoryStore {
    records: DashMap<RateLimitKey, KeyRecords>,
    /// Admissions since the store was created
    admissions: AtomicU64,
    /// Admissions between sweeps (0 disables sweeping)
    sweep_interval: u64,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::with_sweep_interval(DEFAULT_SWEEP_INTERVAL)
    }
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that sweeps expired keys every `interval`
    /// admissions. An interval of 0 leaves sweeping to [`purge_expired`].
    ///
    /// [`purge_expired`]: InMemoryStore::purge_expired
    pub fn with_sweep_interval(interval: u64) -> Self {
        Self {
            records: DashMap::new(),
            admissions: AtomicU64::new(0),
            sweep_interval: interval,
        }
    }

    /// Get the live counter value for a key.
    ///
    /// Returns `None` if the key has no counter in the current window.
    pub fn counter_value(&self, key: &RateLimitKey) -> Option<u64> {
        let now = Instant::now();
        self.records.get(key).and_then(|r| r.live_count(now))
    }

    /// Whether the key is currently blocked.
    pub fn is_blocked(&self, key: &RateLimitKey) -> bool {
        let now = Instant::now();
        self.records.get(key).is_some_and(|r| r.is_blocked(now))
    }

    /// Remove every key whose records have all expired.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.records.retain(|_, records| !records.expire(now));
    }

    /// Number of keys currently tracked, including expired ones not yet purged.
    pub fn key_count(&self) -> usize {
        self.records.len()
    }

    /// Clear all records.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn admit(
        &self,
        key: &RateLimitKey,
        limit: u64,
        block: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let admitted = self.admit_at(key, limit, block, now);

        // Sweep after the entry guard is released; retain locks every shard.
        let seen = self.admissions.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sweep_interval > 0 && seen % self.sweep_interval == 0 {
            self.purge_expired();
        }

        Ok(admitted)
    }
}

impl InMemoryStore {
    fn admit_at(&self, key: &RateLimitKey, limit: u64, block: Duration, now: Instant) -> bool {
        let mut records = self.records.entry(key.clone()).or_default();
        records.expire(now);

        if records.blocked_until.is_some() {
            return false;
        }

        records.count += 1;
        if records.count == 1 {
            records.window_expires_at = Some(now + WINDOW);
        }

        if records.count > limit {
            records.blocked_until = Some(deadline_after(now, block));
            debug!(
                key = %key,
                count = records.count,
                limit = limit,
                block = ?block,
                "Key exceeded its budget, blocking"
            );
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const BLOCK: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_first_n_allowed_then_denied() {
        let store = InMemoryStore::new();
        let key = RateLimitKey::address("10.0.0.1");

        for i in 1..=3 {
            assert!(store.admit(&key, 3, BLOCK).await.unwrap(), "request {} should pass", i);
        }
        assert!(!store.admit(&key, 3, BLOCK).await.unwrap());
        assert!(store.is_blocked(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_outlives_window() {
        let store = InMemoryStore::new();
        let key = RateLimitKey::address("10.0.0.1");

        assert!(store.admit(&key, 1, BLOCK).await.unwrap());
        assert!(!store.admit(&key, 1, BLOCK).await.unwrap());

        // Several windows later the key is still blocked.
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(!store.admit(&key, 1, BLOCK).await.unwrap());
        assert_eq!(store.counter_value(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_calls_do_not_touch_counter() {
        let store = InMemoryStore::new();
        let key = RateLimitKey::token("abc");

        store.admit(&key, 1, BLOCK).await.unwrap();
        store.admit(&key, 1, BLOCK).await.unwrap();
        assert_eq!(store.counter_value(&key), Some(2));

        store.admit(&key, 1, BLOCK).await.unwrap();
        store.admit(&key, 1, BLOCK).await.unwrap();
        assert_eq!(store.counter_value(&key), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_expiry_starts_new_window() {
        let store = InMemoryStore::new();
        let key = RateLimitKey::address("10.0.0.2");

        assert!(store.admit(&key, 2, BLOCK).await.unwrap());
        assert!(store.admit(&key, 2, BLOCK).await.unwrap());
        assert!(!store.admit(&key, 2, BLOCK).await.unwrap());

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!store.admit(&key, 2, BLOCK).await.unwrap());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.admit(&key, 2, BLOCK).await.unwrap());
        assert_eq!(store.counter_value(&key), Some(1));
        assert!(!store.is_blocked(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_one_second() {
        let store = InMemoryStore::new();
        let key = RateLimitKey::address("10.0.0.3");

        assert!(store.admit(&key, 2, BLOCK).await.unwrap());
        tokio::time::advance(Duration::from_millis(600)).await;
        assert!(store.admit(&key, 2, BLOCK).await.unwrap());
        assert_eq!(store.counter_value(&key), Some(2));

        // The window is anchored at the first increment, not the last one.
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(store.counter_value(&key), None);
        assert!(store.admit(&key, 2, BLOCK).await.unwrap());
        assert_eq!(store.counter_value(&key), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_not_reset_early() {
        let store = InMemoryStore::new();
        let key = RateLimitKey::address("10.0.0.4");

        assert!(store.admit(&key, 1, BLOCK).await.unwrap());
        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!store.admit(&key, 1, BLOCK).await.unwrap());
    }

    #[tokio::test]
    async fn test_classes_are_independent() {
        let store = InMemoryStore::new();
        let address = RateLimitKey::address("X");
        let token = RateLimitKey::token("X");

        assert!(store.admit(&address, 1, BLOCK).await.unwrap());
        assert!(!store.admit(&address, 1, BLOCK).await.unwrap());

        assert!(store.admit(&token, 2, BLOCK).await.unwrap());
        assert!(store.admit(&token, 2, BLOCK).await.unwrap());
        assert_eq!(store.counter_value(&address), Some(2));
        assert_eq!(store.counter_value(&token), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = InMemoryStore::new();
        store.admit(&RateLimitKey::address("a"), 5, BLOCK).await.unwrap();
        store.admit(&RateLimitKey::address("b"), 0, BLOCK).await.unwrap();
        assert_eq!(store.key_count(), 2);

        tokio::time::advance(Duration::from_secs(1)).await;
        store.purge_expired();
        // "b" is still blocked.
        assert_eq!(store.key_count(), 1);

        tokio::time::advance(BLOCK).await;
        store.purge_expired();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_block_saturates() {
        let store = InMemoryStore::new();
        let key = RateLimitKey::address("1.2.3.4");

        assert!(store.admit(&key, 1, Duration::MAX).await.unwrap());
        assert!(!store.admit(&key, 1, Duration::MAX).await.unwrap());
        assert!(store.is_blocked(&key));

        tokio::time::advance(Duration::from_secs(86400 * 365)).await;
        assert!(!store.admit(&key, 1, Duration::MAX).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_admit_sweeps_expired_keys() {
        let store = InMemoryStore::with_sweep_interval(4);

        for i in 0..3 {
            let key = RateLimitKey::address(format!("10.9.0.{}", i));
            store.admit(&key, 5, BLOCK).await.unwrap();
        }
        assert_eq!(store.key_count(), 3);

        tokio::time::advance(Duration::from_secs(1)).await;

        // The fourth admission triggers a sweep of the three expired keys.
        store.admit(&RateLimitKey::address("10.9.1.1"), 5, BLOCK).await.unwrap();
        assert_eq!(store.key_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_blocked_keys() {
        let store = InMemoryStore::with_sweep_interval(3);
        let blocked = RateLimitKey::token("abuser");

        store.admit(&blocked, 1, BLOCK).await.unwrap();
        store.admit(&blocked, 1, BLOCK).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.admit(&RateLimitKey::token("fresh"), 1, BLOCK).await.unwrap();

        assert_eq!(store.key_count(), 2);
        assert!(store.is_blocked(&blocked));
    }

    #[tokio::test]
    async fn test_clear() {
        let store = InMemoryStore::new();
        store.admit(&RateLimitKey::address("a"), 5, BLOCK).await.unwrap();
        store.clear();
        assert_eq!(store.key_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_admits_are_exact() {
        const LIMIT: u64 = 25;
        const CALLS: usize = 400;

        let store = Arc::new(InMemoryStore::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(CALLS));
        let key = RateLimitKey::address("203.0.113.7");

        let handles: Vec<_> = (0..CALLS)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                let key = key.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    store.admit(&key, LIMIT, BLOCK).await.unwrap()
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let allowed = results.into_iter().filter(|r| *r.as_ref().unwrap()).count();

        assert_eq!(allowed as u64, LIMIT);
        assert!(store.is_blocked(&key));
        assert_eq!(store.counter_value(&key), Some(LIMIT + 1));
    }
}
