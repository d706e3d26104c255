//! Short-lived storage for encryption sessions.
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::{
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::trace;

/// A key-value cache with per-entry time to live.
///
/// Implementations must guarantee that [`SessionCache::take`] is atomic: when
/// multiple callers race for the same key, at most one of them receives the
/// value.
#[async_trait]
pub trait SessionCache<V>: Send + Sync
where
    V: Send + 'static,
{
    /// Stores `value` under `key`, replacing any previous entry. The entry
    /// is no longer visible after `ttl` has elapsed.
    async fn insert(&self, key: String, value: V, ttl: Duration);

    /// Returns whether a non-expired entry exists, without consuming it.
    async fn contains(&self, key: &str) -> bool;

    /// Removes and returns the entry if it exists and has not expired.
    async fn take(&self, key: &str) -> Option<V>;
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// A [`SessionCache`] backed by a mutex-guarded [`HashMap`]. Expired entries
/// are purged lazily on every access.
#[derive(Debug)]
pub struct InMemorySessionCache<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
}

impl<V> Default for InMemorySessionCache<V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<V> InMemorySessionCache<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of non-expired entries.
    pub async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl<V> SessionCache<V> for InMemorySessionCache<V>
where
    V: Send + 'static,
{
    async fn insert(&self, key: String, value: V, ttl: Duration) {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);

        let expires_at = Instant::now() + ttl;
        entries.insert(key, Entry { value, expires_at });
    }

    async fn contains(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.contains_key(key)
    }

    async fn take(&self, key: &str) -> Option<V> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries);
        entries.remove(key).map(|entry| entry.value)
    }
}

fn purge_expired<V>(entries: &mut HashMap<String, Entry<V>>) {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);

    let purged = before - entries.len();
    if purged > 0 {
        trace!(purged, "purged expired cache entries");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn take_consumes_entry() {
        let cache = InMemorySessionCache::new();
        cache
            .insert("a".to_owned(), 1, Duration::from_secs(30))
            .await;

        assert!(cache.contains("a").await);
        assert_eq!(cache.take("a").await, Some(1));
        assert!(!cache.contains("a").await);
        assert_eq!(cache.take("a").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = InMemorySessionCache::new();
        cache
            .insert("a".to_owned(), 1, Duration::from_secs(30))
            .await;

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(cache.contains("a").await);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.contains("a").await);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_take_yields_value_once() {
        let cache = Arc::new(InMemorySessionCache::new());
        cache
            .insert("a".to_owned(), 1, Duration::from_secs(30))
            .await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.take("a").await })
            })
            .collect();

        let mut taken = 0;
        for task in tasks {
            if task.await.expect("task must not panic").is_some() {
                taken += 1;
            }
        }

        assert_eq!(taken, 1);
    }
}
