//! In-process TTL cache backed by a concurrent map

use super::{CacheStats, ResultCache};
use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Concurrent TTL cache; expired entries are dropped on read and by the sweeper
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<String> {
        let (value, expired) = match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };

        // The read guard is released above; a writer may have replaced the entry since
        if expired {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    fn set_at(&self, key: &str, value: String, ttl: Duration, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.get_at(key, Instant::now()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<()> {
        self.set_at(key, value, ttl, Instant::now());
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.len() as u64,
        }
    }
}

/// Periodically purge expired entries until shutdown is signalled
pub fn spawn_sweeper(
    cache: Arc<MemoryCache>,
    every: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged, remaining = cache.len(), "Purged expired cache entries");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_before_ttl() {
        let cache = MemoryCache::new();
        let now = Instant::now();
        cache.set_at("k", "[1,2]".into(), Duration::from_secs(300), now);

        assert_eq!(
            cache.get_at("k", now + Duration::from_secs(299)).as_deref(),
            Some("[1,2]")
        );
    }

    #[test]
    fn test_miss_after_ttl() {
        let cache = MemoryCache::new();
        let now = Instant::now();
        cache.set_at("k", "v".into(), Duration::from_secs(300), now);

        assert!(cache.get_at("k", now + Duration::from_secs(300)).is_none());
        assert!(!cache.contains_key("k"));
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_set_overwrites() {
        let cache = MemoryCache::new();
        let now = Instant::now();
        cache.set_at("k", "old".into(), Duration::from_secs(10), now);
        cache.set_at("k", "new".into(), Duration::from_secs(10), now);
        assert_eq!(cache.get_at("k", now).as_deref(), Some("new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_purge_expired() {
        let cache = MemoryCache::new();
        cache.set_at("gone", "v".into(), Duration::ZERO, Instant::now());
        cache.set_at("kept", "v".into(), Duration::from_secs(60), Instant::now());

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.contains_key("kept"));
    }

    #[tokio::test]
    async fn test_trait_round_trip() {
        let cache = MemoryCache::new();
        cache
            .set("risk:*:*:*:page:1", "[]".into(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(
            cache.get("risk:*:*:*:page:1").await.unwrap().as_deref(),
            Some("[]")
        );
        assert!(cache.get("risk:C9:*:*:page:1").await.unwrap().is_none());
        assert_eq!(cache.stats().hits, 1);
    }
}
