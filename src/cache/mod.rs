//! # Response Cache
//!
//! TTL cache of transformed response bodies keyed by the endpoint's cache key.
//! Expiry is lazy: a stale entry is removed when it is read, when
//! [`ResponseCache::purge_expired`] runs, or when it is explicitly invalidated.

use crate::config::CacheConfig;
use crate::resilience::Clock;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub service_id: String,
    pub value: Value,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.stored_at + self.ttl
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

#[derive(Debug)]
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
    enabled: bool,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            enabled: config.enabled,
            max_entries: config.max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Fresh value for `key`, dropping it if it has expired
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        let now = self.clock.now();
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (entry.is_fresh(now), entry.value.clone()));

        match lookup {
            Some((true, value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Some((false, _)) => {
                if self
                    .entries
                    .remove_if(key, |_, entry| !entry.is_fresh(now))
                    .is_some()
                {
                    self.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: impl Into<String>, service_id: &str, value: Value, ttl: Duration) {
        if !self.enabled || ttl.is_zero() {
            return;
        }

        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                service_id: service_id.to_string(),
                value,
                stored_at: self.clock.now(),
                ttl,
            },
        );
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Drop every entry stored for one service, returning how many went
    pub fn clear_service(&self, service_id: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.service_id != service_id);
        let removed = before.saturating_sub(self.entries.len());
        debug!(service_id = %service_id, removed, "🧹 Cleared service cache");
        removed
    }

    pub fn clear_all(&self) -> usize {
        let removed = self.entries.len();
        self.entries.clear();
        debug!(removed, "🧹 Cleared response cache");
        removed
    }

    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        let purged = before.saturating_sub(self.entries.len());
        self.expirations.fetch_add(purged as u64, Ordering::Relaxed);
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn evict_oldest(&self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.stored_at)
            .map(|entry| entry.key().clone());

        if let Some(key) = oldest {
            if self.entries.remove(&key).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::ManualClock;
    use serde_json::json;

    fn cache(max_entries: usize) -> (ResponseCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = CacheConfig {
            enabled: true,
            max_entries,
        };
        (ResponseCache::new(&config, clock.clone()), clock)
    }

    #[test]
    fn test_entries_expire_lazily() {
        let (cache, clock) = cache(10);
        cache.insert("k", "glucoserver", json!([1]), Duration::from_secs(60));
        assert_eq!(cache.get("k"), Some(json!([1])));

        clock.advance(Duration::from_secs(60));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.expirations), (1, 1, 1));
    }

    #[test]
    fn test_oldest_entry_evicted_at_capacity() {
        let (cache, clock) = cache(2);
        cache.insert("a", "s", json!(1), Duration::from_secs(60));
        clock.advance(Duration::from_millis(1));
        cache.insert("b", "s", json!(2), Duration::from_secs(60));
        clock.advance(Duration::from_millis(1));
        cache.insert("c", "s", json!(3), Duration::from_secs(60));

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_clear_service_only_touches_that_service() {
        let (cache, _) = cache(10);
        cache.insert("a", "tidepool", json!(1), Duration::from_secs(60));
        cache.insert("b", "glucoserver", json!(2), Duration::from_secs(60));

        assert_eq!(cache.clear_service("tidepool"), 1);
        assert!(cache.get("b").is_some());
        assert_eq!(cache.clear_all(), 1);
    }

    #[test]
    fn test_purge_and_invalidate() {
        let (cache, clock) = cache(10);
        cache.insert("short", "s", json!(1), Duration::from_secs(1));
        cache.insert("long", "s", json!(2), Duration::from_secs(100));
        clock.advance(Duration::from_secs(2));

        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.invalidate("long"));
        assert!(!cache.invalidate("long"));
    }

    #[test]
    fn test_disabled_cache_stores_nothing() {
        let config = CacheConfig {
            enabled: false,
            max_entries: 10,
        };
        let cache = ResponseCache::new(&config, Arc::new(ManualClock::new()));
        cache.insert("k", "s", json!(1), Duration::from_secs(60));
        assert!(cache.get("k").is_none());
    }
}
