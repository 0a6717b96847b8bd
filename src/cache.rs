//! Bounded LRU cache with optional per-entry TTL.
//!
//! The concrete cache used across the crate: channel resolution, metadata,
//! listing pages, video batches, transcripts, and token counts all sit in one
//! of these. A single mutex guards each instance; contention is negligible
//! next to the network I/O the entries shield.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub ttl_expirations: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    expires_at: Option<Instant>,
}

struct Inner<K: Hash + Eq, V> {
    map: LruCache<K, Entry<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    ttl_expirations: u64,
}

/// Size-bounded key/value store with LRU eviction and optional TTL.
pub struct BoundedLru<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    capacity: usize,
    default_ttl: Option<Duration>,
}

impl<K: Hash + Eq, V: Clone> BoundedLru<K, V> {
    /// Creates a cache holding at most `capacity` entries. Entries inserted
    /// without an explicit TTL use `default_ttl` (no expiry when `None`).
    pub fn new(capacity: usize, default_ttl: Option<Duration>) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).expect("capacity clamped to >= 1");
        Self {
            inner: Mutex::new(Inner {
                map: LruCache::new(cap),
                hits: 0,
                misses: 0,
                evictions: 0,
                ttl_expirations: 0,
            }),
            capacity: capacity.max(1),
            default_ttl,
        }
    }

    /// Returns the value for `key` if present and unexpired, refreshing its
    /// recency. Expired entries are removed and count as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();

        let expired = match inner.map.get(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) => entry
                .expires_at
                .is_some_and(|deadline| Instant::now() > deadline),
        };

        if expired {
            inner.map.pop(key);
            inner.ttl_expirations += 1;
            inner.misses += 1;
            return None;
        }

        inner.hits += 1;
        inner.map.get(key).map(|e| e.value.clone())
    }

    /// Inserts or updates `key`, evicting the least-recently-used entry when
    /// the cache is full. `ttl` overrides the cache-wide default.
    pub fn put(&self, key: K, value: V) {
        self.put_with_ttl(key, value, self.default_ttl);
    }

    pub fn put_with_ttl(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.lock();
        let at_capacity = inner.map.len() == self.capacity && !inner.map.contains(&key);
        if at_capacity {
            inner.evictions += 1;
        }
        inner.map.put(
            key,
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
    }

    /// Removes every entry, returning how many were dropped.
    pub fn clear(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.map.len();
        inner.map.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            ttl_expirations: inner.ttl_expirations,
            size: inner.map.len(),
            capacity: self.capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_put_and_stats() {
        let cache: BoundedLru<String, u32> = BoundedLru::new(4, None);

        assert_eq!(cache.get(&"a".to_string()), None);
        cache.put("a".to_string(), 1);
        assert_eq!(cache.get(&"a".to_string()), Some(1));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 1);
        assert_eq!(stats.capacity, 4);
        assert!((stats.hit_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lru_eviction_order() {
        let cache: BoundedLru<u32, u32> = BoundedLru::new(2, None);
        cache.put(1, 10);
        cache.put(2, 20);

        // Touch 1 so 2 becomes the LRU entry
        assert_eq!(cache.get(&1), Some(10));
        cache.put(3, 30);

        assert_eq!(cache.get(&2), None, "LRU entry should be evicted");
        assert_eq!(cache.get(&1), Some(10));
        assert_eq!(cache.get(&3), Some(30));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_update_does_not_evict() {
        let cache: BoundedLru<u32, u32> = BoundedLru::new(2, None);
        cache.put(1, 10);
        cache.put(2, 20);
        cache.put(1, 11);

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1), Some(11));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache: BoundedLru<u32, u32> = BoundedLru::new(4, None);
        cache.put_with_ttl(1, 10, Some(Duration::from_millis(10)));

        assert_eq!(cache.get(&1), Some(10));
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(cache.get(&1), None);

        let stats = cache.stats();
        assert_eq!(stats.ttl_expirations, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_clear_returns_count() {
        let cache: BoundedLru<u32, u32> = BoundedLru::new(8, None);
        for i in 0..5 {
            cache.put(i, i);
        }
        assert_eq!(cache.clear(), 5);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;

        let cache: Arc<BoundedLru<u32, u32>> = Arc::new(BoundedLru::new(128, None));
        let mut handles = Vec::new();
        for t in 0..4u32 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100u32 {
                    cache.put(t * 100 + i, i);
                    cache.get(&(t * 100 + i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert!(cache.len() <= 128);
        assert!(cache.stats().hits > 0);
    }
}
