//! Process-wide cache registry.
//!
//! Every bounded cache in the crate registers here under a unique name with a
//! declared pressure priority. The registry exposes uniform clearing and
//! statistics, and is the hook the memory monitor drives when resident memory
//! crosses the high-water mark: caches are drained in priority order until
//! the pressure predicate reports relief.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{BoundedLru, CacheStats};

/// Uniform handle the registry keeps for each cache.
pub trait RegisteredCache: Send + Sync {
    fn clear(&self) -> usize;
    fn len(&self) -> usize;
    fn stats(&self) -> CacheStats;
}

impl<K, V> RegisteredCache for BoundedLru<K, V>
where
    K: Hash + Eq + Send,
    V: Clone + Send,
{
    fn clear(&self) -> usize {
        BoundedLru::clear(self)
    }

    fn len(&self) -> usize {
        BoundedLru::len(self)
    }

    fn stats(&self) -> CacheStats {
        BoundedLru::stats(self)
    }
}

/// Eviction priority under memory pressure. Lower values drain first.
pub mod priority {
    /// Transcripts are the largest entries and cheapest to refetch lazily.
    pub const TRANSCRIPTS: u8 = 0;
    /// Search and playlist listing pages churn anyway (short TTLs).
    pub const LISTING_PAGES: u8 = 1;
    /// Metadata and resolution results are small but save real quota.
    pub const METADATA: u8 = 2;
    /// Token counts are pure CPU to rebuild.
    pub const TOKEN_COUNTS: u8 = 3;
}

struct Registration {
    name: String,
    priority: u8,
    cache: Arc<dyn RegisteredCache>,
}

/// Registry of named caches with uniform clear/stats/pressure hooks.
#[derive(Default)]
pub struct CacheRegistry {
    entries: Mutex<Vec<Registration>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a cache under `name`. A duplicate name replaces the earlier
    /// registration (the cache behind it is left untouched).
    pub fn register(&self, name: &str, priority: u8, cache: Arc<dyn RegisteredCache>) {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter_mut().find(|r| r.name == name) {
            warn!(cache = name, "Replacing existing cache registration");
            existing.priority = priority;
            existing.cache = cache;
            return;
        }
        debug!(cache = name, priority, "Registered cache");
        entries.push(Registration {
            name: name.to_string(),
            priority,
            cache,
        });
    }

    /// Clears every registered cache, returning evicted counts per cache.
    pub fn clear_all(&self) -> HashMap<String, usize> {
        let entries = self.entries.lock();
        let mut results = HashMap::new();
        for reg in entries.iter() {
            let count = reg.cache.clear();
            debug!(cache = %reg.name, evicted = count, "Cleared cache");
            results.insert(reg.name.clone(), count);
        }
        info!(caches = results.len(), "All registered caches cleared");
        results
    }

    /// Clears caches in priority order until `still_under_pressure` returns
    /// false or every cache has been drained. Returns evicted counts for the
    /// caches that were cleared.
    pub fn pressure_clear(
        &self,
        still_under_pressure: &dyn Fn() -> bool,
    ) -> HashMap<String, usize> {
        let mut order: Vec<(String, u8, Arc<dyn RegisteredCache>)> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .map(|r| (r.name.clone(), r.priority, r.cache.clone()))
                .collect()
        };
        order.sort_by_key(|(_, priority, _)| *priority);

        let mut results = HashMap::new();
        for (name, _, cache) in order {
            if !still_under_pressure() {
                break;
            }
            let count = cache.clear();
            warn!(cache = %name, evicted = count, "Pressure-cleared cache");
            results.insert(name, count);
        }
        results
    }

    /// Statistics for every registered cache.
    pub fn stats(&self) -> HashMap<String, CacheStats> {
        let entries = self.entries.lock();
        entries
            .iter()
            .map(|r| (r.name.clone(), r.cache.stats()))
            .collect()
    }

    pub fn cache_names(&self) -> Vec<String> {
        self.entries.lock().iter().map(|r| r.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_cache(n: u32) -> Arc<BoundedLru<u32, u32>> {
        let cache = Arc::new(BoundedLru::new(64, None));
        for i in 0..n {
            cache.put(i, i);
        }
        cache
    }

    #[test]
    fn test_clear_all_reports_counts() {
        let registry = CacheRegistry::new();
        registry.register("a", priority::METADATA, filled_cache(3));
        registry.register("b", priority::TRANSCRIPTS, filled_cache(5));

        let results = registry.clear_all();
        assert_eq!(results["a"], 3);
        assert_eq!(results["b"], 5);
    }

    #[test]
    fn test_pressure_clear_respects_priority_and_predicate() {
        let registry = CacheRegistry::new();
        let meta = filled_cache(4);
        let transcripts = filled_cache(4);
        registry.register("metadata", priority::METADATA, meta.clone());
        registry.register("transcripts", priority::TRANSCRIPTS, transcripts.clone());

        // Pressure abates after one cache is dropped
        let calls = std::sync::atomic::AtomicU32::new(0);
        let results = registry.pressure_clear(&|| {
            calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0
        });

        // Only the transcripts cache (lowest priority value) was cleared
        assert_eq!(results.len(), 1);
        assert_eq!(results["transcripts"], 4);
        assert_eq!(transcripts.len(), 0);
        assert_eq!(meta.len(), 4);
    }

    #[test]
    fn test_pressure_clear_drains_everything_under_sustained_pressure() {
        let registry = CacheRegistry::new();
        registry.register("a", priority::TOKEN_COUNTS, filled_cache(2));
        registry.register("b", priority::LISTING_PAGES, filled_cache(2));

        let results = registry.pressure_clear(&|| true);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn test_reregistration_replaces() {
        let registry = CacheRegistry::new();
        registry.register("a", priority::METADATA, filled_cache(1));
        registry.register("a", priority::TRANSCRIPTS, filled_cache(2));
        assert_eq!(registry.cache_names().len(), 1);
        assert_eq!(registry.clear_all()["a"], 2);
    }

    #[test]
    fn test_stats_snapshot() {
        let registry = CacheRegistry::new();
        let cache = filled_cache(3);
        cache.get(&0);
        registry.register("a", priority::METADATA, cache);

        let stats = registry.stats();
        assert_eq!(stats["a"].size, 3);
        assert_eq!(stats["a"].hits, 1);
    }
}
