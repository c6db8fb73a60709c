//! Cache Metrics System
//!
//! Two levels of metrics are kept:
//!
//! - [`EntryMetrics`]: per memoized key (hit count, invocation and access
//!   durations, timestamps). These feed debug views, trimming predicates and
//!   the ranking function of [`RankedCache`](crate::memo::RankedCache).
//! - [`CoreCacheMetrics`]: per cache aggregate counters reported through the
//!   [`CacheMetrics`] trait as a `BTreeMap`, so reports always list metrics in
//!   the same order.

use std::collections::BTreeMap;

pub mod entry;

pub use entry::EntryMetrics;

/// Aggregate counters tracked by every memoization cache.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoreCacheMetrics {
    /// Total number of lookups.
    pub requests: u64,
    /// Lookups answered from the cache.
    pub cache_hits: u64,
    /// Times the memoized function was invoked.
    pub invocations: u64,
    /// Invocations that failed.
    pub failures: u64,
    /// Entries stored.
    pub insertions: u64,
    /// Entries removed by the capacity policy.
    pub evictions: u64,
    /// Entries removed because their weakly held key was reclaimed.
    pub pruned: u64,
    /// Entries removed by trim predicates.
    pub trimmed: u64,
}

impl CoreCacheMetrics {
    /// Creates zeroed metrics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a lookup answered from the cache.
    pub fn record_hit(&mut self) {
        self.requests += 1;
        self.cache_hits += 1;
    }

    /// Records a lookup that had to invoke the function.
    pub fn record_miss(&mut self, failed: bool) {
        self.requests += 1;
        self.invocations += 1;
        if failed {
            self.failures += 1;
        }
    }

    /// Records a stored entry.
    pub fn record_insertion(&mut self) {
        self.insertions += 1;
    }

    /// Records `count` capacity evictions.
    pub fn record_evictions(&mut self, count: usize) {
        self.evictions += count as u64;
    }

    /// Records `count` swept weak slots.
    pub fn record_pruned(&mut self, count: usize) {
        self.pruned += count as u64;
    }

    /// Records `count` entries removed by a trim.
    pub fn record_trimmed(&mut self, count: usize) {
        self.trimmed += count as u64;
    }

    /// Hits divided by requests, or 0.0 before the first request.
    pub fn hit_rate(&self) -> f64 {
        if self.requests > 0 {
            self.cache_hits as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Misses divided by requests, or 0.0 before the first request.
    pub fn miss_rate(&self) -> f64 {
        if self.requests > 0 {
            (self.requests - self.cache_hits) as f64 / self.requests as f64
        } else {
            0.0
        }
    }

    /// Converts the counters to a map with deterministic key order.
    pub fn to_btreemap(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::new();

        metrics.insert("cache_hits".to_string(), self.cache_hits as f64);
        metrics.insert(
            "cache_misses".to_string(),
            (self.requests - self.cache_hits) as f64,
        );
        metrics.insert("evictions".to_string(), self.evictions as f64);
        metrics.insert("failures".to_string(), self.failures as f64);
        metrics.insert("insertions".to_string(), self.insertions as f64);
        metrics.insert("invocations".to_string(), self.invocations as f64);
        metrics.insert("pruned".to_string(), self.pruned as f64);
        metrics.insert("requests".to_string(), self.requests as f64);
        metrics.insert("trimmed".to_string(), self.trimmed as f64);

        metrics.insert("hit_rate".to_string(), self.hit_rate());
        metrics.insert("miss_rate".to_string(), self.miss_rate());

        metrics
    }
}

/// Uniform metrics reporting for every cache implementation.
pub trait CacheMetrics {
    /// Returns all metrics as key-value pairs in deterministic order.
    fn metrics(&self) -> BTreeMap<String, f64>;

    /// Short identifier of the cache policy (e.g. `"LRU"`).
    fn algorithm_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_metrics_rates() {
        let mut metrics = CoreCacheMetrics::new();
        assert_eq!(metrics.hit_rate(), 0.0);
        metrics.record_miss(false);
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss(true);
        assert_eq!(metrics.requests, 4);
        assert_eq!(metrics.invocations, 2);
        assert_eq!(metrics.failures, 1);
        assert_eq!(metrics.hit_rate(), 0.5);
        assert_eq!(metrics.miss_rate(), 0.5);
    }

    #[test]
    fn test_core_metrics_map() {
        let mut metrics = CoreCacheMetrics::new();
        metrics.record_miss(false);
        metrics.record_insertion();
        metrics.record_evictions(3);
        metrics.record_pruned(2);
        let map = metrics.to_btreemap();
        assert_eq!(map.get("cache_misses"), Some(&1.0));
        assert_eq!(map.get("evictions"), Some(&3.0));
        assert_eq!(map.get("pruned"), Some(&2.0));
        assert_eq!(map.get("insertions"), Some(&1.0));
        let keys: Vec<_> = map.keys().cloned().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }
}
