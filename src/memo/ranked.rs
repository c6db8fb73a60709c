//! Metric-Ranked Bulk-Evicting Memoization Cache
//!
//! Keeps at most `capacity` slots. When a new key arrives at a full cache:
//!
//! 1. reclaimed weak slots are swept out;
//! 2. if the cache is still full, live entries are ranked by the configured
//!    [`Ranker`] over their [`EntryMetrics`] and the worst ranked ones are
//!    evicted until occupancy is at most
//!    [`target_occupancy`](RankedCacheConfig::target_occupancy).
//!
//! Evicting many entries at once amortizes the cost of ranking. Equal ranks
//! are broken by insertion order, older entries first. A key that is stored
//! again after being evicted or pruned starts with fresh metrics.
//!
//! ```text
//! capacity 4, load factor 1.0, rank = hit count, evict lowest
//!
//!   key:   1  2  3  4          insert 5
//!   hits:  3  1  2  4    ──▶   1  3  4  5      (2 evicted)
//! ```

use super::{MemoCore, MemoFn, MemoizationCache, Removed, Segment, Trimmable};
use crate::config::{EvictionOrder, MemoOptions, RankedCacheConfig};
use crate::entry::MemoEntry;
use crate::error::{CacheResult, MemoError};
use crate::metrics::{CacheMetrics, EntryMetrics};
use crate::retention::{KeyRetention, StrongKeys};
use core::cmp::Ordering;
use core::fmt::{self, Debug, Write};
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Ranking function over entry metrics.
pub type Ranker<R> = Arc<dyn Fn(&EntryMetrics) -> R + Send + Sync>;

struct RankedSlot<H, V, E> {
    held: H,
    entry: MemoEntry<V, E>,
    seq: u64,
}

pub(crate) struct RankedSegment<K, V, E, R, H: KeyRetention<K>> {
    slots: HashMap<H::Lookup, RankedSlot<H::Held, V, E>>,
    config: RankedCacheConfig,
    target: usize,
    ranker: Ranker<R>,
    next_seq: u64,
}

impl<K, V, E, R, H: KeyRetention<K>> RankedSegment<K, V, E, R, H>
where
    R: PartialOrd,
{
    pub(crate) fn new(config: RankedCacheConfig, ranker: Ranker<R>) -> Self {
        Self {
            slots: HashMap::with_capacity(config.capacity.get()),
            target: config.target_occupancy(),
            config,
            ranker,
            next_seq: 0,
        }
    }

    fn sweep(&mut self) -> usize {
        if !H::RECLAIMABLE {
            return 0;
        }
        let before = self.slots.len();
        self.slots.retain(|_, slot| !H::is_reclaimed(&slot.held));
        before - self.slots.len()
    }

    /// Evicts the worst ranked entries down to the target occupancy.
    fn evict_ranked(&mut self) -> usize {
        let excess = self.slots.len().saturating_sub(self.target);
        if excess == 0 {
            return 0;
        }

        let mut ranked: Vec<(R, u64, H::Lookup)> = self
            .slots
            .iter()
            .map(|(lookup, slot)| ((self.ranker)(&slot.entry.metrics), slot.seq, lookup.clone()))
            .collect();

        let order = self.config.order;
        ranked.sort_by(|a, b| {
            let by_rank = a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal);
            let by_rank = match order {
                EvictionOrder::Lowest => by_rank,
                EvictionOrder::Highest => by_rank.reverse(),
            };
            by_rank.then(a.1.cmp(&b.1))
        });

        for (_, _, lookup) in ranked.into_iter().take(excess) {
            self.slots.remove(&lookup);
        }
        excess
    }
}

impl<K, V, E, R, H> Segment<K, V, E> for RankedSegment<K, V, E, R, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    R: PartialOrd,
    H: KeyRetention<K>,
{
    fn lookup(&mut self, key: &K) -> Option<&mut MemoEntry<V, E>> {
        let slots = &mut self.slots;
        H::with_lookup(key, move |lookup| slots.get_mut(lookup)).map(|slot| &mut slot.entry)
    }

    fn insert(&mut self, key: K, entry: MemoEntry<V, E>) -> Removed {
        let mut removed = Removed::default();
        if self.slots.len() >= self.config.capacity.get() {
            removed.pruned = self.sweep();
            if self.slots.len() >= self.config.capacity.get() {
                removed.evicted = self.evict_ranked();
            }
            trace!(
                pruned = removed.pruned,
                evicted = removed.evicted,
                len = self.slots.len(),
                "ranked cache made room"
            );
        }

        let (lookup, held) = H::split(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(lookup, RankedSlot { held, entry, seq });
        removed
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn clear(&mut self) {
        self.slots.clear();
    }

    fn snapshot(&self) -> Vec<(u64, K, MemoEntry<V, E>)> {
        self.slots
            .iter()
            .filter_map(|(lookup, slot)| {
                H::with_key(lookup, &slot.held, |key| (slot.seq, key.clone(), slot.entry.clone()))
            })
            .collect()
    }

    fn remove_marked(&mut self, marks: &HashSet<u64>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !marks.contains(&slot.seq));
        before - self.slots.len()
    }

    fn prune(&mut self) -> usize {
        let pruned = self.sweep();
        if pruned > 0 {
            trace!(pruned, len = self.slots.len(), "pruned reclaimed slots");
        }
        pruned
    }

    fn write_entries(&self, out: &mut String, with_metrics: bool) -> fmt::Result {
        let mut slots: Vec<_> = self.slots.iter().collect();
        slots.sort_by_key(|(_, slot)| slot.seq);
        for (lookup, slot) in slots {
            match H::with_key(lookup, &slot.held, |key| {
                slot.entry.write_line(out, key, with_metrics)
            }) {
                Some(written) => written?,
                None => writeln!(out, "  <empty slot>")?,
            }
        }
        Ok(())
    }
}

/// Memoization cache with metric-ranked bulk eviction.
///
/// Metrics are always tracked, whatever [`MemoOptions::enable_metrics`] says,
/// since they drive eviction.
///
/// # Examples
///
/// ```
/// use memocache::config::{MemoOptions, RankedCacheConfig};
/// use memocache::memo::{MemoizationCache, RankedCache};
/// use core::num::NonZeroUsize;
/// use std::sync::Arc;
///
/// let config = RankedCacheConfig::new(NonZeroUsize::new(4).unwrap(), 0.5);
/// let cache: RankedCache<u32, u32, (), u64> = RankedCache::init(
///     config,
///     Arc::new(|m: &memocache::metrics::EntryMetrics| m.hit_count),
///     Arc::new(|x: &u32| Ok::<_, ()>(x + 1)),
///     MemoOptions::default(),
/// )
/// .unwrap();
///
/// for k in 0..5 {
///     cache.get_or_add(k).unwrap();
/// }
/// // The fifth key trimmed the cache to 2 entries before being stored.
/// assert_eq!(cache.len(), 3);
/// ```
pub struct RankedCache<K, V, E, R, H: KeyRetention<K> = StrongKeys> {
    core: MemoCore<K, V, E, RankedSegment<K, V, E, R, H>>,
    config: RankedCacheConfig,
}

impl<K, V, E, R, H> RankedCache<K, V, E, R, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    R: PartialOrd,
    H: KeyRetention<K>,
{
    /// Creates a ranked cache, rejecting an invalid configuration.
    pub fn init(
        config: RankedCacheConfig,
        ranker: Ranker<R>,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self> {
        config.validate()?;
        debug!(
            capacity = config.capacity.get(),
            load_factor = config.load_factor,
            target = config.target_occupancy(),
            order = ?config.order,
            "ranked memoization cache configured"
        );
        let options = options.with_metrics(true);
        Ok(Self {
            core: MemoCore::new("RANKED", RankedSegment::new(config, ranker), func, options),
            config,
        })
    }

    /// The configuration this cache was built with.
    pub fn config(&self) -> &RankedCacheConfig {
        &self.config
    }

    /// Compacts reclaimed weak slots out of the table and returns how many
    /// were removed. Always zero for strong keys.
    pub fn prune(&self) -> CacheResult<usize> {
        self.core.prune()
    }
}

impl<K, V, E, R, H> MemoizationCache<K, V, E> for RankedCache<K, V, E, R, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    R: PartialOrd,
    H: KeyRetention<K>,
{
    fn get_or_add(&self, key: K) -> Result<V, MemoError<E>> {
        self.core.get_or_add(key)
    }

    fn len(&self) -> usize {
        self.core.len()
    }

    fn clear(&self) -> CacheResult<()> {
        self.core.clear()
    }

    fn debug_view(&self) -> String {
        self.core.debug_view()
    }

    fn trimmer(&self) -> Option<&dyn Trimmable<K, V, E>> {
        Some(&self.core)
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl<K, V, E, R, H> CacheMetrics for RankedCache<K, V, E, R, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    R: PartialOrd,
    H: KeyRetention<K>,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.metrics();
        metrics.insert("capacity".to_string(), self.config.capacity.get() as f64);
        metrics.insert("load_factor".to_string(), self.config.load_factor);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "RANKED"
    }
}

impl<K, V, E, R, H: KeyRetention<K>> fmt::Debug for RankedCache<K, V, E, R, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedCache")
            .field("config", &self.config)
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::error::CacheError;
    use crate::retention::WeakKeys;
    use core::num::NonZeroUsize;
    use core::time::Duration;

    fn by_hits() -> Ranker<u64> {
        Arc::new(|m: &EntryMetrics| m.hit_count)
    }

    fn ranked(cap: usize, load_factor: f64) -> RankedCache<u32, u32, String, u64> {
        RankedCache::init(
            RankedCacheConfig::new(NonZeroUsize::new(cap).unwrap(), load_factor),
            by_hits(),
            Arc::new(|x: &u32| Ok(*x)),
            MemoOptions::default(),
        )
        .unwrap()
    }

    fn stored(cache: &RankedCache<u32, u32, String, u64>) -> Vec<u32> {
        let mut keys = Vec::new();
        cache
            .trimmer()
            .unwrap()
            .trim_by_value(&mut |k, _| {
                keys.push(*k);
                false
            })
            .unwrap();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn test_rejects_bad_load_factor() {
        let result: CacheResult<RankedCache<u32, u32, String, u64>> = RankedCache::init(
            RankedCacheConfig::new(NonZeroUsize::new(4).unwrap(), 0.0),
            by_hits(),
            Arc::new(|x: &u32| Ok(*x)),
            MemoOptions::default(),
        );
        assert!(matches!(result, Err(CacheError::InvalidArgument(_))));
    }

    #[test]
    fn test_evicts_single_lowest_hit_entry() {
        let cache = ranked(4, 1.0);
        for (key, hits) in [(1, 3), (2, 1), (3, 2), (4, 4)] {
            for _ in 0..hits {
                cache.get_or_add(key).unwrap();
            }
        }
        cache.get_or_add(5).unwrap();
        assert_eq!(stored(&cache), vec![1, 3, 4, 5]);
        assert_eq!(cache.metrics().get("evictions"), Some(&1.0));
    }

    #[test]
    fn test_bulk_eviction_trims_to_load_factor() {
        let cache = ranked(4, 0.5);
        for key in 1..=4 {
            cache.get_or_add(key).unwrap();
        }
        assert_eq!(cache.len(), 4);
        cache.get_or_add(5).unwrap();
        // Down to floor(4 * 0.5) = 2, then 5 is stored. Ties go oldest first.
        assert_eq!(stored(&cache), vec![3, 4, 5]);
    }

    #[test]
    fn test_highest_order_evicts_most_used() {
        let cache: RankedCache<u32, u32, String, u64> = RankedCache::init(
            RankedCacheConfig::new(NonZeroUsize::new(2).unwrap(), 1.0)
                .with_order(EvictionOrder::Highest),
            by_hits(),
            Arc::new(|x: &u32| Ok(*x)),
            MemoOptions::default(),
        )
        .unwrap();
        cache.get_or_add(1).unwrap();
        cache.get_or_add(1).unwrap();
        cache.get_or_add(2).unwrap();
        cache.get_or_add(3).unwrap();
        assert_eq!(stored(&cache), vec![2, 3]);
    }

    #[test]
    fn test_rank_by_last_access() {
        let clock = Arc::new(VirtualClock::new());
        let cache: RankedCache<u32, u32, String, Duration> = RankedCache::init(
            RankedCacheConfig::new(NonZeroUsize::new(3).unwrap(), 1.0),
            Arc::new(|m: &EntryMetrics| m.last_access),
            Arc::new(|x: &u32| Ok(*x)),
            MemoOptions::default().with_clock(clock.clone()),
        )
        .unwrap();
        for key in [1, 2, 3] {
            cache.get_or_add(key).unwrap();
            clock.advance(Duration::from_millis(1));
        }
        cache.get_or_add(1).unwrap();
        clock.advance(Duration::from_millis(1));
        cache.get_or_add(4).unwrap();
        // 2 was the least recently accessed.
        assert!(!cache.debug_view().contains("  2 -> "));
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_cached_errors_count_toward_capacity() {
        let cache: RankedCache<u32, u32, String, u64> = RankedCache::init(
            RankedCacheConfig::new(NonZeroUsize::new(2).unwrap(), 1.0),
            by_hits(),
            Arc::new(|x: &u32| if *x % 2 == 1 { Err(format!("odd {x}")) } else { Ok(*x) }),
            MemoOptions::default().with_cache_errors(true),
        )
        .unwrap();
        assert!(cache.get_or_add(1).is_err());
        cache.get_or_add(2).unwrap();
        cache.get_or_add(2).unwrap();
        assert_eq!(cache.len(), 2);
        cache.get_or_add(4).unwrap();
        // The failure had the fewest hits and was evicted.
        assert_eq!(cache.len(), 2);
        assert!(!cache.debug_view().contains("odd 1"));
    }

    #[test]
    fn test_weak_slots_are_swept_before_ranking() {
        let cache: RankedCache<Arc<String>, usize, String, u64, WeakKeys> = RankedCache::init(
            RankedCacheConfig::new(NonZeroUsize::new(2).unwrap(), 1.0),
            by_hits(),
            Arc::new(|s: &Arc<String>| Ok(s.len())),
            MemoOptions::default(),
        )
        .unwrap();

        let keep = Arc::new("keep".to_string());
        let gone = Arc::new("gone!".to_string());
        cache.get_or_add(Arc::clone(&keep)).unwrap();
        cache.get_or_add(Arc::clone(&gone)).unwrap();
        cache.get_or_add(Arc::clone(&gone)).unwrap();
        drop(gone);

        assert!(cache.debug_view().contains("<empty slot>"));
        assert_eq!(cache.len(), 2);

        let fresh = Arc::new("fresh".to_string());
        cache.get_or_add(Arc::clone(&fresh)).unwrap();
        // The reclaimed slot made room, so nothing live was evicted.
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().get("evictions"), Some(&0.0));
        assert_eq!(cache.metrics().get("pruned"), Some(&1.0));
        assert!(!cache.debug_view().contains("<empty slot>"));
    }

    #[test]
    fn test_explicit_prune() {
        let cache: RankedCache<Arc<u8>, u8, (), u64, WeakKeys> = RankedCache::init(
            RankedCacheConfig::new(NonZeroUsize::new(8).unwrap(), 0.5),
            by_hits(),
            Arc::new(|x: &Arc<u8>| Ok(**x)),
            MemoOptions::default(),
        )
        .unwrap();
        let a = Arc::new(1);
        cache.get_or_add(Arc::clone(&a)).unwrap();
        cache.get_or_add(Arc::new(2)).unwrap();
        assert_eq!(cache.prune(), Ok(1));
        assert_eq!(cache.len(), 1);
    }
}
