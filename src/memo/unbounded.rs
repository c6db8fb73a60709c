//! Unbounded memoization cache with strong or weak keys.
//!
//! With [`WeakKeys`](crate::retention::WeakKeys) an entry lives as long as its
//! key has strong references elsewhere. Reclaimed slots stay in the table
//! (shown as `<empty slot>` in the debug view) until a prune pass: an explicit
//! [`prune`](UnboundedCache::prune), a trim, or insertion pressure once the
//! table has doubled since the last pass.

use super::{MemoCore, MemoFn, MemoizationCache, Removed, Segment, Trimmable};
use crate::config::MemoOptions;
use crate::entry::MemoEntry;
use crate::error::{CacheResult, MemoError};
use crate::metrics::CacheMetrics;
use crate::retention::{KeyRetention, StrongKeys};
use core::fmt::{self, Debug, Write};
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;
use tracing::trace;

const MIN_PRUNE_THRESHOLD: usize = 16;

struct Slot<H, V, E> {
    held: H,
    entry: MemoEntry<V, E>,
    seq: u64,
}

pub(crate) struct UnboundedSegment<K, V, E, H: KeyRetention<K>> {
    slots: HashMap<H::Lookup, Slot<H::Held, V, E>>,
    next_seq: u64,
    prune_threshold: usize,
}

impl<K, V, E, H: KeyRetention<K>> UnboundedSegment<K, V, E, H> {
    pub(crate) fn new() -> Self {
        Self {
            slots: HashMap::new(),
            next_seq: 0,
            prune_threshold: MIN_PRUNE_THRESHOLD,
        }
    }
}

impl<K, V, E, H> Segment<K, V, E> for UnboundedSegment<K, V, E, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    H: KeyRetention<K>,
{
    fn lookup(&mut self, key: &K) -> Option<&mut MemoEntry<V, E>> {
        let slots = &mut self.slots;
        H::with_lookup(key, move |lookup| slots.get_mut(lookup)).map(|slot| &mut slot.entry)
    }

    fn insert(&mut self, key: K, entry: MemoEntry<V, E>) -> Removed {
        let mut removed = Removed::default();
        if H::RECLAIMABLE && self.slots.len() >= self.prune_threshold {
            removed.pruned = self.prune();
            self.prune_threshold = (self.slots.len() * 2).max(MIN_PRUNE_THRESHOLD);
        }

        let (lookup, held) = H::split(key);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(lookup, Slot { held, entry, seq });
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
        if !H::RECLAIMABLE {
            return 0;
        }
        let before = self.slots.len();
        self.slots.retain(|_, slot| !H::is_reclaimed(&slot.held));
        let pruned = before - self.slots.len();
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

/// Memoization cache without a capacity bound.
///
/// Trimming is offered only while metrics are enabled.
pub struct UnboundedCache<K, V, E, H: KeyRetention<K> = StrongKeys> {
    core: MemoCore<K, V, E, UnboundedSegment<K, V, E, H>>,
}

impl<K, V, E, H> UnboundedCache<K, V, E, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    H: KeyRetention<K>,
{
    /// Creates an empty cache around `func`.
    pub fn new(func: MemoFn<K, V, E>, options: MemoOptions) -> Self {
        Self {
            core: MemoCore::new("UNBOUNDED", UnboundedSegment::new(), func, options),
        }
    }

    /// Compacts reclaimed weak slots out of the table and returns how many
    /// were removed. Always zero for strong keys.
    pub fn prune(&self) -> CacheResult<usize> {
        self.core.prune()
    }
}

impl<K, V, E, H> MemoizationCache<K, V, E> for UnboundedCache<K, V, E, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
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
        if self.core.options().enable_metrics {
            Some(&self.core)
        } else {
            None
        }
    }

    fn dispose(&self) {
        self.core.dispose();
    }
}

impl<K, V, E, H> CacheMetrics for UnboundedCache<K, V, E, H>
where
    K: Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    H: KeyRetention<K>,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.core.metrics()
    }

    fn algorithm_name(&self) -> &'static str {
        "UNBOUNDED"
    }
}

impl<K, V, E, H: KeyRetention<K>> fmt::Debug for UnboundedCache<K, V, E, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedCache")
            .field("core", &self.core)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::retention::WeakKeys;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting<K: 'static>(
        calls: &Arc<AtomicUsize>,
        f: impl Fn(&K) -> Result<u64, String> + Send + Sync + 'static,
    ) -> MemoFn<K, u64, String> {
        let calls = Arc::clone(calls);
        Arc::new(move |k: &K| {
            calls.fetch_add(1, Ordering::SeqCst);
            f(k)
        })
    }

    #[test]
    fn test_unbounded_memoizes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<u64, u64, String> =
            UnboundedCache::new(counting(&calls, |x: &u64| Ok(x * x)), MemoOptions::default());
        assert_eq!(cache.get_or_add(3), Ok(9));
        assert_eq!(cache.get_or_add(3), Ok(9));
        assert_eq!(cache.get_or_add(4), Ok(16));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.metrics().get("cache_hits"), Some(&1.0));
    }

    #[test]
    fn test_trimmer_requires_metrics() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<u64, u64, String> = UnboundedCache::new(
            counting(&calls, |x: &u64| Ok(*x)),
            MemoOptions::default().with_metrics(false),
        );
        assert!(cache.trimmer().is_none());
    }

    #[test]
    fn test_trim_by_value_and_outcome() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<u64, u64, String> = UnboundedCache::new(
            counting(&calls, |x: &u64| if x % 2 == 0 { Ok(*x) } else { Err(format!("odd {x}")) }),
            MemoOptions::default().with_cache_errors(true),
        );
        for i in 0..6 {
            let _ = cache.get_or_add(i);
        }
        assert_eq!(cache.len(), 6);

        let trimmer = cache.trimmer().unwrap();
        assert_eq!(trimmer.trim_by_value(&mut |_, v| *v >= 2).unwrap(), 2);
        assert_eq!(cache.len(), 4);
        assert_eq!(trimmer.trim_by_outcome(&mut |_, o| o.is_err()).unwrap(), 3);
        assert_eq!(cache.len(), 1);
        assert_eq!(trimmer.trim_by_metrics(&mut |_, m| m.hit_count == 1).unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_trim_predicate_may_reenter_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<u64, u64, String> =
            UnboundedCache::new(counting(&calls, |x: &u64| Ok(*x)), MemoOptions::default());
        for i in 0..4 {
            cache.get_or_add(i).unwrap();
        }

        let mut first_len = None;
        let removed = cache
            .trimmer()
            .unwrap()
            .trim_by_value(&mut |k, _| {
                first_len.get_or_insert(cache.len());
                assert!(cache.debug_view().starts_with("UNBOUNDED cache: "));
                cache.get_or_add(100).unwrap();
                *k < 2
            })
            .unwrap();

        assert_eq!(removed, 2);
        assert_eq!(first_len, Some(4));
        // 2, 3 and the key stored from inside the predicate.
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get_or_add(100), Ok(100));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_dispose_faults_every_use() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<u64, u64, String> =
            UnboundedCache::new(counting(&calls, |x: &u64| Ok(*x)), MemoOptions::default());
        cache.get_or_add(1).unwrap();
        cache.dispose();
        assert_eq!(cache.len(), 0);
        for _ in 0..2 {
            assert_eq!(
                cache.get_or_add(1),
                Err(MemoError::Cache(CacheError::Disposed))
            );
        }
        assert_eq!(cache.clear(), Err(CacheError::Disposed));
        assert_eq!(
            cache.trimmer().unwrap().trim_by_value(&mut |_, _| true),
            Err(CacheError::Disposed)
        );
    }

    #[test]
    fn test_weak_keys_prune_after_reclaim() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<Arc<String>, u64, String, WeakKeys> = UnboundedCache::new(
            counting(&calls, |s: &Arc<String>| Ok(s.len() as u64)),
            MemoOptions::default().with_metrics(false),
        );
        let a = Arc::new("abc".to_string());
        let b = Arc::new("de".to_string());
        assert_eq!(cache.get_or_add(Arc::clone(&a)), Ok(3));
        assert_eq!(cache.get_or_add(Arc::clone(&b)), Ok(2));
        assert_eq!(cache.get_or_add(Arc::clone(&a)), Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        drop(b);
        // Reclaimed slots linger until the next prune.
        assert_eq!(cache.len(), 2);
        assert!(cache.debug_view().contains("<empty slot>"));
        assert_eq!(cache.prune(), Ok(1));
        assert_eq!(cache.len(), 1);
        assert!(!cache.debug_view().contains("<empty slot>"));
    }

    #[test]
    fn test_weak_keys_use_identity() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<Arc<String>, u64, String, WeakKeys> = UnboundedCache::new(
            counting(&calls, |s: &Arc<String>| Ok(s.len() as u64)),
            MemoOptions::default(),
        );
        let a = Arc::new("abc".to_string());
        let a_copy = Arc::new("abc".to_string());
        cache.get_or_add(Arc::clone(&a)).unwrap();
        cache.get_or_add(Arc::clone(&a_copy)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_debug_view_lists_entries_in_insertion_order() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache: UnboundedCache<u64, u64, String> = UnboundedCache::new(
            counting(&calls, |x: &u64| Ok(x + 1)),
            MemoOptions::default().with_metrics(false),
        );
        cache.get_or_add(5).unwrap();
        cache.get_or_add(1).unwrap();
        assert_eq!(
            cache.debug_view(),
            "UNBOUNDED cache: 2 entries\n  5 -> Ok(6)\n  1 -> Ok(2)\n"
        );
    }
}
