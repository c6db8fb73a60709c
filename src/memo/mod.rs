//! Memoization Caches
//!
//! A memoization cache wraps a function `Fn(&K) -> Result<V, E>` and stores
//! the outcome per key. [`get_or_add`](MemoizationCache::get_or_add) answers
//! from the cache on a hit and invokes the function on a miss.
//!
//! | Cache | Bound | Keys | Trimming |
//! |-------|-------|------|----------|
//! | [`NopCache`] | stores nothing | - | no |
//! | [`UnboundedCache`] | none | strong or weak | when metrics are on |
//! | [`LruCache`] | `capacity`, evicts one | strong | yes |
//! | [`RankedCache`] | `capacity`, evicts in bulk | strong or weak | yes |
//!
//! # Error Caching
//!
//! A failing call is never stored unless
//! [`MemoOptions::cache_errors`] is set. With error caching on, the first
//! failure is stored like a value and replayed on every later lookup without
//! re-invoking the function. A cached failure counts toward capacity and is
//! evictable and trimmable like any value.
//!
//! # Thread Safety
//!
//! The caches in this module are `Send` but not `Sync`. Share them between
//! threads through the adapters in the `concurrent` module.

use crate::config::MemoOptions;
use crate::entry::MemoEntry;
use crate::error::{CacheError, CacheResult, MemoError};
use crate::metrics::{CoreCacheMetrics, EntryMetrics};
use core::cell::{Cell, RefCell};
use core::fmt::{self, Debug, Write};
use core::hash::Hash;
use core::marker::PhantomData;
use core::time::Duration;
use hashbrown::HashSet;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

mod factory;
mod lru;
mod nop;
mod ranked;
mod unbounded;

pub use factory::{
    LruFactory, MemoizationCacheFactory, NopFactory, RankedFactory, UnboundedFactory,
    WeakMemoizationCacheFactory,
};
pub use lru::LruCache;
pub use nop::NopCache;
pub use ranked::{RankedCache, Ranker};
pub use unbounded::UnboundedCache;

#[cfg(feature = "concurrent")]
pub(crate) use self::{lru::LruSegment, ranked::RankedSegment, unbounded::UnboundedSegment};

/// A memoized function.
pub type MemoFn<K, V, E> = Arc<dyn Fn(&K) -> Result<V, E> + Send + Sync>;

/// Bounds on strongly held memoization keys.
pub trait CacheKey: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

impl<T> CacheKey for T where T: Hash + Eq + Clone + Debug + Send + Sync + 'static {}

/// Bounds on memoized values and errors.
pub trait CacheValue: Clone + Debug + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Debug + Send + Sync + 'static {}

/// Common interface of all memoization caches.
pub trait MemoizationCache<K, V, E> {
    /// Returns the stored outcome for `key`, invoking the function on a miss.
    fn get_or_add(&self, key: K) -> Result<V, MemoError<E>>;

    /// Number of stored entries.
    fn len(&self) -> usize;

    /// `true` if nothing is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every entry.
    fn clear(&self) -> CacheResult<()>;

    /// Human-readable listing of entries and their metrics.
    fn debug_view(&self) -> String;

    /// Trimming service, if this cache offers one.
    fn trimmer(&self) -> Option<&dyn Trimmable<K, V, E>> {
        None
    }

    /// Discards every entry and makes all further operations fail with
    /// [`CacheError::Disposed`].
    fn dispose(&self);
}

/// Predicate-driven removal of stored entries.
///
/// Each method removes every live entry the predicate accepts and returns how
/// many were removed.
pub trait Trimmable<K, V, E> {
    /// Removes successful entries whose key and value match.
    fn trim_by_value(&self, pred: &mut dyn FnMut(&K, &V) -> bool) -> CacheResult<usize>;

    /// Removes entries whose key and outcome match, cached failures included.
    fn trim_by_outcome(&self, pred: &mut dyn FnMut(&K, &Result<V, E>) -> bool)
        -> CacheResult<usize>;

    /// Removes entries whose key and metrics match.
    fn trim_by_metrics(&self, pred: &mut dyn FnMut(&K, &EntryMetrics) -> bool)
        -> CacheResult<usize>;
}

/// Entries dropped by a segment operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Removed {
    /// Removed by policy or predicate.
    pub(crate) evicted: usize,
    /// Removed because the key was reclaimed.
    pub(crate) pruned: usize,
}

/// Storage policy behind a [`MemoCore`].
pub(crate) trait Segment<K, V, E> {
    fn lookup(&mut self, key: &K) -> Option<&mut MemoEntry<V, E>>;

    fn insert(&mut self, key: K, entry: MemoEntry<V, E>) -> Removed;

    fn len(&self) -> usize;

    fn clear(&mut self);

    /// Copies out every live entry with the sequence number it was stored
    /// under. Reclaimed slots are skipped.
    fn snapshot(&self) -> Vec<(u64, K, MemoEntry<V, E>)>;

    /// Removes the entries stored under `marks` that are still present.
    fn remove_marked(&mut self, marks: &HashSet<u64>) -> usize;

    /// Compacts reclaimed slots out of the table.
    fn prune(&mut self) -> usize;

    fn write_entries(&self, out: &mut String, with_metrics: bool) -> fmt::Result;
}

/// Lookup, invocation and bookkeeping shared by every storing cache.
pub(crate) struct MemoCore<K, V, E, S> {
    name: &'static str,
    segment: RefCell<S>,
    func: MemoFn<K, V, E>,
    options: MemoOptions,
    stats: RefCell<CoreCacheMetrics>,
    disposed: Cell<bool>,
    _marker: PhantomData<fn(K) -> Result<V, E>>,
}

impl<K, V, E, S> MemoCore<K, V, E, S>
where
    V: Clone + Debug,
    E: Clone + Debug,
    S: Segment<K, V, E>,
{
    pub(crate) fn new(
        name: &'static str,
        segment: S,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> Self {
        Self {
            name,
            segment: RefCell::new(segment),
            func,
            options,
            stats: RefCell::new(CoreCacheMetrics::new()),
            disposed: Cell::new(false),
            _marker: PhantomData,
        }
    }

    pub(crate) fn options(&self) -> &MemoOptions {
        &self.options
    }

    fn now(&self) -> Duration {
        if self.options.enable_metrics {
            self.options.clock.now()
        } else {
            Duration::ZERO
        }
    }

    fn check_live(&self) -> CacheResult<()> {
        if self.disposed.get() {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn get_or_add(&self, key: K) -> Result<V, MemoError<E>> {
        self.check_live()?;
        let start = self.now();

        {
            let mut segment = self.segment.borrow_mut();
            if let Some(entry) = segment.lookup(&key) {
                let now = self.now();
                entry.metrics.record_access(now.saturating_sub(start), now);
                let outcome = entry.outcome.clone();
                drop(segment);
                self.stats.borrow_mut().record_hit();
                return outcome.map_err(MemoError::Invoke);
            }
        }

        // The segment is not borrowed here, so the function may call back
        // into this cache.
        let outcome = (self.func)(&key);
        let invoked = self.now();
        self.stats.borrow_mut().record_miss(outcome.is_err());

        if (outcome.is_ok() || self.options.cache_errors) && !self.disposed.get() {
            let mut metrics = EntryMetrics::new(start, invoked.saturating_sub(start));
            let now = self.now();
            metrics.record_access(now.saturating_sub(start), now);

            let mut segment = self.segment.borrow_mut();
            // A recursive call may already have stored this key.
            if segment.lookup(&key).is_none() {
                let removed = segment.insert(key, MemoEntry::new(outcome.clone(), metrics));
                drop(segment);
                let mut stats = self.stats.borrow_mut();
                stats.record_insertion();
                stats.record_evictions(removed.evicted);
                stats.record_pruned(removed.pruned);
            }
        }

        outcome.map_err(MemoError::Invoke)
    }

    pub(crate) fn len(&self) -> usize {
        self.segment.borrow().len()
    }

    pub(crate) fn clear(&self) -> CacheResult<()> {
        self.check_live()?;
        self.segment.borrow_mut().clear();
        debug!(cache = self.name, "memoization cache cleared");
        Ok(())
    }

    pub(crate) fn dispose(&self) {
        if self.disposed.replace(true) {
            return;
        }
        self.segment.borrow_mut().clear();
        debug!(cache = self.name, "memoization cache disposed");
    }

    pub(crate) fn prune(&self) -> CacheResult<usize> {
        self.check_live()?;
        let pruned = self.segment.borrow_mut().prune();
        self.stats.borrow_mut().record_pruned(pruned);
        Ok(pruned)
    }

    pub(crate) fn debug_view(&self) -> String {
        let segment = self.segment.borrow();
        let mut out = String::new();
        let _ = writeln!(out, "{} cache: {} entries", self.name, segment.len());
        let _ = segment.write_entries(&mut out, self.options.enable_metrics);
        out
    }

    pub(crate) fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.stats.borrow().to_btreemap();
        metrics.insert("len".to_string(), self.len() as f64);
        metrics
    }

    /// Removes every entry `doomed` accepts.
    ///
    /// The predicate runs against a snapshot with the segment unborrowed, so
    /// it may call back into this cache.
    fn trim(&self, doomed: &mut dyn FnMut(&K, &MemoEntry<V, E>) -> bool) -> CacheResult<usize> {
        self.check_live()?;
        let pruned = self.segment.borrow_mut().prune();
        let snapshot = self.segment.borrow().snapshot();
        let marks: HashSet<u64> = snapshot
            .into_iter()
            .filter_map(|(seq, key, entry)| doomed(&key, &entry).then_some(seq))
            .collect();
        let removed = if marks.is_empty() {
            0
        } else {
            self.segment.borrow_mut().remove_marked(&marks)
        };
        let mut stats = self.stats.borrow_mut();
        stats.record_trimmed(removed);
        stats.record_pruned(pruned);
        Ok(removed)
    }
}

impl<K, V, E, S> Trimmable<K, V, E> for MemoCore<K, V, E, S>
where
    V: Clone + Debug,
    E: Clone + Debug,
    S: Segment<K, V, E>,
{
    fn trim_by_value(&self, pred: &mut dyn FnMut(&K, &V) -> bool) -> CacheResult<usize> {
        self.trim(&mut |key, entry| match &entry.outcome {
            Ok(value) => pred(key, value),
            Err(_) => false,
        })
    }

    fn trim_by_outcome(
        &self,
        pred: &mut dyn FnMut(&K, &Result<V, E>) -> bool,
    ) -> CacheResult<usize> {
        self.trim(&mut |key, entry| pred(key, &entry.outcome))
    }

    fn trim_by_metrics(
        &self,
        pred: &mut dyn FnMut(&K, &EntryMetrics) -> bool,
    ) -> CacheResult<usize> {
        self.trim(&mut |key, entry| pred(key, &entry.metrics))
    }
}

impl<K, V, E, S> fmt::Debug for MemoCore<K, V, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoCore")
            .field("name", &self.name)
            .field("options", &self.options)
            .field("stats", &self.stats.borrow())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}
