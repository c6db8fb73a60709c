//! Concurrent memoization cache with per-key coordination.
//!
//! Keys are partitioned across independently locked shards. Each shard keeps
//! settled outcomes in the same segment storage the single-threaded caches
//! use (unbounded, LRU or ranked) and in-flight keys in a table of cells:
//!
//! - The first caller of a key registers a `Pending` cell, releases the shard
//!   lock and invokes the function.
//! - Later callers of the same key wait on the cell's condition variable.
//!   Callers of other keys never wait.
//! - The owner stores the outcome in the shard's segment, which applies that
//!   segment's eviction policy, and wakes the waiters.
//! - A failure that is not cached and a panicking invocation are never
//!   stored, so the next caller invokes again.
//!
//! A bounded cache splits its capacity evenly across shards, rounding up.
//!
//! Locks are always taken shard first, then cell.

use crate::config::{ConcurrentCacheConfig, LruCacheConfig, MemoOptions, RankedCacheConfig};
use crate::entry::MemoEntry;
use crate::error::{CacheError, CacheResult, MemoError};
use crate::memo::{
    CacheKey, CacheValue, LruSegment, MemoFn, MemoizationCache, MemoizationCacheFactory,
    RankedSegment, Ranker, Segment, Trimmable, UnboundedSegment,
};
use crate::metrics::{CacheMetrics, CoreCacheMetrics, EntryMetrics};
use crate::retention::StrongKeys;
use core::fmt::{self, Debug};
use core::hash::{BuildHasher, Hash};
use core::num::NonZeroUsize;
use core::time::Duration;
use hashbrown::{DefaultHashBuilder, HashMap, HashSet};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::{debug, trace};

enum CellState<V, E> {
    Pending { owner: ThreadId },
    Settled { outcome: Result<V, E>, stored: bool },
    Abandoned,
}

struct KeyCell<V, E> {
    state: Mutex<CellState<V, E>>,
    settled: Condvar,
}

impl<V, E> KeyCell<V, E> {
    fn pending() -> Self {
        Self {
            state: Mutex::new(CellState::Pending {
                owner: thread::current().id(),
            }),
            settled: Condvar::new(),
        }
    }
}

type BoxedSegment<K, V, E> = Box<dyn Segment<K, V, E> + Send>;

struct Shard<K, V, E> {
    settled: BoxedSegment<K, V, E>,
    pending: HashMap<K, Arc<KeyCell<V, E>>>,
}

enum Claim<V, E> {
    Owner(Arc<KeyCell<V, E>>),
    Waiter(Arc<KeyCell<V, E>>),
}

/// Per-shard share of a total capacity, rounded up.
fn shard_capacity(total: NonZeroUsize, shards: usize) -> NonZeroUsize {
    NonZeroUsize::new(total.get().div_ceil(shards)).unwrap_or(NonZeroUsize::MIN)
}

/// A memoization cache safe for concurrent use from many threads.
///
/// Unlike [`SynchronizedCache`](super::SynchronizedCache), a slow invocation
/// only blocks callers of the same key. [`init`](Self::init) builds an
/// unbounded cache; [`init_lru`](Self::init_lru) and
/// [`init_ranked`](Self::init_ranked) bound every shard with the matching
/// eviction policy.
///
/// A caller that asks for a key whose computation is in flight on its own
/// thread gets [`CacheError::ReentrantInvocation`] instead of deadlocking.
///
/// # Examples
///
/// ```
/// use memocache::concurrent::ConcurrentCache;
/// use memocache::config::{ConcurrentCacheConfig, MemoOptions};
/// use memocache::memo::MemoizationCache;
/// use std::sync::Arc;
///
/// let cache: ConcurrentCache<u64, u64, ()> = ConcurrentCache::init(
///     ConcurrentCacheConfig::with_segments(8),
///     Arc::new(|x: &u64| Ok(x + 1)),
///     MemoOptions::default(),
/// )
/// .unwrap();
/// assert_eq!(cache.get_or_add(41), Ok(42));
/// assert_eq!(cache.len(), 1);
/// ```
pub struct ConcurrentCache<K, V, E, S = DefaultHashBuilder> {
    name: &'static str,
    shards: Box<[Mutex<Shard<K, V, E>>]>,
    capacity: Option<NonZeroUsize>,
    hash_builder: S,
    func: MemoFn<K, V, E>,
    options: MemoOptions,
    stats: Mutex<CoreCacheMetrics>,
    disposed: AtomicBool,
}

impl<K, V, E> ConcurrentCache<K, V, E, DefaultHashBuilder>
where
    K: CacheKey,
    V: CacheValue,
    E: CacheValue,
{
    /// Creates an unbounded concurrent cache.
    pub fn init(
        config: ConcurrentCacheConfig,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self> {
        Self::init_with_hasher(config, func, options, DefaultHashBuilder::default())
    }

    /// Creates a concurrent cache whose shards each evict their least
    /// recently used entry when full.
    pub fn init_lru(
        config: ConcurrentCacheConfig,
        lru: LruCacheConfig,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self> {
        config.validate()?;
        let per_shard = shard_capacity(lru.capacity, config.segments);
        Self::build(
            "CONCURRENT LRU",
            config,
            Some(lru.capacity),
            func,
            options,
            DefaultHashBuilder::default(),
            || Box::new(LruSegment::<K, V, E>::new(per_shard)),
        )
    }

    /// Creates a concurrent cache whose shards each evict in bulk by rank
    /// when full. Metrics are always tracked.
    pub fn init_ranked<R>(
        config: ConcurrentCacheConfig,
        ranked: RankedCacheConfig,
        ranker: Ranker<R>,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self>
    where
        R: PartialOrd + 'static,
    {
        config.validate()?;
        ranked.validate()?;
        let per_shard = RankedCacheConfig {
            capacity: shard_capacity(ranked.capacity, config.segments),
            ..ranked
        };
        Self::build(
            "CONCURRENT RANKED",
            config,
            Some(ranked.capacity),
            func,
            options.with_metrics(true),
            DefaultHashBuilder::default(),
            || {
                Box::new(RankedSegment::<K, V, E, R, StrongKeys>::new(
                    per_shard,
                    Arc::clone(&ranker),
                ))
            },
        )
    }
}

impl<K, V, E, S> ConcurrentCache<K, V, E, S>
where
    K: CacheKey,
    V: CacheValue,
    E: CacheValue,
    S: BuildHasher,
{
    /// Creates an unbounded concurrent cache that shards keys with
    /// `hash_builder`.
    pub fn init_with_hasher(
        config: ConcurrentCacheConfig,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
        hash_builder: S,
    ) -> CacheResult<Self> {
        Self::build(
            "CONCURRENT",
            config,
            None,
            func,
            options,
            hash_builder,
            || Box::new(UnboundedSegment::<K, V, E, StrongKeys>::new()),
        )
    }

    fn build(
        name: &'static str,
        config: ConcurrentCacheConfig,
        capacity: Option<NonZeroUsize>,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
        hash_builder: S,
        mut segment: impl FnMut() -> BoxedSegment<K, V, E>,
    ) -> CacheResult<Self> {
        config.validate()?;
        debug!(
            cache = name,
            segments = config.segments,
            capacity = capacity.map(NonZeroUsize::get),
            "concurrent memoization cache configured"
        );
        let shards = (0..config.segments)
            .map(|_| {
                Mutex::new(Shard {
                    settled: segment(),
                    pending: HashMap::new(),
                })
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            name,
            shards,
            capacity,
            hash_builder,
            func,
            options,
            stats: Mutex::new(CoreCacheMetrics::new()),
            disposed: AtomicBool::new(false),
        })
    }
}

impl<K, V, E, S> ConcurrentCache<K, V, E, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    S: BuildHasher,
{
    /// Number of segments.
    pub fn segment_count(&self) -> usize {
        self.shards.len()
    }

    /// Total capacity of a bounded cache, `None` if unbounded.
    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    #[inline]
    fn shard(&self, key: &K) -> &Mutex<Shard<K, V, E>> {
        let index = (self.hash_builder.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    fn now(&self) -> Duration {
        if self.options.enable_metrics {
            self.options.clock.now()
        } else {
            Duration::ZERO
        }
    }

    fn check_live(&self) -> CacheResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    /// Records a hit on a stored entry, if it is still stored.
    fn record_hit(&self, key: &K, start: Duration) -> Option<Result<V, E>> {
        let mut shard = self.shard(key).lock();
        let entry = shard.settled.lookup(key)?;
        let now = self.now();
        entry.metrics.record_access(now.saturating_sub(start), now);
        let outcome = entry.outcome.clone();
        drop(shard);
        self.stats.lock().record_hit();
        Some(outcome)
    }

    fn await_cell(&self, key: &K, cell: &KeyCell<V, E>, start: Duration) -> Result<V, MemoError<E>> {
        let mut state = cell.state.lock();
        loop {
            match &*state {
                CellState::Pending { owner } => {
                    if *owner == thread::current().id() {
                        return Err(CacheError::ReentrantInvocation.into());
                    }
                    cell.settled.wait(&mut state);
                }
                CellState::Settled { outcome, stored } => {
                    let outcome = outcome.clone();
                    let stored = *stored;
                    drop(state);
                    if stored {
                        self.record_hit(key, start);
                    }
                    return outcome.map_err(MemoError::Invoke);
                }
                CellState::Abandoned => {
                    return Err(CacheError::InvalidState(
                        "in-flight computation panicked".to_string(),
                    )
                    .into())
                }
            }
        }
    }

    /// Detaches `cell` from its shard, stores `entry` if the cell was still
    /// registered, and wakes every waiter. `None` marks an abandoned cell.
    fn settle(
        &self,
        key: &K,
        cell: &Arc<KeyCell<V, E>>,
        outcome: Option<Result<V, E>>,
        entry: Option<MemoEntry<V, E>>,
    ) {
        let mut shard = self.shard(key).lock();
        let registered = shard
            .pending
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, cell));
        if registered {
            shard.pending.remove(key);
        }
        let removed = match entry {
            Some(entry) if registered && !self.disposed.load(Ordering::Acquire) => {
                Some(shard.settled.insert(key.clone(), entry))
            }
            _ => None,
        };
        *cell.state.lock() = match outcome {
            Some(outcome) => CellState::Settled {
                outcome,
                stored: removed.is_some(),
            },
            None => CellState::Abandoned,
        };
        drop(shard);
        cell.settled.notify_all();

        if let Some(removed) = removed {
            let mut stats = self.stats.lock();
            stats.record_insertion();
            stats.record_evictions(removed.evicted);
            stats.record_pruned(removed.pruned);
            if removed.evicted > 0 {
                trace!(cache = self.name, evicted = removed.evicted, "shard made room");
            }
        }
    }

    fn invoke(&self, key: K, cell: &Arc<KeyCell<V, E>>, start: Duration) -> Result<V, MemoError<E>> {
        let mut guard = AbandonGuard {
            cache: self,
            key: &key,
            cell,
            armed: true,
        };
        let outcome = (self.func)(&key);
        guard.armed = false;
        drop(guard);

        let invoked = self.now();
        self.stats.lock().record_miss(outcome.is_err());

        let entry = (outcome.is_ok() || self.options.cache_errors).then(|| {
            let mut metrics = EntryMetrics::new(start, invoked.saturating_sub(start));
            let now = self.now();
            metrics.record_access(now.saturating_sub(start), now);
            MemoEntry::new(outcome.clone(), metrics)
        });
        self.settle(&key, cell, Some(outcome.clone()), entry);
        outcome.map_err(MemoError::Invoke)
    }

    /// Removes every stored entry `doomed` accepts. The predicate runs with
    /// no lock held.
    fn trim(&self, doomed: &mut dyn FnMut(&K, &MemoEntry<V, E>) -> bool) -> CacheResult<usize> {
        self.check_live()?;
        let mut removed = 0;
        for shard in self.shards.iter() {
            let snapshot = shard.lock().settled.snapshot();
            let marks: HashSet<u64> = snapshot
                .into_iter()
                .filter_map(|(seq, key, entry)| doomed(&key, &entry).then_some(seq))
                .collect();
            if !marks.is_empty() {
                removed += shard.lock().settled.remove_marked(&marks);
            }
        }
        self.stats.lock().record_trimmed(removed);
        trace!(cache = self.name, removed, "concurrent cache trimmed");
        Ok(removed)
    }
}

struct AbandonGuard<'a, K, V, E, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    S: BuildHasher,
{
    cache: &'a ConcurrentCache<K, V, E, S>,
    key: &'a K,
    cell: &'a Arc<KeyCell<V, E>>,
    armed: bool,
}

impl<K, V, E, S> Drop for AbandonGuard<'_, K, V, E, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    S: BuildHasher,
{
    fn drop(&mut self) {
        if self.armed {
            self.cache.settle(self.key, self.cell, None, None);
        }
    }
}

impl<K, V, E, S> MemoizationCache<K, V, E> for ConcurrentCache<K, V, E, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    S: BuildHasher,
{
    fn get_or_add(&self, key: K) -> Result<V, MemoError<E>> {
        self.check_live()?;
        let start = self.now();

        let claim = {
            let mut shard = self.shard(&key).lock();
            if let Some(entry) = shard.settled.lookup(&key) {
                let now = self.now();
                entry.metrics.record_access(now.saturating_sub(start), now);
                let outcome = entry.outcome.clone();
                drop(shard);
                self.stats.lock().record_hit();
                return outcome.map_err(MemoError::Invoke);
            }
            match shard.pending.get(&key) {
                Some(cell) => Claim::Waiter(Arc::clone(cell)),
                None => {
                    let cell = Arc::new(KeyCell::pending());
                    shard.pending.insert(key.clone(), Arc::clone(&cell));
                    Claim::Owner(cell)
                }
            }
        };

        match claim {
            Claim::Owner(cell) => self.invoke(key, &cell, start),
            Claim::Waiter(cell) => self.await_cell(&key, &cell, start),
        }
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().settled.len())
            .sum()
    }

    fn clear(&self) -> CacheResult<()> {
        self.check_live()?;
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.settled.clear();
            shard.pending.clear();
        }
        debug!(cache = self.name, "memoization cache cleared");
        Ok(())
    }

    fn debug_view(&self) -> String {
        let mut lines = Vec::new();
        for shard in self.shards.iter() {
            let mut block = String::new();
            let _ = shard
                .lock()
                .settled
                .write_entries(&mut block, self.options.enable_metrics);
            lines.extend(block.lines().map(|line| format!("{line}\n")));
        }
        // Shard iteration order is arbitrary.
        lines.sort();
        let mut out = format!("{} cache: {} entries\n", self.name, lines.len());
        for line in lines {
            out.push_str(&line);
        }
        out
    }

    fn trimmer(&self) -> Option<&dyn Trimmable<K, V, E>> {
        Some(self)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        for shard in self.shards.iter() {
            let mut shard = shard.lock();
            shard.settled.clear();
            shard.pending.clear();
        }
        debug!(cache = self.name, "memoization cache disposed");
    }
}

impl<K, V, E, S> Trimmable<K, V, E> for ConcurrentCache<K, V, E, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    S: BuildHasher,
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

impl<K, V, E, S> CacheMetrics for ConcurrentCache<K, V, E, S>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
    S: BuildHasher,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.stats.lock().to_btreemap();
        metrics.insert("len".to_string(), self.len() as f64);
        metrics.insert("segments".to_string(), self.shards.len() as f64);
        if let Some(capacity) = self.capacity {
            metrics.insert("capacity".to_string(), capacity.get() as f64);
        }
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        self.name
    }
}

impl<K, V, E, S> fmt::Debug for ConcurrentCache<K, V, E, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentCache")
            .field("name", &self.name)
            .field("segments", &self.shards.len())
            .field("capacity", &self.capacity)
            .field("options", &self.options)
            .field("stats", &*self.stats.lock())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Factory for [`ConcurrentCache`], unbounded unless an LRU bound is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConcurrentFactory {
    /// Configuration of every cache built.
    pub config: ConcurrentCacheConfig,
    /// LRU bound of every cache built, if any.
    pub lru: Option<LruCacheConfig>,
}

impl ConcurrentFactory {
    /// Creates a factory for unbounded caches with the given configuration.
    pub fn new(config: ConcurrentCacheConfig) -> Self {
        Self { config, lru: None }
    }

    /// Bounds every cache built with an LRU policy.
    #[must_use]
    pub fn with_lru(mut self, lru: LruCacheConfig) -> Self {
        self.lru = Some(lru);
        self
    }
}

impl MemoizationCacheFactory for ConcurrentFactory {
    type Cache<K, V, E> = ConcurrentCache<K, V, E>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<ConcurrentCache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        match self.lru {
            Some(lru) => ConcurrentCache::init_lru(self.config, lru, func, options),
            None => ConcurrentCache::init(self.config, func, options),
        }
    }
}

/// Factory for ranked [`ConcurrentCache`]s.
pub struct ConcurrentRankedFactory<R> {
    /// Configuration of every cache built.
    pub config: ConcurrentCacheConfig,
    /// Ranked bound of every cache built.
    pub ranked: RankedCacheConfig,
    /// Ranking shared by every cache built.
    pub ranker: Ranker<R>,
}

impl<R> ConcurrentRankedFactory<R> {
    /// Creates a factory for ranked concurrent caches.
    pub fn new(config: ConcurrentCacheConfig, ranked: RankedCacheConfig, ranker: Ranker<R>) -> Self {
        Self {
            config,
            ranked,
            ranker,
        }
    }
}

impl<R> Clone for ConcurrentRankedFactory<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            ranked: self.ranked,
            ranker: Arc::clone(&self.ranker),
        }
    }
}

impl<R> fmt::Debug for ConcurrentRankedFactory<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentRankedFactory")
            .field("config", &self.config)
            .field("ranked", &self.ranked)
            .finish()
    }
}

impl<R> MemoizationCacheFactory for ConcurrentRankedFactory<R>
where
    R: PartialOrd + 'static,
{
    type Cache<K, V, E> = ConcurrentCache<K, V, E>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<ConcurrentCache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        ConcurrentCache::init_ranked(
            self.config,
            self.ranked,
            Arc::clone(&self.ranker),
            func,
            options,
        )
    }
}
