//! Least Recently Used (LRU) Memoization Cache
//!
//! Keeps at most `capacity` outcomes. Every lookup moves the key to the most
//! recently used position; storing a new key into a full cache evicts exactly
//! one entry, the least recently used one.
//!
//! ```text
//!   MRU                              LRU
//!   [k3] <-> [k1] <-> [k4] <-> [k2]
//!     ▲                          │
//!     └── hit moves to front     └── evicted on insert when full
//! ```
//!
//! The lookup table maps each key to its node in an intrusive
//! [`RecencyList`], so hits, insertions and evictions are all O(1).

use super::{MemoCore, MemoFn, MemoizationCache, Removed, Segment, Trimmable};
use crate::config::{LruCacheConfig, MemoOptions};
use crate::entry::MemoEntry;
use crate::error::{CacheResult, MemoError};
use crate::list::{Node, RecencyList};
use crate::metrics::CacheMetrics;
use core::fmt::{self, Debug};
use core::hash::Hash;
use core::num::NonZeroUsize;
use core::ptr::NonNull;
use hashbrown::{HashMap, HashSet};
use std::collections::BTreeMap;
use tracing::{debug, trace};

type LruNode<K, V, E> = NonNull<Node<(K, MemoEntry<V, E>, u64)>>;

/// Recency-ordered segment behind [`LruCache`].
///
/// # Safety
///
/// `map` holds pointers to nodes owned by `list`. Every pointer in `map` refers
/// to a node that is currently linked, and a node is unlinked only after its
/// key has been removed from `map`.
pub(crate) struct LruSegment<K, V, E> {
    capacity: NonZeroUsize,
    map: HashMap<K, LruNode<K, V, E>>,
    list: RecencyList<(K, MemoEntry<V, E>, u64)>,
    next_seq: u64,
}

// SAFETY: LruSegment owns all data behind its node pointers.
unsafe impl<K: Send, V: Send, E: Send> Send for LruSegment<K, V, E> {}

impl<K: Hash + Eq, V, E> LruSegment<K, V, E> {
    pub(crate) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            map: HashMap::with_capacity(capacity.get()),
            list: RecencyList::new(),
            next_seq: 0,
        }
    }
}

impl<K, V, E> Segment<K, V, E> for LruSegment<K, V, E>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
{
    fn lookup(&mut self, key: &K) -> Option<&mut MemoEntry<V, E>> {
        let node = *self.map.get(key)?;
        // SAFETY: node comes from our map, so it is linked into our list.
        unsafe {
            self.list.move_to_front(node);
            Some(&mut self.list.get_mut(node).1)
        }
    }

    fn insert(&mut self, key: K, entry: MemoEntry<V, E>) -> Removed {
        let mut removed = Removed::default();
        if self.map.len() >= self.capacity.get() {
            if let Some((evicted_key, _, _)) = self.list.pop_back() {
                self.map.remove(&evicted_key);
                removed.evicted = 1;
                trace!(key = ?evicted_key, "lru evicted least recently used entry");
            }
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let node = self.list.push_front((key.clone(), entry, seq));
        self.map.insert(key, node);
        removed
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn clear(&mut self) {
        self.map.clear();
        self.list.clear();
    }

    fn snapshot(&self) -> Vec<(u64, K, MemoEntry<V, E>)> {
        self.list
            .iter()
            .map(|(key, entry, seq)| (*seq, key.clone(), entry.clone()))
            .collect()
    }

    fn remove_marked(&mut self, marks: &HashSet<u64>) -> usize {
        let dropped = self.list.drain_where(|(_, _, seq)| marks.contains(seq));
        for (key, _, _) in &dropped {
            self.map.remove(key);
        }
        dropped.len()
    }

    fn prune(&mut self) -> usize {
        0
    }

    fn write_entries(&self, out: &mut String, with_metrics: bool) -> fmt::Result {
        for (key, entry, _) in self.list.iter() {
            entry.write_line(out, key, with_metrics)?;
        }
        Ok(())
    }
}

/// An LRU-bounded memoization cache.
///
/// Entries are listed from most to least recently used in the debug view.
///
/// # Examples
///
/// ```
/// use memocache::config::{LruCacheConfig, MemoOptions};
/// use memocache::memo::{LruCache, MemoizationCache};
/// use core::num::NonZeroUsize;
/// use std::sync::Arc;
///
/// let config = LruCacheConfig::new(NonZeroUsize::new(2).unwrap());
/// let cache = LruCache::init(
///     config,
///     Arc::new(|s: &String| Ok::<_, ()>(s.len())),
///     MemoOptions::default(),
/// );
///
/// cache.get_or_add("apple".to_string()).unwrap();
/// cache.get_or_add("banana".to_string()).unwrap();
/// cache.get_or_add("apple".to_string()).unwrap();   // apple becomes MRU
/// cache.get_or_add("cherry".to_string()).unwrap();  // evicts banana
/// assert_eq!(cache.len(), 2);
/// ```
pub struct LruCache<K, V, E> {
    core: MemoCore<K, V, E, LruSegment<K, V, E>>,
    capacity: NonZeroUsize,
}

impl<K, V, E> LruCache<K, V, E>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
{
    /// Creates an LRU cache from a configuration.
    pub fn init(config: LruCacheConfig, func: MemoFn<K, V, E>, options: MemoOptions) -> Self {
        debug!(capacity = config.capacity.get(), "lru memoization cache configured");
        Self {
            core: MemoCore::new("LRU", LruSegment::new(config.capacity), func, options),
            capacity: config.capacity,
        }
    }

    /// Maximum number of entries.
    pub fn cap(&self) -> NonZeroUsize {
        self.capacity
    }
}

impl<K, V, E> MemoizationCache<K, V, E> for LruCache<K, V, E>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
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

impl<K, V, E> CacheMetrics for LruCache<K, V, E>
where
    K: Hash + Eq + Clone + Debug,
    V: Clone + Debug,
    E: Clone + Debug,
{
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.core.metrics();
        metrics.insert("capacity".to_string(), self.capacity.get() as f64);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "LRU"
    }
}

impl<K, V, E> fmt::Debug for LruCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("core", &self.core)
            .finish()
    }
}
