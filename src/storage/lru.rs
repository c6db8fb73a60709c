//! LRU-bounded storage.
//!
//! Every `acquire` moves the entry to the most recently used position.
//! Releasing an entry to zero keeps it in the table, so a later `acquire` of an
//! equal value revives the same canonical instance. Idle entries are only
//! discarded when a *new* value arrives at capacity: the least recently used
//! idle entries are evicted until the table is back under capacity. If every
//! entry is still referenced the table grows past capacity instead of
//! invalidating live handles, and shrinks again on the next insertion after
//! those entries go idle.

use super::{next_storage_id, Storage, StorageEntry};
use crate::error::{CacheError, CacheResult};
use crate::list::{Node, RecencyList};
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::num::NonZeroUsize;
use core::ptr::NonNull;
use hashbrown::{DefaultHashBuilder, HashTable};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::trace;

struct LruSlot<T> {
    entry: Arc<StorageEntry<T>>,
    node: NonNull<Node<Arc<StorageEntry<T>>>>,
}

struct LruTable<T> {
    index: HashTable<LruSlot<T>>,
    order: RecencyList<Arc<StorageEntry<T>>>,
}

// SAFETY: the node pointers are owned by `order` and only dereferenced while
// the table is locked.
unsafe impl<T: Send + Sync> Send for LruTable<T> {}

/// Storage bounded by an LRU policy over idle entries.
pub struct LruStorage<T, S = DefaultHashBuilder> {
    table: Mutex<LruTable<T>>,
    capacity: NonZeroUsize,
    hash_builder: S,
    id: u64,
}

impl<T> LruStorage<T, DefaultHashBuilder> {
    /// Creates a storage holding at most `capacity` idle entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self::with_hasher(capacity, DefaultHashBuilder::default())
    }
}

impl<T, S> LruStorage<T, S> {
    /// Creates a storage with a custom hasher.
    pub fn with_hasher(capacity: NonZeroUsize, hash_builder: S) -> Self {
        Self {
            table: Mutex::new(LruTable {
                index: HashTable::new(),
                order: RecencyList::new(),
            }),
            capacity,
            hash_builder,
            id: next_storage_id(),
        }
    }

    /// Configured capacity.
    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}

impl<T> LruTable<T> {
    /// Evicts the least recently used idle entry. Returns `false` if every
    /// entry is referenced.
    fn evict_idle(&mut self) -> bool {
        let Some(node) = self.order.find_from_back(|e| e.try_mark_removed()) else {
            return false;
        };
        // SAFETY: `node` was just returned by `find_from_back` on this list.
        let victim = unsafe { self.order.unlink(node) };
        if let Ok(found) = self
            .index
            .find_entry(victim.hash(), |s| Arc::ptr_eq(&s.entry, &victim))
        {
            found.remove();
        }
        true
    }
}

impl<T, S> Storage<T> for LruStorage<T, S>
where
    T: Hash + Eq + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn acquire(&self, value: T) -> CacheResult<Arc<StorageEntry<T>>> {
        let hash = self.hash_builder.hash_one(&value);
        let mut guard = self.table.lock();
        let table = &mut *guard;

        if let Some(slot) = table.index.find(hash, |s| s.entry.value().as_ref() == &value) {
            if !slot.entry.try_retain() {
                return Err(CacheError::InvalidState(
                    "removed entry is still indexed".to_string(),
                ));
            }
            // SAFETY: every indexed node is linked into `order`.
            unsafe { table.order.move_to_front(slot.node) };
            return Ok(Arc::clone(&slot.entry));
        }

        let mut evicted = 0usize;
        while table.index.len() >= self.capacity.get() && table.evict_idle() {
            evicted += 1;
        }
        if evicted > 0 {
            trace!(evicted, len = table.index.len(), "lru storage evicted idle entries");
        }
        if table.index.len() >= self.capacity.get() {
            trace!(
                len = table.index.len(),
                capacity = self.capacity.get(),
                "lru storage over capacity, every entry is referenced"
            );
        }

        let entry = Arc::new(StorageEntry::new(value, hash, self.id));
        entry.try_retain();
        let node = table.order.push_front(Arc::clone(&entry));
        table.index.insert_unique(
            hash,
            LruSlot {
                entry: Arc::clone(&entry),
                node,
            },
            |s| s.entry.hash(),
        );
        Ok(entry)
    }

    fn release(&self, entry: &Arc<StorageEntry<T>>) -> CacheResult<()> {
        if entry.owner() != self.id {
            return Err(CacheError::UntrackedEntry);
        }
        entry.decrement().map(|_| ())
    }

    fn len(&self) -> usize {
        self.table.lock().index.len()
    }
}

impl<T, S> fmt::Debug for LruStorage<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruStorage")
            .field("capacity", &self.capacity)
            .field("len", &self.table.lock().index.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(cap: usize) -> LruStorage<String> {
        LruStorage::new(NonZeroUsize::new(cap).unwrap())
    }

    #[test]
    fn test_lru_storage_keeps_idle_entries() {
        let storage = storage(2);
        let a = storage.acquire("a".to_string()).unwrap();
        storage.release(&a).unwrap();
        assert_eq!(storage.len(), 1);
        let again = storage.acquire("a".to_string()).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(again.ref_count(), 1);
    }

    #[test]
    fn test_lru_storage_evicts_least_recent_idle() {
        let storage = storage(2);
        let a = storage.acquire("a".to_string()).unwrap();
        let b = storage.acquire("b".to_string()).unwrap();
        storage.release(&a).unwrap();
        storage.release(&b).unwrap();

        // Touch `a` so `b` becomes the eviction candidate.
        let a2 = storage.acquire("a".to_string()).unwrap();
        storage.release(&a2).unwrap();

        let c = storage.acquire("c".to_string()).unwrap();
        assert_eq!(storage.len(), 2);
        assert!(b.is_removed());
        assert!(!a.is_removed());
        storage.release(&c).unwrap();
    }

    #[test]
    fn test_lru_storage_never_evicts_referenced() {
        let storage = storage(1);
        let a = storage.acquire("a".to_string()).unwrap();
        let b = storage.acquire("b".to_string()).unwrap();
        assert_eq!(storage.len(), 2);
        assert!(!a.is_removed());

        storage.release(&a).unwrap();
        storage.release(&b).unwrap();
        let c = storage.acquire("c".to_string()).unwrap();
        assert_eq!(storage.len(), 1);
        assert!(a.is_removed());
        assert!(b.is_removed());
        assert!(!c.is_removed());
    }

    #[test]
    fn test_lru_storage_shrinks_back_to_capacity() {
        let storage = storage(1);
        let held: Vec<_> = ["a", "b", "c"]
            .iter()
            .map(|s| storage.acquire(s.to_string()).unwrap())
            .collect();
        assert_eq!(storage.len(), 3);
        for entry in &held {
            storage.release(entry).unwrap();
        }

        for i in 0..10 {
            let entry = storage.acquire(format!("k{i}")).unwrap();
            storage.release(&entry).unwrap();
            assert_eq!(storage.len(), 1);
        }
        assert!(held.iter().all(|e| e.is_removed()));
    }

    #[test]
    fn test_lru_storage_partial_shrink_keeps_referenced() {
        let storage = storage(2);
        let a = storage.acquire("a".to_string()).unwrap();
        let b = storage.acquire("b".to_string()).unwrap();
        let c = storage.acquire("c".to_string()).unwrap();
        storage.release(&a).unwrap();
        storage.release(&b).unwrap();

        // `c` stays referenced, so only the idle pair can go.
        let d = storage.acquire("d".to_string()).unwrap();
        assert_eq!(storage.len(), 2);
        assert!(a.is_removed() && b.is_removed());
        assert!(!c.is_removed() && !d.is_removed());
    }

    #[test]
    fn test_lru_storage_release_errors() {
        let storage = storage(1);
        let a = storage.acquire("a".to_string()).unwrap();
        storage.release(&a).unwrap();
        assert_eq!(storage.release(&a), Err(CacheError::UntrackedEntry));
    }
}
