//! Reference-Counted Storage
//!
//! A storage is a deduplication table: [`acquire`](Storage::acquire) maps a
//! value to the single canonical [`StorageEntry`] equal to it and takes one
//! reference on that entry, [`release`](Storage::release) gives the reference
//! back.
//!
//! Lookup is by value equality, removal is by entry identity. An entry that was
//! released to zero and removed is never confused with a newer, equal entry.
//!
//! # Entry States
//!
//! ```text
//!   acquire            release (count > 1)
//!     │                   ┌────┐
//!     ▼                   ▼    │
//!  ┌──────────────┐   ┌──────────────┐  release (count == 1)  ┌──────────┐
//!  │  new (0)     │──▶│ Live (n >= 1)│───────────────────────▶│ Idle (0) │
//!  └──────────────┘   └──────────────┘◀───────────────────────└────┬─────┘
//!                                           acquire                │ policy
//!                                                                  ▼
//!                                                            ┌──────────┐
//!                                                            │ Removed  │
//!                                                            └──────────┘
//! ```
//!
//! The `Idle -> Removed` transition is a single compare-and-swap performed
//! while the storage table is locked, so a concurrent `acquire` either revives
//! the entry or finds it gone, never both. [`UnboundedStorage`] removes an entry
//! as soon as it goes idle; [`LruStorage`] keeps idle entries until capacity
//! pressure evicts them.

use crate::error::{CacheError, CacheResult};
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use hashbrown::DefaultHashBuilder;
use hashbrown::HashTable;
use parking_lot::Mutex;
use std::sync::Arc;

pub mod lru;

pub use lru::LruStorage;

const REMOVED: usize = usize::MAX;

static NEXT_STORAGE_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates an owner id for a new storage. Zero is reserved for detached entries.
pub(crate) fn next_storage_id() -> u64 {
    NEXT_STORAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// A canonical value and its reference count.
pub struct StorageEntry<T> {
    value: Arc<T>,
    hash: u64,
    owner: u64,
    count: AtomicUsize,
}

impl<T> StorageEntry<T> {
    pub(crate) fn new(value: T, hash: u64, owner: u64) -> Self {
        Self {
            value: Arc::new(value),
            hash,
            owner,
            count: AtomicUsize::new(0),
        }
    }

    /// Creates an entry that belongs to no storage and has no references.
    ///
    /// Every storage rejects such an entry on release, and caches reject it as
    /// a canonical entry.
    pub fn detached(value: T) -> Self {
        Self::new(value, 0, 0)
    }

    /// The canonical value.
    #[inline]
    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    /// Number of outstanding references, zero once removed.
    pub fn ref_count(&self) -> usize {
        match self.count.load(Ordering::Acquire) {
            REMOVED => 0,
            n => n,
        }
    }

    /// `true` once a storage has discarded this entry.
    pub fn is_removed(&self) -> bool {
        self.count.load(Ordering::Acquire) == REMOVED
    }

    #[inline]
    pub(crate) fn hash(&self) -> u64 {
        self.hash
    }

    #[inline]
    pub(crate) fn owner(&self) -> u64 {
        self.owner
    }

    /// Takes a reference unless the entry was removed.
    pub(crate) fn try_retain(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                REMOVED => None,
                n => Some(n + 1),
            })
            .is_ok()
    }

    /// Drops a reference and returns the remaining count.
    pub(crate) fn decrement(&self) -> CacheResult<usize> {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| match n {
                0 | REMOVED => None,
                n => Some(n - 1),
            })
            .map(|previous| previous - 1)
            .map_err(|_| CacheError::UntrackedEntry)
    }

    /// Moves an idle entry to the removed state.
    pub(crate) fn try_mark_removed(&self) -> bool {
        self.count
            .compare_exchange(0, REMOVED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<T: fmt::Debug> fmt::Debug for StorageEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageEntry")
            .field("value", &self.value)
            .field("count", &self.ref_count())
            .field("removed", &self.is_removed())
            .finish()
    }
}

/// A deduplicating, reference-counted table of values.
pub trait Storage<T>: Send + Sync {
    /// Returns the canonical entry equal to `value` with one more reference,
    /// creating it if absent.
    fn acquire(&self, value: T) -> CacheResult<Arc<StorageEntry<T>>>;

    /// Gives back one reference on `entry`.
    ///
    /// Fails with [`CacheError::UntrackedEntry`] if `entry` does not belong to
    /// this storage or has no outstanding references.
    fn release(&self, entry: &Arc<StorageEntry<T>>) -> CacheResult<()>;

    /// Number of entries currently tracked.
    fn len(&self) -> usize;

    /// `true` if no entry is tracked.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Storage that discards an entry as soon as its count drops to zero.
pub struct UnboundedStorage<T, S = DefaultHashBuilder> {
    table: Mutex<HashTable<Arc<StorageEntry<T>>>>,
    hash_builder: S,
    id: u64,
}

impl<T> UnboundedStorage<T, DefaultHashBuilder> {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<T> Default for UnboundedStorage<T, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> UnboundedStorage<T, S> {
    /// Creates an empty storage using `hash_builder` for value hashes.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            table: Mutex::new(HashTable::new()),
            hash_builder,
            id: next_storage_id(),
        }
    }
}

impl<T, S> Storage<T> for UnboundedStorage<T, S>
where
    T: Hash + Eq + Send + Sync,
    S: BuildHasher + Send + Sync,
{
    fn acquire(&self, value: T) -> CacheResult<Arc<StorageEntry<T>>> {
        let hash = self.hash_builder.hash_one(&value);
        let mut table = self.table.lock();

        match table.find_entry(hash, |e| e.value.as_ref() == &value) {
            Ok(occupied) => {
                if occupied.get().try_retain() {
                    return Ok(Arc::clone(occupied.get()));
                }
                // Removed entries leave the table under this lock, so this is
                // only reachable if an entry was marked removed elsewhere.
                occupied.remove();
            }
            Err(_absent) => {}
        }

        let entry = Arc::new(StorageEntry::new(value, hash, self.id));
        entry.try_retain();
        table.insert_unique(hash, Arc::clone(&entry), |e| e.hash);
        Ok(entry)
    }

    fn release(&self, entry: &Arc<StorageEntry<T>>) -> CacheResult<()> {
        if entry.owner() != self.id {
            return Err(CacheError::UntrackedEntry);
        }
        if entry.decrement()? > 0 {
            return Ok(());
        }

        let mut table = self.table.lock();
        // A concurrent acquire may have revived the entry in the meantime.
        if entry.try_mark_removed() {
            if let Ok(found) = table.find_entry(entry.hash(), |e| Arc::ptr_eq(e, entry)) {
                found.remove();
            }
        }
        Ok(())
    }

    fn len(&self) -> usize {
        self.table.lock().len()
    }
}

impl<T, S> fmt::Debug for UnboundedStorage<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnboundedStorage")
            .field("len", &self.table.lock().len())
            .finish()
    }
}
