//! Interning
//!
//! [`InternCache::intern`] maps a value to the canonical instance equal to it.
//!
//! - [`WeakInternStore`] holds canonical instances through [`Weak`]
//!   references. Once every strong reference to a canonical instance is
//!   dropped, the next `intern` of an equal value creates a new canonical
//!   instance with the cache's clone function. Reclaimed slots are removed by
//!   [`InternCache::trim`] or by insertion pressure.
//! - [`StrongInternStore`] keeps canonical instances alive forever and does
//!   not support trimming.
//!
//! A weak intern cache never makes the caller's instance canonical: the clone
//! function must return a new allocation, otherwise `intern` fails with
//! [`CacheError::InvalidCloneFunction`].

use crate::error::{CacheError, CacheResult};
use core::fmt::{self, Debug, Write};
use core::hash::{BuildHasher, Hash};
use hashbrown::DefaultHashBuilder;
use hashbrown::{HashSet, HashTable};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::trace;

const MIN_PRUNE_THRESHOLD: usize = 16;

/// Backing table of an [`InternCache`].
pub trait InternStore<T>: Send {
    /// Returns the live canonical instance equal to `value`.
    fn lookup(&mut self, value: &T) -> Option<Arc<T>>;

    /// Records `canonical` as the canonical instance of its value.
    fn insert(&mut self, canonical: Arc<T>);

    /// Number of slots, reclaimed ones included.
    fn len(&self) -> usize;

    /// `true` if there are no slots.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes reclaimed slots and returns how many were removed.
    fn prune(&mut self) -> CacheResult<usize> {
        Err(CacheError::Unsupported("prune"))
    }

    /// Writes one line per slot.
    fn write_entries(&self, out: &mut String) -> fmt::Result;
}

struct WeakSlot<T> {
    hash: u64,
    canonical: Weak<T>,
}

/// Intern store holding canonical instances weakly.
pub struct WeakInternStore<T, S = DefaultHashBuilder> {
    table: HashTable<WeakSlot<T>>,
    hash_builder: S,
    prune_threshold: usize,
}

impl<T> WeakInternStore<T, DefaultHashBuilder> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<T> Default for WeakInternStore<T, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> WeakInternStore<T, S> {
    /// Creates an empty store using `hash_builder`.
    pub fn with_hasher(hash_builder: S) -> Self {
        Self {
            table: HashTable::new(),
            hash_builder,
            prune_threshold: MIN_PRUNE_THRESHOLD,
        }
    }

    fn sweep(&mut self) -> usize {
        let before = self.table.len();
        self.table.retain(|slot| slot.canonical.strong_count() > 0);
        before - self.table.len()
    }
}

impl<T, S> InternStore<T> for WeakInternStore<T, S>
where
    T: Hash + Eq + Debug + Send + Sync,
    S: BuildHasher + Send,
{
    fn lookup(&mut self, value: &T) -> Option<Arc<T>> {
        let hash = self.hash_builder.hash_one(value);
        let mut found = None;
        // Upgrade inside the lookup so a concurrently reclaimed slot is skipped.
        self.table.find(hash, |slot| match slot.canonical.upgrade() {
            Some(canonical) if canonical.as_ref() == value => {
                found = Some(canonical);
                true
            }
            _ => false,
        });
        found
    }

    fn insert(&mut self, canonical: Arc<T>) {
        if self.table.len() >= self.prune_threshold {
            let pruned = self.sweep();
            self.prune_threshold = (self.table.len() * 2).max(MIN_PRUNE_THRESHOLD);
            trace!(pruned, len = self.table.len(), "intern store pruned under pressure");
        }
        let hash = self.hash_builder.hash_one(canonical.as_ref());
        self.table.insert_unique(
            hash,
            WeakSlot {
                hash,
                canonical: Arc::downgrade(&canonical),
            },
            |slot| slot.hash,
        );
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    fn prune(&mut self) -> CacheResult<usize> {
        let pruned = self.sweep();
        trace!(pruned, len = self.table.len(), "intern store pruned");
        Ok(pruned)
    }

    fn write_entries(&self, out: &mut String) -> fmt::Result {
        for slot in self.table.iter() {
            match slot.canonical.upgrade() {
                Some(canonical) => writeln!(out, "  {:?}", canonical)?,
                None => writeln!(out, "  <empty slot>")?,
            }
        }
        Ok(())
    }
}

impl<T, S> fmt::Debug for WeakInternStore<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakInternStore")
            .field("len", &self.table.len())
            .field("prune_threshold", &self.prune_threshold)
            .finish()
    }
}

/// Intern store holding canonical instances strongly.
pub struct StrongInternStore<T, S = DefaultHashBuilder> {
    set: HashSet<Arc<T>, S>,
}

impl<T> StrongInternStore<T, DefaultHashBuilder> {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            set: HashSet::default(),
        }
    }
}

impl<T> Default for StrongInternStore<T, DefaultHashBuilder> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, S> InternStore<T> for StrongInternStore<T, S>
where
    T: Hash + Eq + Debug + Send + Sync,
    S: BuildHasher + Send,
{
    fn lookup(&mut self, value: &T) -> Option<Arc<T>> {
        self.set.get(value).cloned()
    }

    fn insert(&mut self, canonical: Arc<T>) {
        self.set.insert(canonical);
    }

    fn len(&self) -> usize {
        self.set.len()
    }

    fn write_entries(&self, out: &mut String) -> fmt::Result {
        for canonical in self.set.iter() {
            writeln!(out, "  {:?}", canonical)?;
        }
        Ok(())
    }
}

impl<T, S> fmt::Debug for StrongInternStore<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrongInternStore")
            .field("len", &self.set.len())
            .finish()
    }
}

type CloneFn<T> = Arc<dyn Fn(&Arc<T>) -> Arc<T> + Send + Sync>;

/// Thread-safe intern map over an [`InternStore`].
///
/// # Examples
///
/// ```
/// use memocache::intern::InternCache;
/// use std::sync::Arc;
///
/// let cache = InternCache::weak(|s: &Arc<String>| Arc::new(s.as_ref().clone()));
/// let first = cache.intern(Arc::new("id-42".to_string())).unwrap();
/// let second = cache.intern(Arc::new("id-42".to_string())).unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
pub struct InternCache<T, S> {
    store: Mutex<S>,
    clone_fn: Option<CloneFn<T>>,
}

impl<T> InternCache<T, WeakInternStore<T>>
where
    T: Hash + Eq + Debug + Send + Sync + 'static,
{
    /// Creates a weak intern cache. `clone_fn` must return a new allocation
    /// equal to its argument.
    pub fn weak<F>(clone_fn: F) -> Self
    where
        F: Fn(&Arc<T>) -> Arc<T> + Send + Sync + 'static,
    {
        Self::with_store(WeakInternStore::new(), Some(Arc::new(clone_fn)))
    }
}

impl<T> InternCache<T, StrongInternStore<T>>
where
    T: Hash + Eq + Debug + Send + Sync + 'static,
{
    /// Creates a strong intern cache. The first instance seen of each value
    /// becomes canonical.
    pub fn strong() -> Self {
        Self::with_store(StrongInternStore::new(), None)
    }
}

impl<T, S> InternCache<T, S>
where
    T: Send + Sync + 'static,
    S: InternStore<T>,
{
    /// Creates an intern cache over `store`. Without a clone function the
    /// interned instance itself becomes canonical.
    pub fn with_store(store: S, clone_fn: Option<CloneFn<T>>) -> Self {
        Self {
            store: Mutex::new(store),
            clone_fn,
        }
    }

    /// Returns the canonical instance equal to `value`.
    pub fn intern(&self, value: Arc<T>) -> CacheResult<Arc<T>> {
        let mut store = self.store.lock();
        if let Some(canonical) = store.lookup(&value) {
            return Ok(canonical);
        }

        let canonical = match &self.clone_fn {
            Some(clone_fn) => {
                let canonical = clone_fn(&value);
                if Arc::ptr_eq(&canonical, &value) {
                    return Err(CacheError::InvalidCloneFunction);
                }
                canonical
            }
            None => value,
        };
        store.insert(Arc::clone(&canonical));
        Ok(canonical)
    }

    /// Removes reclaimed slots and returns how many were removed.
    ///
    /// Fails with [`CacheError::Unsupported`] on stores without pruning.
    pub fn trim(&self) -> CacheResult<usize> {
        self.store.lock().prune()
    }

    /// Number of slots, reclaimed ones included.
    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    /// `true` if there are no slots.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lists every slot.
    pub fn debug_view(&self) -> String {
        let store = self.store.lock();
        let mut out = String::new();
        let _ = writeln!(out, "INTERN cache: {} entries", store.len());
        let _ = store.write_entries(&mut out);
        out
    }
}

impl<T, S: fmt::Debug> fmt::Debug for InternCache<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternCache")
            .field("store", &*self.store.lock())
            .field("clone_fn", &self.clone_fn.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weak_cache() -> InternCache<String, WeakInternStore<String>> {
        InternCache::weak(|s: &Arc<String>| Arc::new(s.as_ref().clone()))
    }

    #[test]
    fn test_weak_intern_returns_live_canonical() {
        let cache = weak_cache();
        let input = Arc::new("a".to_string());
        let canonical = cache.intern(Arc::clone(&input)).unwrap();
        assert!(!Arc::ptr_eq(&canonical, &input));
        let again = cache.intern(Arc::new("a".to_string())).unwrap();
        assert!(Arc::ptr_eq(&canonical, &again));
    }

    #[test]
    fn test_weak_intern_recreates_after_reclaim() {
        let cache = weak_cache();
        let first = cache.intern(Arc::new("a".to_string())).unwrap();
        let first_weak = Arc::downgrade(&first);
        drop(first);
        assert!(cache.debug_view().contains("<empty slot>"));

        let second = cache.intern(Arc::new("a".to_string())).unwrap();
        assert!(!core::ptr::eq(Arc::as_ptr(&second), first_weak.as_ptr()));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.trim(), Ok(1));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identity_clone_function_is_rejected() {
        let cache: InternCache<String, WeakInternStore<String>> =
            InternCache::weak(|s: &Arc<String>| Arc::clone(s));
        assert_eq!(
            cache.intern(Arc::new("x".to_string())),
            Err(CacheError::InvalidCloneFunction)
        );
        assert!(cache.is_empty());
    }

    #[test]
    fn test_strong_intern_cannot_trim() {
        let cache = InternCache::strong();
        let input = Arc::new(7u32);
        let canonical = cache.intern(Arc::clone(&input)).unwrap();
        assert!(Arc::ptr_eq(&canonical, &input));
        drop(canonical);
        drop(input);
        assert!(Arc::ptr_eq(
            &cache.intern(Arc::new(7)).unwrap(),
            &cache.intern(Arc::new(7)).unwrap()
        ));
        assert_eq!(cache.trim(), Err(CacheError::Unsupported("prune")));
    }
}
