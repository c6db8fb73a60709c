//! Per-thread memoization caches with an aggregated global view.
//!
//! Every thread that calls a [`ThreadLocalCache`] gets its own cache instance,
//! built on first use by the wrapped factory. Lookups never contend.
//!
//! Each instance sits in a slot registered with its owner. Dropping or
//! disposing the owner empties every thread's slot, so cached values do not
//! outlive the owner even while other threads keep running. The emptied
//! slots are purged from a thread's table the next time that thread creates
//! an instance.
//!
//! After each access a thread publishes a snapshot of its instance (entry
//! count and debug view). [`ThreadLocalCache::global_view`] merges the latest
//! snapshot of every thread. Snapshots are ordered by the order in which
//! threads first touched any thread-local cache, so two calls at a quiescent
//! point return identical views from any thread.

use crate::config::MemoOptions;
use crate::error::{CacheError, CacheResult, MemoError};
use crate::memo::{
    CacheKey, CacheValue, MemoFn, MemoizationCache, MemoizationCacheFactory, Trimmable,
};
use crate::metrics::EntryMetrics;
use core::any::Any;
use core::cell::{Cell, RefCell};
use core::fmt::{self, Write};
use hashbrown::HashMap;
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_THREAD_SEQ: AtomicU64 = AtomicU64::new(0);

struct LocalEntry {
    owner: Weak<()>,
    instance: Rc<dyn Any>,
}

thread_local! {
    static LOCAL_CACHES: RefCell<HashMap<u64, LocalEntry>> = RefCell::new(HashMap::new());
    static THREAD_SEQ: u64 = NEXT_THREAD_SEQ.fetch_add(1, Ordering::Relaxed);
}

fn thread_seq() -> u64 {
    THREAD_SEQ.with(|seq| *seq)
}

/// One thread's cache, emptied by the owner on drop or dispose.
///
/// The lock is only contended while the owner empties the slot. It is
/// re-entrant so a memoized function may call back into the same cache.
struct LocalSlot<C> {
    cache: ReentrantMutex<RefCell<Option<C>>>,
}

trait Reclaim: Send + Sync {
    fn reclaim(&self);
}

impl<C: Send> Reclaim for LocalSlot<C> {
    fn reclaim(&self) {
        let guard = self.cache.lock();
        // A failed borrow means this thread is inside a call on the slot;
        // the owner cannot be dropped from there.
        let taken = guard.try_borrow_mut().ok().and_then(|mut cache| cache.take());
        drop(guard);
        drop(taken);
    }
}

struct LocalInstance<C> {
    slot: Arc<LocalSlot<C>>,
    generation: Cell<u64>,
}

/// Runs `f` on the thread's cache, failing once the owner emptied the slot.
fn with_slot<C, R>(local: &LocalInstance<C>, f: impl FnOnce(&C) -> R) -> CacheResult<R> {
    let guard = local.slot.cache.lock();
    let cache = guard.borrow();
    cache.as_ref().map(f).ok_or(CacheError::Disposed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ThreadSnapshot {
    count: usize,
    debug_view: String,
}

/// Aggregated view over every thread's instance of a [`ThreadLocalCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalView {
    /// Total entries across the latest snapshot of every thread.
    pub count: usize,
    /// Per-thread debug views, in thread registration order.
    pub debug_view: String,
}

/// A memoization cache with one independent instance per thread.
///
/// The memoized function runs at most once per key per thread. Instances
/// belonging to other threads are reachable only through their published
/// snapshots, so [`len`](MemoizationCache::len),
/// [`debug_view`](MemoizationCache::debug_view) and trimming act on the
/// calling thread's instance. [`clear`](MemoizationCache::clear) reaches every
/// thread: other threads discard their entries on their next access.
///
/// An instance lives until its thread exits or this cache is dropped or
/// disposed, whichever comes first.
///
/// # Examples
///
/// ```
/// use memocache::concurrent::ThreadLocalCache;
/// use memocache::config::MemoOptions;
/// use memocache::memo::{MemoizationCache, UnboundedFactory};
/// use std::sync::Arc;
///
/// let cache = Arc::new(ThreadLocalCache::new(
///     UnboundedFactory,
///     Arc::new(|x: &u32| Ok::<_, ()>(x + 1)),
///     MemoOptions::default(),
/// ));
/// cache.get_or_add(1).unwrap();
/// {
///     let cache = Arc::clone(&cache);
///     std::thread::spawn(move || cache.get_or_add(2).unwrap())
///         .join()
///         .unwrap();
/// }
/// assert_eq!(cache.len(), 1);
/// assert_eq!(cache.global_view().count, 2);
/// ```
pub struct ThreadLocalCache<F, K, V, E> {
    id: u64,
    factory: F,
    func: MemoFn<K, V, E>,
    options: MemoOptions,
    generation: AtomicU64,
    published: Mutex<BTreeMap<u64, ThreadSnapshot>>,
    slots: Mutex<Vec<Weak<dyn Reclaim>>>,
    alive: Arc<()>,
    disposed: AtomicBool,
}

impl<F, K, V, E> ThreadLocalCache<F, K, V, E>
where
    F: MemoizationCacheFactory,
    K: CacheKey,
    V: CacheValue,
    E: CacheValue,
{
    /// Creates a thread-local cache whose instances are built by `factory`.
    pub fn new(factory: F, func: MemoFn<K, V, E>, options: MemoOptions) -> Self {
        Self {
            id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
            factory,
            func,
            options,
            generation: AtomicU64::new(0),
            published: Mutex::new(BTreeMap::new()),
            slots: Mutex::new(Vec::new()),
            alive: Arc::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    fn check_live(&self) -> CacheResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(CacheError::Disposed)
        } else {
            Ok(())
        }
    }

    fn existing_local(&self) -> Option<Rc<LocalInstance<F::Cache<K, V, E>>>> {
        LOCAL_CACHES.with(|caches| {
            let any = Rc::clone(&caches.borrow().get(&self.id)?.instance);
            any.downcast::<LocalInstance<F::Cache<K, V, E>>>().ok()
        })
    }

    fn local(&self) -> CacheResult<Rc<LocalInstance<F::Cache<K, V, E>>>> {
        if let Some(local) = self.existing_local() {
            let generation = self.generation.load(Ordering::Acquire);
            if local.generation.get() != generation {
                local.generation.set(generation);
                with_slot(&local, |cache| cache.clear())??;
            }
            return Ok(local);
        }

        let cache = self
            .factory
            .create(Arc::clone(&self.func), self.options.clone())?;
        let slot = Arc::new(LocalSlot {
            cache: ReentrantMutex::new(RefCell::new(Some(cache))),
        });
        {
            let reclaim: Arc<dyn Reclaim> = Arc::clone(&slot) as Arc<dyn Reclaim>;
            let mut slots = self.slots.lock();
            slots.retain(|slot| slot.strong_count() > 0);
            slots.push(Arc::downgrade(&reclaim));
        }
        let local = Rc::new(LocalInstance {
            slot,
            generation: Cell::new(self.generation.load(Ordering::Acquire)),
        });
        LOCAL_CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let before = caches.len();
            caches.retain(|_, entry| entry.owner.strong_count() > 0);
            if caches.len() < before {
                trace!(purged = before - caches.len(), "purged instances of dropped caches");
            }
            caches.insert(
                self.id,
                LocalEntry {
                    owner: Arc::downgrade(&self.alive),
                    instance: Rc::clone(&local) as Rc<dyn Any>,
                },
            );
        });
        debug!(cache = self.id, thread = thread_seq(), "thread-local instance created");
        Ok(local)
    }

    /// Empties every thread's slot.
    fn reclaim_all(&self) {
        let slots = core::mem::take(&mut *self.slots.lock());
        for slot in slots.iter().filter_map(Weak::upgrade) {
            slot.reclaim();
        }
    }

    fn publish(&self, cache: &F::Cache<K, V, E>) {
        let snapshot = ThreadSnapshot {
            count: cache.len(),
            debug_view: cache.debug_view(),
        };
        self.published.lock().insert(thread_seq(), snapshot);
    }

    /// Merges the latest snapshot of every thread.
    pub fn global_view(&self) -> GlobalView {
        let published = self.published.lock();
        let count = published.values().map(|snapshot| snapshot.count).sum();
        let mut debug_view = String::new();
        let _ = writeln!(
            debug_view,
            "THREAD-LOCAL cache: {} entries across {} threads",
            count,
            published.len()
        );
        for (seq, snapshot) in published.iter() {
            let _ = writeln!(debug_view, "thread #{}:", seq);
            debug_view.push_str(&snapshot.debug_view);
        }
        GlobalView { count, debug_view }
    }

    fn with_trimmer(
        &self,
        f: impl FnOnce(&dyn Trimmable<K, V, E>) -> CacheResult<usize>,
    ) -> CacheResult<usize> {
        self.check_live()?;
        let local = self.local()?;
        with_slot(&local, |cache| {
            let removed = f(cache.trimmer().ok_or(CacheError::Unsupported("trim"))?)?;
            self.publish(cache);
            Ok(removed)
        })?
    }
}

impl<F, K, V, E> MemoizationCache<K, V, E> for ThreadLocalCache<F, K, V, E>
where
    F: MemoizationCacheFactory,
    K: CacheKey,
    V: CacheValue,
    E: CacheValue,
{
    fn get_or_add(&self, key: K) -> Result<V, MemoError<E>> {
        self.check_live()?;
        let local = self.local()?;
        with_slot(&local, |cache| {
            let result = cache.get_or_add(key);
            self.publish(cache);
            result
        })?
    }

    fn len(&self) -> usize {
        self.existing_local()
            .and_then(|local| with_slot(&local, |cache| cache.len()).ok())
            .unwrap_or(0)
    }

    fn clear(&self) -> CacheResult<()> {
        self.check_live()?;
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(local) = self.existing_local() {
            local.generation.set(generation);
            with_slot(&local, |cache| cache.clear())??;
        }
        self.published.lock().clear();
        debug!(cache = self.id, "thread-local caches cleared");
        Ok(())
    }

    fn debug_view(&self) -> String {
        self.existing_local()
            .and_then(|local| with_slot(&local, |cache| cache.debug_view()).ok())
            .unwrap_or_else(|| "THREAD-LOCAL cache: 0 entries\n".to_string())
    }

    fn trimmer(&self) -> Option<&dyn Trimmable<K, V, E>> {
        Some(self)
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(local) = self.existing_local() {
            let _ = with_slot(&local, |cache| cache.dispose());
        }
        self.reclaim_all();
        self.published.lock().clear();
        debug!(cache = self.id, "thread-local caches disposed");
    }
}

impl<F, K, V, E> Trimmable<K, V, E> for ThreadLocalCache<F, K, V, E>
where
    F: MemoizationCacheFactory,
    K: CacheKey,
    V: CacheValue,
    E: CacheValue,
{
    fn trim_by_value(&self, pred: &mut dyn FnMut(&K, &V) -> bool) -> CacheResult<usize> {
        self.with_trimmer(|trimmer| trimmer.trim_by_value(pred))
    }

    fn trim_by_outcome(
        &self,
        pred: &mut dyn FnMut(&K, &Result<V, E>) -> bool,
    ) -> CacheResult<usize> {
        self.with_trimmer(|trimmer| trimmer.trim_by_outcome(pred))
    }

    fn trim_by_metrics(
        &self,
        pred: &mut dyn FnMut(&K, &EntryMetrics) -> bool,
    ) -> CacheResult<usize> {
        self.with_trimmer(|trimmer| trimmer.trim_by_metrics(pred))
    }
}

impl<F, K, V, E> Drop for ThreadLocalCache<F, K, V, E> {
    fn drop(&mut self) {
        for slot in self.slots.get_mut().drain(..).filter_map(|slot| slot.upgrade()) {
            slot.reclaim();
        }
        let removed = LOCAL_CACHES
            .try_with(|caches| {
                caches
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut caches| caches.remove(&self.id))
            })
            .ok()
            .flatten();
        drop(removed);
    }
}

impl<F: fmt::Debug, K, V, E> fmt::Debug for ThreadLocalCache<F, K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLocalCache")
            .field("id", &self.id)
            .field("factory", &self.factory)
            .field("options", &self.options)
            .field("threads", &self.published.lock().len())
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Factory for [`ThreadLocalCache`], building per-thread instances with `F`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadLocalFactory<F> {
    /// Factory for the per-thread instances.
    pub inner: F,
}

impl<F> ThreadLocalFactory<F> {
    /// Wraps `inner`.
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: MemoizationCacheFactory> MemoizationCacheFactory for ThreadLocalFactory<F> {
    type Cache<K, V, E> = ThreadLocalCache<F, K, V, E>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<ThreadLocalCache<F, K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        Ok(ThreadLocalCache::new(self.inner.clone(), func, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::{NopFactory, UnboundedFactory};
    use std::sync::atomic::AtomicUsize;

    fn counting(calls: &Arc<AtomicUsize>) -> Arc<ThreadLocalCache<UnboundedFactory, u32, u32, ()>> {
        let calls = Arc::clone(calls);
        Arc::new(ThreadLocalCache::new(
            UnboundedFactory,
            Arc::new(move |x: &u32| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(x * 3)
            }),
            MemoOptions::default().with_metrics(false),
        ))
    }

    #[test]
    fn test_thread_local_instances_are_independent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting(&calls);
        assert_eq!(cache.get_or_add(1), Ok(3));
        assert_eq!(cache.get_or_add(1), Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other = Arc::clone(&cache);
        std::thread::spawn(move || {
            assert_eq!(other.len(), 0);
            assert_eq!(other.get_or_add(1), Ok(3));
        })
        .join()
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.global_view().count, 2);
    }

    #[test]
    fn test_global_view_is_stable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting(&calls);
        cache.get_or_add(4).unwrap();
        let other = Arc::clone(&cache);
        let remote_view = std::thread::spawn(move || {
            other.get_or_add(5).unwrap();
            other.global_view()
        })
        .join()
        .unwrap();

        let local_view = cache.global_view();
        assert_eq!(local_view, remote_view);
        assert!(local_view
            .debug_view
            .starts_with("THREAD-LOCAL cache: 2 entries across 2 threads\n"));
        assert!(local_view.debug_view.contains("  4 -> Ok(12)\n"));
        assert!(local_view.debug_view.contains("  5 -> Ok(15)\n"));
    }

    #[test]
    fn test_clear_reaches_other_threads() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting(&calls);
        let other = Arc::clone(&cache);
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<usize>();
        let worker = std::thread::spawn(move || {
            other.get_or_add(7).unwrap();
            rx.recv().unwrap();
            other.get_or_add(8).unwrap();
            done_tx.send(other.len()).unwrap();
        });
        while cache.global_view().count == 0 {
            std::thread::yield_now();
        }
        cache.clear().unwrap();
        assert_eq!(cache.global_view().count, 0);
        tx.send(()).unwrap();
        assert_eq!(done_rx.recv().unwrap(), 1);
        worker.join().unwrap();
    }

    #[test]
    fn test_trim_needs_trimming_instance() {
        let cache: ThreadLocalCache<NopFactory, u32, u32, ()> = ThreadLocalCache::new(
            NopFactory,
            Arc::new(|x: &u32| Ok(*x)),
            MemoOptions::default(),
        );
        assert_eq!(
            cache.trim_by_value(&mut |_, _| true),
            Err(CacheError::Unsupported("trim"))
        );
    }

    #[test]
    fn test_dispose_thread_local() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = counting(&calls);
        cache.get_or_add(1).unwrap();
        cache.dispose();
        assert_eq!(cache.get_or_add(1), Err(MemoError::Cache(CacheError::Disposed)));
        assert_eq!(cache.global_view().count, 0);
    }

    #[test]
    fn test_drop_releases_instances_on_live_threads() {
        let payload = Arc::new(String::from("payload"));
        let cache = {
            let payload = Arc::clone(&payload);
            Arc::new(ThreadLocalCache::new(
                UnboundedFactory,
                Arc::new(move |_: &u32| Ok::<_, ()>(Arc::clone(&payload))),
                MemoOptions::default(),
            ))
        };
        let (filled_tx, filled_rx) = std::sync::mpsc::channel::<()>();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let worker = {
            let cache = Arc::clone(&cache);
            std::thread::spawn(move || {
                cache.get_or_add(1).unwrap();
                drop(cache);
                filled_tx.send(()).unwrap();
                release_rx.recv().unwrap();

                // Creating another instance purges the emptied entry.
                let next: ThreadLocalCache<UnboundedFactory, u32, u32, ()> = ThreadLocalCache::new(
                    UnboundedFactory,
                    Arc::new(|x: &u32| Ok(*x)),
                    MemoOptions::default(),
                );
                next.get_or_add(1).unwrap();
                LOCAL_CACHES.with(|caches| caches.borrow().len())
            })
        };

        filled_rx.recv().unwrap();
        // Held here, by the function and by the worker's cached entry.
        assert_eq!(Arc::strong_count(&payload), 3);
        drop(cache);
        assert_eq!(Arc::strong_count(&payload), 1);

        release_tx.send(()).unwrap();
        assert_eq!(worker.join().unwrap(), 1);
    }

    #[test]
    fn test_dispose_empties_other_threads() {
        let payload = Arc::new(7u64);
        let cache = {
            let payload = Arc::clone(&payload);
            Arc::new(ThreadLocalCache::new(
                UnboundedFactory,
                Arc::new(move |_: &u32| Ok::<_, ()>(Arc::clone(&payload))),
                MemoOptions::default(),
            ))
        };
        let other = Arc::clone(&cache);
        std::thread::spawn(move || {
            other.get_or_add(1).unwrap();
        })
        .join()
        .unwrap();
        // The worker exited, so its instance is already gone.
        assert_eq!(Arc::strong_count(&payload), 2);

        cache.get_or_add(1).unwrap();
        assert_eq!(Arc::strong_count(&payload), 3);
        cache.dispose();
        assert_eq!(Arc::strong_count(&payload), 2);
        assert_eq!(cache.len(), 0);
    }
}
