//! Lock-wrapped memoization cache.

use crate::config::MemoOptions;
use crate::error::{CacheError, CacheResult, MemoError};
use crate::memo::{
    CacheKey, CacheValue, MemoFn, MemoizationCache, MemoizationCacheFactory, Trimmable,
    WeakMemoizationCacheFactory,
};
use crate::metrics::{CacheMetrics, EntryMetrics};
use core::fmt::{self, Debug};
use parking_lot::ReentrantMutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Makes any memoization cache shareable between threads.
///
/// The lock is held for the whole of `get_or_add`, invocation included, so
/// every key is computed exactly once even when many threads miss at the same
/// time. The lock is re-entrant: a memoized function may call back into the
/// same cache on the same thread.
///
/// # Examples
///
/// ```
/// use memocache::concurrent::SynchronizedCache;
/// use memocache::config::MemoOptions;
/// use memocache::memo::{MemoizationCache, UnboundedCache};
/// use std::sync::Arc;
///
/// let cache: Arc<SynchronizedCache<UnboundedCache<u64, u64, ()>>> =
///     Arc::new(SynchronizedCache::new(UnboundedCache::new(
///     Arc::new(|x: &u64| Ok::<_, ()>(x * x)),
///     MemoOptions::default(),
/// )));
///
/// let worker = {
///     let cache = Arc::clone(&cache);
///     std::thread::spawn(move || cache.get_or_add(12).unwrap())
/// };
/// assert_eq!(worker.join().unwrap(), 144);
/// assert_eq!(cache.len(), 1);
/// ```
pub struct SynchronizedCache<C> {
    inner: ReentrantMutex<C>,
}

impl<C> SynchronizedCache<C> {
    /// Wraps `inner`.
    pub fn new(inner: C) -> Self {
        Self {
            inner: ReentrantMutex::new(inner),
        }
    }

    /// Runs `f` on the wrapped cache while holding the lock.
    ///
    /// Gives access to operations the [`MemoizationCache`] trait does not
    /// cover, such as `prune` on weak-keyed caches.
    pub fn with_inner<R>(&self, f: impl FnOnce(&C) -> R) -> R {
        let guard = self.inner.lock();
        f(&guard)
    }

    /// Unwraps the inner cache.
    pub fn into_inner(self) -> C {
        self.inner.into_inner()
    }
}

impl<C, K, V, E> MemoizationCache<K, V, E> for SynchronizedCache<C>
where
    C: MemoizationCache<K, V, E>,
{
    fn get_or_add(&self, key: K) -> Result<V, MemoError<E>> {
        let guard = self.inner.lock();
        guard.get_or_add(key)
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn clear(&self) -> CacheResult<()> {
        self.inner.lock().clear()
    }

    fn debug_view(&self) -> String {
        self.inner.lock().debug_view()
    }

    fn trimmer(&self) -> Option<&dyn Trimmable<K, V, E>> {
        if self.inner.lock().trimmer().is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn dispose(&self) {
        self.inner.lock().dispose();
    }
}

impl<C, K, V, E> Trimmable<K, V, E> for SynchronizedCache<C>
where
    C: MemoizationCache<K, V, E>,
{
    fn trim_by_value(&self, pred: &mut dyn FnMut(&K, &V) -> bool) -> CacheResult<usize> {
        let guard = self.inner.lock();
        guard
            .trimmer()
            .ok_or(CacheError::Unsupported("trim"))?
            .trim_by_value(pred)
    }

    fn trim_by_outcome(
        &self,
        pred: &mut dyn FnMut(&K, &Result<V, E>) -> bool,
    ) -> CacheResult<usize> {
        let guard = self.inner.lock();
        guard
            .trimmer()
            .ok_or(CacheError::Unsupported("trim"))?
            .trim_by_outcome(pred)
    }

    fn trim_by_metrics(
        &self,
        pred: &mut dyn FnMut(&K, &EntryMetrics) -> bool,
    ) -> CacheResult<usize> {
        let guard = self.inner.lock();
        guard
            .trimmer()
            .ok_or(CacheError::Unsupported("trim"))?
            .trim_by_metrics(pred)
    }
}

impl<C: CacheMetrics> CacheMetrics for SynchronizedCache<C> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        self.inner.lock().metrics()
    }

    fn algorithm_name(&self) -> &'static str {
        self.inner.lock().algorithm_name()
    }
}

impl<C: Debug> fmt::Debug for SynchronizedCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SynchronizedCache")
            .field("inner", &*self.inner.lock())
            .finish()
    }
}

/// Factory wrapping every cache built by `F` in a [`SynchronizedCache`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SynchronizedFactory<F> {
    /// Factory for the wrapped caches.
    pub inner: F,
}

impl<F> SynchronizedFactory<F> {
    /// Wraps `inner`.
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: MemoizationCacheFactory> MemoizationCacheFactory for SynchronizedFactory<F> {
    type Cache<K, V, E> = SynchronizedCache<F::Cache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self::Cache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        Ok(SynchronizedCache::new(self.inner.create(func, options)?))
    }
}

impl<F: WeakMemoizationCacheFactory> WeakMemoizationCacheFactory for SynchronizedFactory<F> {
    type WeakCache<T, V, E> = SynchronizedCache<F::WeakCache<T, V, E>>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue;

    fn create_weak<T, V, E>(
        &self,
        func: MemoFn<Arc<T>, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self::WeakCache<T, V, E>>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue,
    {
        Ok(SynchronizedCache::new(
            self.inner.create_weak(func, options)?,
        ))
    }
}
