//! Cache that stores nothing.

use super::{MemoFn, MemoizationCache};
use crate::config::MemoOptions;
use crate::error::{CacheError, CacheResult, MemoError};
use crate::metrics::{CacheMetrics, CoreCacheMetrics};
use core::cell::{Cell, RefCell};
use core::fmt;
use std::collections::BTreeMap;

/// Invokes the function on every call; the count stays zero.
///
/// # Examples
///
/// ```
/// use memocache::config::MemoOptions;
/// use memocache::memo::{MemoizationCache, NopCache};
/// use std::sync::Arc;
///
/// let cache = NopCache::new(Arc::new(|x: &i32| Ok::<_, ()>(x + 1)), MemoOptions::default());
/// assert_eq!(cache.get_or_add(1), Ok(2));
/// assert_eq!(cache.len(), 0);
/// ```
pub struct NopCache<K, V, E> {
    func: MemoFn<K, V, E>,
    stats: RefCell<CoreCacheMetrics>,
    disposed: Cell<bool>,
}

impl<K, V, E> NopCache<K, V, E> {
    /// Wraps `func`. The options are accepted for uniformity and ignored.
    pub fn new(func: MemoFn<K, V, E>, _options: MemoOptions) -> Self {
        Self {
            func,
            stats: RefCell::new(CoreCacheMetrics::new()),
            disposed: Cell::new(false),
        }
    }
}

impl<K, V, E> MemoizationCache<K, V, E> for NopCache<K, V, E> {
    fn get_or_add(&self, key: K) -> Result<V, MemoError<E>> {
        if self.disposed.get() {
            return Err(CacheError::Disposed.into());
        }
        let outcome = (self.func)(&key);
        self.stats.borrow_mut().record_miss(outcome.is_err());
        outcome.map_err(MemoError::Invoke)
    }

    fn len(&self) -> usize {
        0
    }

    fn clear(&self) -> CacheResult<()> {
        if self.disposed.get() {
            return Err(CacheError::Disposed);
        }
        Ok(())
    }

    fn debug_view(&self) -> String {
        "NOP cache: 0 entries\n".to_string()
    }

    fn dispose(&self) {
        self.disposed.set(true);
    }
}

impl<K, V, E> CacheMetrics for NopCache<K, V, E> {
    fn metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = self.stats.borrow().to_btreemap();
        metrics.insert("len".to_string(), 0.0);
        metrics
    }

    fn algorithm_name(&self) -> &'static str {
        "NOP"
    }
}

impl<K, V, E> fmt::Debug for NopCache<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NopCache")
            .field("stats", &self.stats.borrow())
            .field("disposed", &self.disposed.get())
            .finish()
    }
}
