//! Cache factories.
//!
//! A factory builds a fresh cache for a given function. The
//! [`Memoizer`](crate::memoizer::Memoizer) façade and the thread-local adapter
//! are generic over a factory, so the storage policy is chosen once and reused
//! for every memoized function.

use super::{
    CacheKey, CacheValue, LruCache, MemoFn, MemoizationCache, NopCache, RankedCache, Ranker,
    UnboundedCache,
};
use crate::config::{LruCacheConfig, MemoOptions, RankedCacheConfig};
use crate::error::CacheResult;
use crate::retention::WeakKeys;
use core::fmt::{self, Debug};
use std::sync::Arc;

/// Builds memoization caches with strongly held keys.
pub trait MemoizationCacheFactory: Clone + Send + Sync + 'static {
    /// The cache type produced for a key, value and error type.
    type Cache<K, V, E>: MemoizationCache<K, V, E> + Send + 'static
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    /// Creates a cache around `func`.
    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self::Cache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;
}

/// Builds memoization caches that hold `Arc` keys weakly.
pub trait WeakMemoizationCacheFactory: Clone + Send + Sync + 'static {
    /// The cache type produced for a key target, value and error type.
    type WeakCache<T, V, E>: MemoizationCache<Arc<T>, V, E> + Send + 'static
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue;

    /// Creates a weak-keyed cache around `func`.
    fn create_weak<T, V, E>(
        &self,
        func: MemoFn<Arc<T>, V, E>,
        options: MemoOptions,
    ) -> CacheResult<Self::WeakCache<T, V, E>>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue;
}

/// Factory for [`NopCache`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NopFactory;

impl MemoizationCacheFactory for NopFactory {
    type Cache<K, V, E> = NopCache<K, V, E>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<NopCache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        Ok(NopCache::new(func, options))
    }
}

/// Factory for [`UnboundedCache`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnboundedFactory;

impl MemoizationCacheFactory for UnboundedFactory {
    type Cache<K, V, E> = UnboundedCache<K, V, E>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<UnboundedCache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        Ok(UnboundedCache::new(func, options))
    }
}

impl WeakMemoizationCacheFactory for UnboundedFactory {
    type WeakCache<T, V, E> = UnboundedCache<Arc<T>, V, E, WeakKeys>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue;

    fn create_weak<T, V, E>(
        &self,
        func: MemoFn<Arc<T>, V, E>,
        options: MemoOptions,
    ) -> CacheResult<UnboundedCache<Arc<T>, V, E, WeakKeys>>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue,
    {
        Ok(UnboundedCache::new(func, options))
    }
}

/// Factory for [`LruCache`].
#[derive(Debug, Clone, Copy)]
pub struct LruFactory {
    /// Configuration of every cache built.
    pub config: LruCacheConfig,
}

impl LruFactory {
    /// Creates a factory for caches with the given configuration.
    pub fn new(config: LruCacheConfig) -> Self {
        Self { config }
    }
}

impl MemoizationCacheFactory for LruFactory {
    type Cache<K, V, E> = LruCache<K, V, E>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<LruCache<K, V, E>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        Ok(LruCache::init(self.config, func, options))
    }
}

/// Factory for [`RankedCache`].
pub struct RankedFactory<R> {
    /// Configuration of every cache built.
    pub config: RankedCacheConfig,
    /// Ranking shared by every cache built.
    pub ranker: Ranker<R>,
}

impl<R> RankedFactory<R> {
    /// Creates a factory for caches with the given configuration and ranking.
    pub fn new(config: RankedCacheConfig, ranker: Ranker<R>) -> Self {
        Self { config, ranker }
    }
}

impl<R> Clone for RankedFactory<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config,
            ranker: Arc::clone(&self.ranker),
        }
    }
}

impl<R> fmt::Debug for RankedFactory<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RankedFactory")
            .field("config", &self.config)
            .finish()
    }
}

impl<R> MemoizationCacheFactory for RankedFactory<R>
where
    R: PartialOrd + 'static,
{
    type Cache<K, V, E> = RankedCache<K, V, E, R>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue;

    fn create<K, V, E>(
        &self,
        func: MemoFn<K, V, E>,
        options: MemoOptions,
    ) -> CacheResult<RankedCache<K, V, E, R>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        RankedCache::init(self.config, Arc::clone(&self.ranker), func, options)
    }
}

impl<R> WeakMemoizationCacheFactory for RankedFactory<R>
where
    R: PartialOrd + 'static,
{
    type WeakCache<T, V, E> = RankedCache<Arc<T>, V, E, R, WeakKeys>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue;

    fn create_weak<T, V, E>(
        &self,
        func: MemoFn<Arc<T>, V, E>,
        options: MemoOptions,
    ) -> CacheResult<RankedCache<Arc<T>, V, E, R, WeakKeys>>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue,
    {
        RankedCache::init(self.config, Arc::clone(&self.ranker), func, options)
    }
}
