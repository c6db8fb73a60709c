//! Memoizer Façade
//!
//! [`Memoizer`] turns plain closures of zero to three arguments into memoized
//! callables backed by a cache from any [`MemoizationCacheFactory`]:
//!
//! | Shape | Method | Cache key |
//! |-------|--------|-----------|
//! | `Fn() -> V` | [`memoize0`](Memoizer::memoize0) | `()` |
//! | `Fn(&K) -> V` | [`memoize`](Memoizer::memoize) | `K` |
//! | `Fn(&K) -> Result<V, E>` | [`memoize_fallible`](Memoizer::memoize_fallible) | `K` |
//! | `Fn(&A, &B) -> V` | [`memoize2`](Memoizer::memoize2) | `(A, B)` |
//! | `Fn(&A, &B, &C) -> V` | [`memoize3`](Memoizer::memoize3) | `(A, B, C)` |
//!
//! Functions without a meaningful result memoize with `V = ()`. Multi-argument
//! keys are tuples, compared element by element.
//!
//! [`WeakMemoizer`] memoizes functions of an `Arc` argument without keeping the
//! argument alive. [`WeakMemoizer::memoize2`] threads a second, strongly held
//! argument through a per-target inner cache.
//!
//! # Examples
//!
//! ```
//! use memocache::memo::{MemoizationCache, UnboundedFactory};
//! use memocache::memoizer::Memoizer;
//!
//! let memoizer = Memoizer::new(UnboundedFactory);
//! let area = memoizer.memoize2(|w: &u32, h: &u32| w * h).unwrap();
//!
//! assert_eq!(area.call2(3, 4), Ok(12));
//! assert_eq!(area.call2(3, 4), Ok(12));
//! assert_eq!(area.cache().len(), 1);
//! ```

use crate::config::MemoOptions;
use crate::error::{CacheError, CacheResult, MemoError};
use crate::memo::{
    CacheKey, CacheValue, MemoFn, MemoizationCache, MemoizationCacheFactory,
    WeakMemoizationCacheFactory,
};
use core::convert::Infallible;
use core::fmt::{self, Debug};
use core::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "concurrent")]
use crate::concurrent::SynchronizedCache;

/// Builds memoized callables from closures.
#[derive(Clone)]
pub struct Memoizer<F> {
    factory: F,
    options: MemoOptions,
}

impl<F: MemoizationCacheFactory> Memoizer<F> {
    /// Creates a memoizer with default options.
    pub fn new(factory: F) -> Self {
        Self::with_options(factory, MemoOptions::default())
    }

    /// Creates a memoizer whose caches use `options`.
    pub fn with_options(factory: F, options: MemoOptions) -> Self {
        Self { factory, options }
    }

    /// Options passed to every cache built.
    pub fn options(&self) -> &MemoOptions {
        &self.options
    }

    /// Factory used to build caches.
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Memoizes a fallible single-argument function.
    pub fn memoize_fallible<K, V, E>(
        &self,
        f: impl Fn(&K) -> Result<V, E> + Send + Sync + 'static,
    ) -> CacheResult<Memoized<K, V, E, F::Cache<K, V, E>>>
    where
        K: CacheKey,
        V: CacheValue,
        E: CacheValue,
    {
        let func: MemoFn<K, V, E> = Arc::new(f);
        Ok(Memoized::new(self.factory.create(func, self.options.clone())?))
    }

    /// Memoizes a single-argument function.
    pub fn memoize<K, V>(
        &self,
        f: impl Fn(&K) -> V + Send + Sync + 'static,
    ) -> CacheResult<Memoized<K, V, Infallible, F::Cache<K, V, Infallible>>>
    where
        K: CacheKey,
        V: CacheValue,
    {
        self.memoize_fallible(move |key: &K| Ok(f(key)))
    }

    /// Memoizes a function without arguments.
    pub fn memoize0<V>(
        &self,
        f: impl Fn() -> V + Send + Sync + 'static,
    ) -> CacheResult<Memoized<(), V, Infallible, F::Cache<(), V, Infallible>>>
    where
        V: CacheValue,
    {
        self.memoize(move |_: &()| f())
    }

    /// Memoizes a two-argument function keyed by the argument pair.
    #[allow(clippy::type_complexity)]
    pub fn memoize2<A, B, V>(
        &self,
        f: impl Fn(&A, &B) -> V + Send + Sync + 'static,
    ) -> CacheResult<Memoized<(A, B), V, Infallible, F::Cache<(A, B), V, Infallible>>>
    where
        A: CacheKey,
        B: CacheKey,
        V: CacheValue,
    {
        self.memoize(move |(a, b): &(A, B)| f(a, b))
    }

    /// Memoizes a three-argument function keyed by the argument triple.
    #[allow(clippy::type_complexity)]
    pub fn memoize3<A, B, C, V>(
        &self,
        f: impl Fn(&A, &B, &C) -> V + Send + Sync + 'static,
    ) -> CacheResult<Memoized<(A, B, C), V, Infallible, F::Cache<(A, B, C), V, Infallible>>>
    where
        A: CacheKey,
        B: CacheKey,
        C: CacheKey,
        V: CacheValue,
    {
        self.memoize(move |(a, b, c): &(A, B, C)| f(a, b, c))
    }
}

impl<F: Debug> fmt::Debug for Memoizer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoizer")
            .field("factory", &self.factory)
            .field("options", &self.options)
            .finish()
    }
}

/// A memoized callable paired with its cache.
pub struct Memoized<K, V, E, C> {
    cache: C,
    _marker: PhantomData<fn(K) -> Result<V, E>>,
}

impl<K, V, E, C> Memoized<K, V, E, C>
where
    C: MemoizationCache<K, V, E>,
{
    fn new(cache: C) -> Self {
        Self {
            cache,
            _marker: PhantomData,
        }
    }

    /// Calls the memoized function.
    pub fn call(&self, key: K) -> Result<V, MemoError<E>> {
        self.cache.get_or_add(key)
    }

    /// The backing cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Unwraps the backing cache.
    pub fn into_cache(self) -> C {
        self.cache
    }
}

fn infallible<V>(result: Result<V, MemoError<Infallible>>) -> CacheResult<V> {
    match result {
        Ok(value) => Ok(value),
        Err(MemoError::Cache(err)) => Err(err),
        Err(MemoError::Invoke(never)) => match never {},
    }
}

impl<K, V, C> Memoized<K, V, Infallible, C>
where
    C: MemoizationCache<K, V, Infallible>,
{
    /// Calls a memoized infallible function.
    pub fn get(&self, key: K) -> CacheResult<V> {
        infallible(self.cache.get_or_add(key))
    }
}

impl<V, C> Memoized<(), V, Infallible, C>
where
    C: MemoizationCache<(), V, Infallible>,
{
    /// Calls a memoized function without arguments.
    pub fn get0(&self) -> CacheResult<V> {
        self.get(())
    }
}

impl<A, B, V, C> Memoized<(A, B), V, Infallible, C>
where
    C: MemoizationCache<(A, B), V, Infallible>,
{
    /// Calls a memoized two-argument function.
    pub fn call2(&self, a: A, b: B) -> CacheResult<V> {
        self.get((a, b))
    }
}

impl<A, B, X, V, C> Memoized<(A, B, X), V, Infallible, C>
where
    C: MemoizationCache<(A, B, X), V, Infallible>,
{
    /// Calls a memoized three-argument function.
    pub fn call3(&self, a: A, b: B, x: X) -> CacheResult<V> {
        self.get((a, b, x))
    }
}

impl<K, V, E, C: Debug> fmt::Debug for Memoized<K, V, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memoized")
            .field("cache", &self.cache)
            .finish()
    }
}

/// Builds memoized callables over `Arc` arguments held weakly.
#[derive(Clone)]
pub struct WeakMemoizer<F> {
    factory: F,
    options: MemoOptions,
}

impl<F: WeakMemoizationCacheFactory> WeakMemoizer<F> {
    /// Creates a weak memoizer with default options.
    pub fn new(factory: F) -> Self {
        Self::with_options(factory, MemoOptions::default())
    }

    /// Creates a weak memoizer whose caches use `options`.
    pub fn with_options(factory: F, options: MemoOptions) -> Self {
        Self { factory, options }
    }

    /// Memoizes a fallible function of a weakly held argument.
    pub fn memoize_fallible<T, V, E>(
        &self,
        f: impl Fn(&Arc<T>) -> Result<V, E> + Send + Sync + 'static,
    ) -> CacheResult<Memoized<Arc<T>, V, E, F::WeakCache<T, V, E>>>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
        E: CacheValue,
    {
        let func: MemoFn<Arc<T>, V, E> = Arc::new(f);
        Ok(Memoized::new(
            self.factory.create_weak(func, self.options.clone())?,
        ))
    }

    /// Memoizes a function of a weakly held argument.
    pub fn memoize<T, V>(
        &self,
        f: impl Fn(&Arc<T>) -> V + Send + Sync + 'static,
    ) -> CacheResult<Memoized<Arc<T>, V, Infallible, F::WeakCache<T, V, Infallible>>>
    where
        T: Debug + Send + Sync + 'static,
        V: CacheValue,
    {
        self.memoize_fallible(move |target: &Arc<T>| Ok(f(target)))
    }

    /// Memoizes a function of a weakly held target and a strongly held
    /// second argument.
    ///
    /// Each live target gets its own inner cache, built by `inner`, keyed by
    /// the second argument. The inner cache holds the target weakly and goes
    /// away with the target's slot.
    #[cfg(feature = "concurrent")]
    pub fn memoize2<T, B, V, SF>(
        &self,
        inner: &Memoizer<SF>,
        f: impl Fn(&Arc<T>, &B) -> V + Send + Sync + 'static,
    ) -> CacheResult<WeakMemoized2<T, B, V, F, SF>>
    where
        T: Debug + Send + Sync + 'static,
        B: CacheKey,
        V: CacheValue,
        SF: MemoizationCacheFactory,
    {
        let f = Arc::new(f);
        let factory = inner.factory.clone();
        let options = inner.options.clone();
        let outer: MemoFn<Arc<T>, InnerMemo<B, V, SF>, CacheError> =
            Arc::new(move |target: &Arc<T>| {
                let weak = Arc::downgrade(target);
                let f = Arc::clone(&f);
                let inner_fn: MemoFn<B, V, CacheError> = Arc::new(move |b: &B| {
                    let target = weak.upgrade().ok_or_else(|| {
                        CacheError::InvalidState("weakly held argument was reclaimed".to_string())
                    })?;
                    Ok(f(&target, b))
                });
                let cache = factory.create(inner_fn, options.clone())?;
                Ok(InnerMemo(Arc::new(SynchronizedCache::new(cache))))
            });
        Ok(WeakMemoized2 {
            outer: self.factory.create_weak(outer, self.options.clone())?,
        })
    }
}

impl<F: Debug> fmt::Debug for WeakMemoizer<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakMemoizer")
            .field("factory", &self.factory)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(feature = "concurrent")]
struct InnerMemo<B, V, SF>(Arc<SynchronizedCache<SF::Cache<B, V, CacheError>>>)
where
    B: CacheKey,
    V: CacheValue,
    SF: MemoizationCacheFactory;

#[cfg(feature = "concurrent")]
impl<B, V, SF> Clone for InnerMemo<B, V, SF>
where
    B: CacheKey,
    V: CacheValue,
    SF: MemoizationCacheFactory,
{
    fn clone(&self) -> Self {
        InnerMemo(Arc::clone(&self.0))
    }
}

#[cfg(feature = "concurrent")]
impl<B, V, SF> fmt::Debug for InnerMemo<B, V, SF>
where
    B: CacheKey,
    V: CacheValue,
    SF: MemoizationCacheFactory,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<memoized: {} entries>", self.0.len())
    }
}

#[cfg(feature = "concurrent")]
fn flatten<V>(result: Result<V, MemoError<CacheError>>) -> CacheResult<V> {
    result.map_err(|err| match err {
        MemoError::Invoke(err) | MemoError::Cache(err) => err,
    })
}

/// A memoized two-argument function whose first argument is held weakly.
#[cfg(feature = "concurrent")]
pub struct WeakMemoized2<T, B, V, F, SF>
where
    T: Debug + Send + Sync + 'static,
    B: CacheKey,
    V: CacheValue,
    F: WeakMemoizationCacheFactory,
    SF: MemoizationCacheFactory,
{
    outer: F::WeakCache<T, InnerMemo<B, V, SF>, CacheError>,
}

#[cfg(feature = "concurrent")]
impl<T, B, V, F, SF> WeakMemoized2<T, B, V, F, SF>
where
    T: Debug + Send + Sync + 'static,
    B: CacheKey,
    V: CacheValue,
    F: WeakMemoizationCacheFactory,
    SF: MemoizationCacheFactory,
{
    /// Calls the memoized function.
    pub fn call(&self, target: &Arc<T>, b: B) -> CacheResult<V> {
        let inner = flatten(self.outer.get_or_add(Arc::clone(target)))?;
        flatten(inner.0.get_or_add(b))
    }

    /// Number of targets with an inner cache, reclaimed slots included.
    pub fn len(&self) -> usize {
        self.outer.len()
    }

    /// `true` if no target has an inner cache.
    pub fn is_empty(&self) -> bool {
        self.outer.is_empty()
    }

    /// Discards every inner cache.
    pub fn clear(&self) -> CacheResult<()> {
        self.outer.clear()
    }

    /// Lists targets and the size of their inner caches.
    pub fn debug_view(&self) -> String {
        self.outer.debug_view()
    }
}

#[cfg(feature = "concurrent")]
impl<T, B, V, F, SF> fmt::Debug for WeakMemoized2<T, B, V, F, SF>
where
    T: Debug + Send + Sync + 'static,
    B: CacheKey,
    V: CacheValue,
    F: WeakMemoizationCacheFactory,
    SF: MemoizationCacheFactory,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakMemoized2")
            .field("targets", &self.outer.len())
            .finish()
    }
}
