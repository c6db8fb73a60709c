//! Decomposition protocol and the composite cache built on it.

use super::{lease, ObjectCache};
use crate::error::CacheResult;
use crate::handle::{Handle, Release};
use crate::storage::{Storage, UnboundedStorage};
use core::fmt;
use core::hash::Hash;
use std::sync::Arc;

/// A tuple of independently cached parts.
///
/// `Shared` is the same tuple with every part replaced by its canonical
/// `Arc`.
pub trait PartTuple {
    /// The parts after interning.
    type Shared;
}

/// A value that can be split into cached parts plus an uncached remainder.
///
/// `reconstruct(decompose(x))` must compare equal to `x`.
pub trait Decompose: Sized {
    /// The cached parts, as a tuple of one to four values.
    type Parts: PartTuple;
    /// Whatever is kept as is.
    type Remainder;

    /// Splits the value.
    fn decompose(self) -> (Self::Parts, Self::Remainder);

    /// Rebuilds a value from canonical parts and the remainder.
    fn reconstruct(parts: <Self::Parts as PartTuple>::Shared, remainder: Self::Remainder) -> Self;
}

/// A tuple of object caches, one per part of `P`.
pub trait PartCaches<P: PartTuple>: Send + Sync {
    /// Interns every part and returns the canonical parts together with the
    /// handles that keep them alive.
    fn intern_parts(&self, parts: P) -> CacheResult<(P::Shared, Vec<Box<dyn Release>>)>;
}

macro_rules! impl_part_tuple {
    ($(($part:ident, $cache:ident, $idx:tt)),+) => {
        impl<$($part),+> PartTuple for ($($part,)+) {
            type Shared = ($(Arc<$part>,)+);
        }

        impl<$($part,)+ $($cache,)+> PartCaches<($($part,)+)> for ($($cache,)+)
        where
            $($part: Send + Sync + 'static, $cache: ObjectCache<$part>,)+
        {
            fn intern_parts(
                &self,
                parts: ($($part,)+),
            ) -> CacheResult<(($(Arc<$part>,)+), Vec<Box<dyn Release>>)> {
                // Handles already taken are released on drop if a later part fails.
                let mut leases: Vec<Box<dyn Release>> = Vec::new();
                let shared = ($({
                    let handle = self.$idx.create(parts.$idx)?;
                    let canonical = Arc::clone(handle.value()?);
                    leases.push(Box::new(handle));
                    canonical
                },)+);
                Ok((shared, leases))
            }
        }
    };
}

impl_part_tuple!((A, CA, 0));
impl_part_tuple!((A, CA, 0), (B, CB, 1));
impl_part_tuple!((A, CA, 0), (B, CB, 1), (C, CC, 2));
impl_part_tuple!((A, CA, 0), (B, CB, 1), (C, CC, 2), (D, CD, 3));

type Bypass<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Object cache for values with structurally shared parts.
///
/// Releasing a handle from this cache releases the composite's own entry and
/// one reference on each canonical part.
pub struct CompositeCache<T, C> {
    parts: C,
    storage: Arc<dyn Storage<T>>,
    bypass: Option<Bypass<T>>,
}

impl<T, C> CompositeCache<T, C>
where
    T: Decompose + Hash + Eq + Send + Sync + 'static,
    C: PartCaches<T::Parts>,
{
    /// Creates a cache storing composites in an [`UnboundedStorage`].
    pub fn new(parts: C) -> Self {
        Self::with_storage(parts, Arc::new(UnboundedStorage::new()))
    }
}

impl<T, C> CompositeCache<T, C> {
    /// Creates a cache storing composites in `storage`.
    pub fn with_storage(parts: C, storage: Arc<dyn Storage<T>>) -> Self {
        Self {
            parts,
            storage,
            bypass: None,
        }
    }

    /// Skips interning for items accepted by `bypass`; they are returned as
    /// detached handles.
    #[must_use]
    pub fn with_bypass<F>(mut self, bypass: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.bypass = Some(Arc::new(bypass));
        self
    }

    /// The sub-caches.
    pub fn part_caches(&self) -> &C {
        &self.parts
    }

    /// Number of canonical composites tracked.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// `true` if no composite is tracked.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

impl<T, C> ObjectCache<T> for CompositeCache<T, C>
where
    T: Decompose + Send + Sync + 'static,
    C: PartCaches<T::Parts>,
{
    fn create(&self, item: T) -> CacheResult<Handle<T>> {
        if let Some(bypass) = &self.bypass {
            if bypass(&item) {
                return Ok(Handle::detached(Arc::new(item)));
            }
        }

        let (parts, remainder) = item.decompose();
        let (shared, leases) = self.parts.intern_parts(parts)?;
        lease(&self.storage, T::reconstruct(shared, remainder), leases)
    }
}

impl<T, C> CompositeCache<T, C>
where
    T: Decompose + Send + Sync + 'static,
    C: PartCaches<T::Parts>,
{
    /// Like [`ObjectCache::create`] for an optional composite.
    ///
    /// `None` yields `None` without touching the sub-caches or the storage.
    pub fn create_optional(&self, item: Option<T>) -> CacheResult<Option<Handle<T>>> {
        item.map(|item| self.create(item)).transpose()
    }
}

impl<T, C: fmt::Debug> fmt::Debug for CompositeCache<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeCache")
            .field("parts", &self.parts)
            .field("len", &self.storage.len())
            .field("bypass", &self.bypass.is_some())
            .finish()
    }
}
