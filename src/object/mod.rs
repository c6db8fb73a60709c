//! Composable Object Caches
//!
//! An [`ObjectCache`] turns a value into a [`Handle`] on its canonical,
//! deduplicated instance.
//!
//! - [`Cache`] interns whole values in a [`Storage`].
//! - [`CompositeCache`] first splits a value into sub-parts through
//!   [`Decompose`], interns each part in its own sub-cache, rebuilds the value
//!   from the canonical parts and interns the result. Sub-caches are object
//!   caches themselves, so sharing nests to any depth.
//!
//! ```text
//!   Person { name, address, age }
//!        │ decompose
//!        ▼
//!   (name, address)  +  age
//!     │        │
//!     ▼        ▼
//!   Cache   CompositeCache<Address, ..>      sub-caches
//!     │        │
//!     ▼        ▼
//!   (Arc<name>, Arc<address>)  +  age
//!        │ reconstruct
//!        ▼
//!   Person (canonical parts) ──▶ own storage ──▶ Handle<Person>
//! ```

use crate::error::{CacheError, CacheResult};
use crate::handle::Handle;
use crate::storage::{Storage, UnboundedStorage};
use core::fmt;
use core::hash::Hash;
use std::sync::Arc;

mod composite;

pub use composite::{CompositeCache, Decompose, PartCaches, PartTuple};

/// Produces handles on canonical instances of `T`.
pub trait ObjectCache<T>: Send + Sync {
    /// Returns a handle on the canonical instance equal to `item`.
    fn create(&self, item: T) -> CacheResult<Handle<T>>;
}

impl<T, C> ObjectCache<T> for Arc<C>
where
    C: ObjectCache<T> + ?Sized,
{
    fn create(&self, item: T) -> CacheResult<Handle<T>> {
        (**self).create(item)
    }
}

/// Interns whole values, with no decomposition.
pub struct Cache<T> {
    storage: Arc<dyn Storage<T>>,
}

impl<T> Cache<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    /// Creates a cache over an [`UnboundedStorage`].
    pub fn new() -> Self {
        Self::with_storage(Arc::new(UnboundedStorage::new()))
    }
}

impl<T> Default for Cache<T>
where
    T: Hash + Eq + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Cache<T> {
    /// Creates a cache over `storage`.
    pub fn with_storage(storage: Arc<dyn Storage<T>>) -> Self {
        Self { storage }
    }

    /// Number of canonical values currently tracked.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }
}

/// Acquires `item` from `storage` and wraps the canonical entry in a handle.
///
/// A storage that hands back an entry without a reference is broken; the
/// entry is rejected rather than leased.
pub(crate) fn lease<T>(
    storage: &Arc<dyn Storage<T>>,
    item: T,
    parts: Vec<Box<dyn crate::handle::Release>>,
) -> CacheResult<Handle<T>> {
    let entry = storage.acquire(item)?;
    if entry.ref_count() == 0 {
        return Err(CacheError::InvalidCanonicalEntry);
    }
    Ok(Handle::leased(Arc::clone(storage), entry, parts))
}

impl<T> ObjectCache<T> for Cache<T>
where
    T: Send + Sync + 'static,
{
    fn create(&self, item: T) -> CacheResult<Handle<T>> {
        lease(&self.storage, item, Vec::new())
    }
}

impl<T> fmt::Debug for Cache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.storage.len())
            .finish()
    }
}
