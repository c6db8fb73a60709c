//! Discardable handles.
//!
//! A [`Handle`] is a caller's lease on a canonical value. Releasing it gives
//! back the reference on its own storage entry and then, for composite values,
//! one reference on each canonical sub-part.
//!
//! Release is checked: [`Handle::release`] fails with
//! [`CacheError::Released`] the second time, and [`Handle::value`] fails once
//! the handle is released. A handle that is dropped without being released
//! releases itself.

use crate::error::{CacheError, CacheResult};
use crate::storage::{Storage, StorageEntry};
use core::fmt;
use std::sync::Arc;
use tracing::warn;

/// Something holding references that must be given back exactly once.
pub trait Release: Send {
    /// Gives back the held references.
    fn release(&mut self) -> CacheResult<()>;
}

struct Lease<T> {
    storage: Arc<dyn Storage<T>>,
    entry: Arc<StorageEntry<T>>,
}

/// Lease on a canonical value.
pub struct Handle<T> {
    value: Option<Arc<T>>,
    lease: Option<Lease<T>>,
    parts: Vec<Box<dyn Release>>,
}

impl<T> Handle<T> {
    pub(crate) fn leased(
        storage: Arc<dyn Storage<T>>,
        entry: Arc<StorageEntry<T>>,
        parts: Vec<Box<dyn Release>>,
    ) -> Self {
        Self {
            value: Some(Arc::clone(entry.value())),
            lease: Some(Lease { storage, entry }),
            parts,
        }
    }

    /// Wraps a value that was not interned. Releasing it only marks it released.
    pub fn detached(value: Arc<T>) -> Self {
        Self {
            value: Some(value),
            lease: None,
            parts: Vec::new(),
        }
    }

    /// The canonical value.
    pub fn value(&self) -> CacheResult<&Arc<T>> {
        self.value.as_ref().ok_or(CacheError::Released)
    }

    /// `true` once released.
    pub fn is_released(&self) -> bool {
        self.value.is_none()
    }

    /// `true` if the value is backed by a storage entry.
    pub fn is_interned(&self) -> bool {
        self.lease.is_some()
    }

    /// Releases the value and every sub-part reference.
    ///
    /// All references are given back even if one of them fails; the first
    /// failure is returned.
    pub fn release(&mut self) -> CacheResult<()> {
        if self.value.take().is_none() {
            return Err(CacheError::Released);
        }

        let mut first_err = None;
        if let Some(lease) = self.lease.take() {
            if let Err(err) = lease.storage.release(&lease.entry) {
                first_err.get_or_insert(err);
            }
        }
        for mut part in self.parts.drain(..) {
            if let Err(err) = part.release() {
                first_err.get_or_insert(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<T: Send + Sync + 'static> Release for Handle<T> {
    fn release(&mut self) -> CacheResult<()> {
        Handle::release(self)
    }
}

impl<T> Drop for Handle<T> {
    fn drop(&mut self) {
        if self.is_released() {
            return;
        }
        if let Err(err) = self.release() {
            warn!(error = %err, "implicit handle release failed");
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("value", &self.value)
            .field("interned", &self.lease.is_some())
            .field("parts", &self.parts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::UnboundedStorage;

    fn leased(storage: &Arc<UnboundedStorage<String>>, s: &str) -> Handle<String> {
        let entry = storage.acquire(s.to_string()).unwrap();
        Handle::leased(
            Arc::clone(storage) as Arc<dyn Storage<String>>,
            entry,
            Vec::new(),
        )
    }

    #[test]
    fn test_release_once() {
        let storage = Arc::new(UnboundedStorage::new());
        let mut handle = leased(&storage, "a");
        assert_eq!(handle.value().unwrap().as_str(), "a");
        handle.release().unwrap();
        assert!(handle.is_released());
        assert_eq!(handle.value().err(), Some(CacheError::Released));
        assert_eq!(handle.release(), Err(CacheError::Released));
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_drop_releases() {
        let storage = Arc::new(UnboundedStorage::new());
        {
            let _a = leased(&storage, "a");
            let _b = leased(&storage, "a");
            assert_eq!(storage.len(), 1);
        }
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_release_cascades_to_parts() {
        let storage = Arc::new(UnboundedStorage::new());
        let part = leased(&storage, "part");
        let entry = storage.acquire("whole".to_string()).unwrap();
        let mut whole = Handle::leased(
            Arc::clone(&storage) as Arc<dyn Storage<String>>,
            entry,
            vec![Box::new(part) as Box<dyn Release>],
        );
        assert_eq!(storage.len(), 2);
        whole.release().unwrap();
        assert_eq!(storage.len(), 0);
    }

    #[test]
    fn test_detached_handle() {
        let mut handle = Handle::detached(Arc::new(5));
        assert!(!handle.is_interned());
        assert_eq!(**handle.value().unwrap(), 5);
        handle.release().unwrap();
        assert!(handle.release().is_err());
    }
}
