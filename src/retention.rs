//! How a memoization cache holds on to its keys.
//!
//! [`StrongKeys`] owns every key. [`WeakKeys`] holds `Arc` keys through a
//! [`Weak`] reference: the slot stays in the table after the last strong
//! reference is dropped and is only compacted out by the next prune pass.
//! Weakly held keys are looked up by identity (the address of the shared
//! allocation). The held `Weak` keeps that allocation from being reused, so an
//! address cannot be shared by a reclaimed slot and a live key.

use core::fmt::Debug;
use core::hash::Hash;
use std::sync::{Arc, Weak};

/// Key retention policy of a memoization cache.
pub trait KeyRetention<K>: Send + Sync + 'static {
    /// What the lookup table is keyed by.
    type Lookup: Hash + Eq + Clone + Send;
    /// What the slot keeps besides the lookup key.
    type Held: Send;

    /// `true` if slots can outlive their keys.
    const RECLAIMABLE: bool;

    /// Runs `f` with the lookup form of `key`.
    fn with_lookup<R>(key: &K, f: impl FnOnce(&Self::Lookup) -> R) -> R;

    /// Splits an owned key into its stored parts.
    fn split(key: K) -> (Self::Lookup, Self::Held);

    /// `true` if the key behind `held` is gone.
    fn is_reclaimed(held: &Self::Held) -> bool;

    /// Runs `f` with the key, or returns `None` if it was reclaimed.
    fn with_key<R>(lookup: &Self::Lookup, held: &Self::Held, f: impl FnOnce(&K) -> R) -> Option<R>;
}

/// Keys are owned by the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrongKeys;

impl<K> KeyRetention<K> for StrongKeys
where
    K: Hash + Eq + Clone + Debug + Send + Sync + 'static,
{
    type Lookup = K;
    type Held = ();

    const RECLAIMABLE: bool = false;

    #[inline]
    fn with_lookup<R>(key: &K, f: impl FnOnce(&K) -> R) -> R {
        f(key)
    }

    #[inline]
    fn split(key: K) -> (K, ()) {
        (key, ())
    }

    #[inline]
    fn is_reclaimed(_held: &()) -> bool {
        false
    }

    #[inline]
    fn with_key<R>(lookup: &K, _held: &(), f: impl FnOnce(&K) -> R) -> Option<R> {
        Some(f(lookup))
    }
}

/// `Arc` keys are held weakly and compared by identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct WeakKeys;

#[inline]
fn address<T>(key: &Arc<T>) -> usize {
    Arc::as_ptr(key) as usize
}

impl<T> KeyRetention<Arc<T>> for WeakKeys
where
    T: Send + Sync + 'static,
{
    type Lookup = usize;
    type Held = Weak<T>;

    const RECLAIMABLE: bool = true;

    #[inline]
    fn with_lookup<R>(key: &Arc<T>, f: impl FnOnce(&usize) -> R) -> R {
        f(&address(key))
    }

    fn split(key: Arc<T>) -> (usize, Weak<T>) {
        (address(&key), Arc::downgrade(&key))
    }

    #[inline]
    fn is_reclaimed(held: &Weak<T>) -> bool {
        held.strong_count() == 0
    }

    fn with_key<R>(_lookup: &usize, held: &Weak<T>, f: impl FnOnce(&Arc<T>) -> R) -> Option<R> {
        held.upgrade().map(|key| f(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_keys_detect_reclamation() {
        let key = Arc::new(String::from("k"));
        let (lookup, held) = <WeakKeys as KeyRetention<Arc<String>>>::split(Arc::clone(&key));
        assert_eq!(
            <WeakKeys as KeyRetention<Arc<String>>>::with_lookup(&key, |l| *l),
            lookup
        );
        assert!(!<WeakKeys as KeyRetention<Arc<String>>>::is_reclaimed(&held));
        drop(key);
        assert!(<WeakKeys as KeyRetention<Arc<String>>>::is_reclaimed(&held));
        assert!(
            <WeakKeys as KeyRetention<Arc<String>>>::with_key(&lookup, &held, |_| ()).is_none()
        );
    }

    #[test]
    fn test_weak_keys_use_identity() {
        let a = Arc::new(1);
        let b = Arc::new(1);
        let la = <WeakKeys as KeyRetention<Arc<i32>>>::with_lookup(&a, |l| *l);
        let lb = <WeakKeys as KeyRetention<Arc<i32>>>::with_lookup(&b, |l| *l);
        assert_ne!(la, lb);
    }

    #[test]
    fn test_strong_keys_never_reclaim() {
        let (lookup, held) = <StrongKeys as KeyRetention<String>>::split("k".to_string());
        assert!(!<StrongKeys as KeyRetention<String>>::is_reclaimed(&held));
        let seen = <StrongKeys as KeyRetention<String>>::with_key(&lookup, &held, |k| k.clone());
        assert_eq!(seen.as_deref(), Some("k"));
    }
}
