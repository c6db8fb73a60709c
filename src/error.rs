//! Error types for storage, object cache and memoization operations.
//!
//! Two layers of failure exist:
//!
//! - [`CacheError`]: faults raised by the caches themselves (bad arguments,
//!   misuse of handles, disposed caches, unsupported capabilities).
//! - [`MemoError`]: the result type of a memoized call, which is either the
//!   wrapped function's own error or a [`CacheError`].
//!
//! Nothing in this crate swallows an error: every fault is returned to the
//! caller of the operation that triggered it.

use thiserror::Error;

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Faults raised by the caching engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// A constructor or call argument was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The cache reached a state it cannot continue from.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The handle was already released.
    #[error("handle has already been released")]
    Released,

    /// The entry is not tracked by this storage or its count is already zero.
    #[error("entry is not tracked by this storage or has no outstanding references")]
    UntrackedEntry,

    /// A storage returned a canonical entry that cannot be handed out.
    #[error("storage returned an invalid canonical entry")]
    InvalidCanonicalEntry,

    /// The cache was disposed.
    #[error("cache has been disposed")]
    Disposed,

    /// The requested capability is not offered by this cache or storage.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A derived metric was requested before any access was recorded.
    #[error("division by zero: metric requires at least one recorded hit")]
    DivideByZero,

    /// An intern clone function returned its argument instead of a copy.
    #[error("clone function returned the same instance it was given")]
    InvalidCloneFunction,

    /// The calling thread waited on a computation it is itself running.
    #[error("re-entrant invocation for a key whose computation is in flight on this thread")]
    ReentrantInvocation,
}

/// Failure of a memoized call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemoError<E> {
    /// The memoized function failed, either now or in a replayed cached outcome.
    #[error("memoized function failed: {0}")]
    Invoke(E),

    /// The cache itself failed.
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl<E> MemoError<E> {
    /// Returns the function error, if this is one.
    pub fn into_invoke(self) -> Option<E> {
        match self {
            MemoError::Invoke(err) => Some(err),
            MemoError::Cache(_) => None,
        }
    }

    /// Returns the cache error, if this is one.
    pub fn as_cache(&self) -> Option<&CacheError> {
        match self {
            MemoError::Invoke(_) => None,
            MemoError::Cache(err) => Some(err),
        }
    }
}
