use std::fmt::Display;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Durability state of a store's in-memory value.
///
/// The state only ever describes the relationship between the in-memory copy
/// and the backing file. The in-memory value is authoritative regardless of
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheState {
    /// A disk load has never been attempted.
    Unloaded,
    /// The value is loaded or freshly created but has not been durably
    /// persisted; also the resting state after a failed load.
    InMemoryOnly,
    /// The in-memory value is known equal to the last successful disk write.
    InMemoryAndOnDisk,
}

/// The logical value of a store together with its durability state.
///
/// A payload always carries a value; the seed supplied at store construction
/// populates it before the first load. Transforms replace the payload
/// wholesale rather than mutating it in place.
#[derive(Clone, Debug, PartialEq)]
pub struct CachePayload<T> {
    pub state: CacheState,
    pub value: T,
}

impl<T> CachePayload<T> {
    pub fn unloaded(value: T) -> Self {
        Self {
            state: CacheState::Unloaded,
            value,
        }
    }
}

/// Consumer-facing result of a cache read or write.
///
/// `Pending` only ever appears transiently on the fast-response read path
/// while an implicit initial load is outstanding. Once a logical read has
/// settled to `Success` or `Failure` it does not revert to `Pending`.
#[derive(Clone, Debug)]
pub enum AsyncResult<T> {
    Pending,
    Success(T),
    Failure(StoreError),
}

impl<T> AsyncResult<T> {
    #[inline]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[inline]
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(self) -> Option<StoreError> {
        match self {
            Self::Failure(error) => Some(error),
            _ => None,
        }
    }
}

/// Stable identifier of a store, derived from its backing file path.
///
/// Doubles as the subscription key on the notification bus. Two stores with
/// the same identity represent the same durable file, so distinct paths never
/// collide on the bus.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StoreIdentity(Arc<str>);

impl StoreIdentity {
    pub fn from_path(path: &Path) -> Self {
        Self(Arc::from(path.to_string_lossy().as_ref()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StoreIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Errors surfaced by stores and their update queues.
///
/// The type is `Clone` because a single sticky load failure must be surfaced
/// to any number of subsequent readers; I/O sources are held behind `Arc` for
/// that reason.
#[derive(Clone, Debug, Error)]
pub enum StoreError {
    #[error("failed to read cache file {path:?}: {cause}")]
    Read { path: PathBuf, cause: Arc<io::Error> },

    #[error("failed to write cache file {path:?}: {cause}")]
    Write { path: PathBuf, cause: Arc<io::Error> },

    #[error("failed to delete cache file {path:?}: {cause}")]
    Delete { path: PathBuf, cause: Arc<io::Error> },

    #[error("failed to decode cache file {path:?}: {detail}")]
    Decode { path: PathBuf, detail: String },

    #[error("failed to encode value for cache file {path:?}: {detail}")]
    Encode { path: PathBuf, detail: String },

    #[error("cache transform failed: {detail}")]
    Transform { detail: String },

    #[error("the serialized update queue worker is gone")]
    QueueGone,

    #[error("store construction failed: {detail}")]
    Initialization { detail: String },
}

impl StoreError {
    /// Shortcut for aborting a transform from within a fallible update.
    pub fn transform(detail: impl Into<String>) -> Self {
        Self::Transform { detail: detail.into() }
    }
}
