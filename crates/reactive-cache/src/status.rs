use std::fmt;
use std::sync::Arc;

use crate::CacheError;

/// The fetch lifecycle of a key.
///
/// A key that was never requested has no status at all, which is why reads return an
/// `Option<Status>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    /// The producer returned a deferred result which has not resolved yet.
    Pending,
    /// A value is stored for the key.
    Success,
    /// The producer failed. Only [`populate`](crate::ReactiveCache::populate) moves a
    /// key out of this state.
    Failed(CacheError),
}

impl Status {
    /// Whether this status is final, as far as the producer is concerned.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Success => f.write_str("success"),
            Self::Failed(_) => f.write_str("failed"),
        }
    }
}

/// What the status map holds for a key.
///
/// A claimed key has been handed to the producer, but nothing about it is observable
/// yet. It reads as absent, while still preventing a second producer call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Phase {
    Claimed,
    Visible(Status),
}

impl Phase {
    pub(crate) fn status(&self) -> Option<&Status> {
        match self {
            Self::Claimed => None,
            Self::Visible(status) => Some(status),
        }
    }
}

/// A consistent view of a single cache entry, as returned by `get` and `peek`.
pub struct Snapshot<V> {
    /// The status of the key, `None` if the key was never requested or populated.
    pub status: Option<Status>,
    /// The stored value, present iff `status` is [`Status::Success`].
    pub value: Option<Arc<V>>,
}

impl<V> Snapshot<V> {
    /// A snapshot for a key that is unknown to the cache.
    pub fn absent() -> Self {
        Self {
            status: None,
            value: None,
        }
    }

    /// Whether a deferred result is in flight for this key.
    pub fn is_pending(&self) -> bool {
        self.status == Some(Status::Pending)
    }

    /// Whether a value is available.
    pub fn is_success(&self) -> bool {
        self.status == Some(Status::Success)
    }

    /// The error of a failed key.
    pub fn error(&self) -> Option<&CacheError> {
        match &self.status {
            Some(Status::Failed(error)) => Some(error),
            _ => None,
        }
    }
}

// Manual impls, so that `V` itself does not need to be `Clone`.
impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Self {
            status: self.status.clone(),
            value: self.value.clone(),
        }
    }
}

impl<V> Default for Snapshot<V> {
    fn default() -> Self {
        Self::absent()
    }
}

impl<V: PartialEq> PartialEq for Snapshot<V> {
    fn eq(&self, other: &Self) -> bool {
        self.status == other.status && self.value == other.value
    }
}

impl<V: Eq> Eq for Snapshot<V> {}

impl<V: fmt::Debug> fmt::Debug for Snapshot<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("status", &self.status)
            .field("value", &self.value)
            .finish()
    }
}
