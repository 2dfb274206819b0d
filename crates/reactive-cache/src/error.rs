use std::time::Duration;

use thiserror::Error;

/// An error that happens while producing the value for a key.
///
/// Errors are persisted in the status map as [`Status::Failed`](crate::Status::Failed)
/// when the cache runs with [`FailurePolicy::Record`](crate::FailurePolicy::Record), so
/// they are cheap to clone and comparable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The producer has no value for the requested key.
    #[error("not found")]
    NotFound,
    /// The producer failed for another reason.
    ///
    /// The attached string contains the details reported by the producer.
    #[error("producer failed: {0}")]
    Failed(String),
    /// The producer gave up after a deadline of its own.
    ///
    /// The cache itself never imposes a timeout.
    #[error("producer timed out after {0:?}")]
    Timeout(Duration),
    /// The producer panicked, either during the call itself or while its
    /// deferred result was being driven.
    #[error("producer panicked")]
    Panicked,
    /// The producer returned a deferred result, but there was no tokio runtime
    /// available to drive it to completion.
    #[error("no async runtime available to drive the producer")]
    NoRuntime,
}

impl From<std::io::Error> for CacheError {
    #[track_caller]
    fn from(err: std::io::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    /// Logs an arbitrary error and turns it into [`Failed`](Self::Failed).
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr, "Producer failed");
        Self::Failed(e.to_string())
    }
}
