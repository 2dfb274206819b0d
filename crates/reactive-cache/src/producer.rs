use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;

use crate::CacheError;

/// The outcome of a single producer call.
pub enum Produced<V> {
    /// The value is available right away. The key goes straight to `success`.
    Ready(V),
    /// The producer failed right away.
    Failed(CacheError),
    /// The value will be available once the future resolves. The key is `pending`
    /// until then.
    Deferred(BoxFuture<'static, Result<V, CacheError>>),
}

impl<V> Produced<V> {
    /// A synchronously available value.
    pub fn ready(value: V) -> Self {
        Self::Ready(value)
    }

    /// A value that becomes available once `future` resolves.
    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = Result<V, CacheError>> + Send + 'static,
    {
        Self::Deferred(Box::pin(future))
    }

    /// A synchronously available result.
    pub fn from_result(result: Result<V, CacheError>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(error) => Self::Failed(error),
        }
    }
}

impl<V> From<V> for Produced<V> {
    fn from(value: V) -> Self {
        Self::Ready(value)
    }
}

impl<V: fmt::Debug> fmt::Debug for Produced<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
            Self::Failed(error) => f.debug_tuple("Failed").field(error).finish(),
            Self::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

/// The source of values for a [`ReactiveCache`](crate::ReactiveCache).
///
/// The cache calls [`produce`](Self::produce) at most once per key. Any closure
/// `Fn(&K) -> Produced<V>` is a producer.
pub trait Producer<K, V>: Send + Sync + 'static {
    /// Computes or fetches the value for `key`.
    fn produce(&self, key: &K) -> Produced<V>;
}

impl<K, V, F> Producer<K, V> for F
where
    F: Fn(&K) -> Produced<V> + Send + Sync + 'static,
{
    fn produce(&self, key: &K) -> Produced<V> {
        self(key)
    }
}
