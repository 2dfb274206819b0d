use std::fmt;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::Instrument;

use crate::observable::{Callback, ObservableMap, Subscription};
use crate::status::Phase;
use crate::{CacheConfig, CacheError, FailurePolicy, Produced, Producer, Snapshot, Status};

type PostProcessor<V> = dyn Fn(V) -> V + Send + Sync;

/// Both observable maps, guarded by a single lock so that the miss check and the
/// claim of a key are one atomic step, and snapshots are always consistent.
struct Maps<K, V> {
    status: ObservableMap<K, Phase>,
    values: ObservableMap<K, Arc<V>>,
}

struct Inner<K, V> {
    config: CacheConfig,
    producer: Option<Box<dyn Producer<K, V>>>,
    process: Box<PostProcessor<V>>,
    runtime: Option<Handle>,
    maps: Mutex<Maps<K, V>>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash,
{
    fn maps(&self) -> MutexGuard<'_, Maps<K, V>> {
        // Observers run outside of the lock, so a poisoned lock still holds consistent maps.
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peek(&self, key: &K) -> Snapshot<V> {
        let maps = self.maps();
        Snapshot {
            status: maps.status.get(key).and_then(Phase::status).cloned(),
            value: maps.values.get(key).cloned(),
        }
    }
}

/// A reactive, lazily populated, key-addressed cache.
///
/// [`get`](Self::get) returns whatever is cached for a key, and on the very first
/// request for that key invokes the [`Producer`] to populate it. The producer runs
/// at most once per key for the lifetime of the cache, no matter how often or from
/// how many threads the key is requested.
///
/// Changes to the status and value of a key can be observed with
/// [`observe`](Self::observe), [`observe_status`](Self::observe_status) and
/// [`observe_value`](Self::observe_value).
///
/// Cloning the cache creates a new handle to the same entries.
pub struct ReactiveCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for ReactiveCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: Eq + Hash, V> fmt::Debug for ReactiveCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self
            .inner
            .maps
            .try_lock()
            .map(|maps| maps.status.len())
            .unwrap_or_default();
        f.debug_struct("ReactiveCache")
            .field("config", &self.inner.config)
            .field("entries", &entries)
            .field("has producer", &self.inner.producer.is_some())
            .finish()
    }
}

impl<K, V> Default for ReactiveCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> ReactiveCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a passive cache without a producer.
    ///
    /// Entries only ever appear through [`populate`](Self::populate).
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Starts building a cache.
    pub fn builder() -> ReactiveCacheBuilder<K, V> {
        ReactiveCacheBuilder::default()
    }

    /// The name of the cache, as configured.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// The number of keys that have been requested or populated.
    pub fn len(&self) -> usize {
        self.inner.maps().status.len()
    }

    /// Whether no key was requested or populated yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the current snapshot for `key`, invoking the producer on a miss.
    ///
    /// This never blocks on the producer: if it returned a deferred result, the
    /// snapshot is [`Status::Pending`] and the resolved value shows up later.
    pub fn get(&self, key: &K) -> Snapshot<V> {
        self.maybe_miss(key);
        self.peek(key)
    }

    /// Returns the current snapshot for `key`, without ever invoking the producer.
    pub fn peek(&self, key: &K) -> Snapshot<V> {
        self.inner.peek(key)
    }

    /// The current status of `key`.
    pub fn status(&self, key: &K) -> Option<Status> {
        self.inner
            .maps()
            .status
            .get(key)
            .and_then(Phase::status)
            .cloned()
    }

    /// The current value of `key`.
    pub fn value(&self, key: &K) -> Option<Arc<V>> {
        self.inner.maps().values.get(key).cloned()
    }

    /// Post-processes `value` and stores it under `key`, marking the key as
    /// [`Status::Success`].
    ///
    /// This overwrites whatever was stored before, regardless of the current status.
    /// A producer call that is still in flight for `key` will overwrite this value
    /// again once it resolves.
    pub fn populate(&self, key: K, value: V) {
        let value = Arc::new((self.inner.process)(value));

        let notifier = {
            let mut maps = self.inner.maps();
            let values = maps.values.set(key.clone(), value);
            let status = maps
                .status
                .set_if_changed(key.clone(), Phase::Visible(Status::Success));
            metric!(gauge("cache.entries") = maps.status.len() as u64, "cache" => self.name());
            values.merge(status)
        };

        tracing::debug!(cache = self.name(), ?key, "Populated cache entry");
        metric!(counter("cache.populate") += 1, "cache" => self.name());
        notifier.notify();
    }

    /// Requests `key` and waits until it reaches a terminal status.
    ///
    /// This waits indefinitely for keys that never resolve: keys of a cache without
    /// a producer that nobody populates, or failed keys with
    /// [`FailurePolicy::KeepPending`]. Use [`tokio::time::timeout`] to bound it.
    pub async fn resolve(&self, key: K) -> Result<Arc<V>, CacheError> {
        let notify = Arc::new(Notify::new());
        let subscription = {
            let notify = Arc::clone(&notify);
            self.observe_status(key.clone(), move |_| notify.notify_one())
        };

        let result = loop {
            match self.get(&key) {
                Snapshot {
                    status: Some(Status::Success),
                    value: Some(value),
                } => break Ok(value),
                Snapshot {
                    status: Some(Status::Failed(error)),
                    ..
                } => break Err(error),
                _ => notify.notified().await,
            }
        };

        drop(subscription);
        self.inner.maps().status.prune(&key);
        result
    }

    /// Observes `key`, calling `f` with the result of [`peek`](Self::peek).
    ///
    /// `f` is called once right away, and then every time the status or the value
    /// of `key` changes. Changes of other keys never call `f`. A single
    /// [`populate`](Self::populate) calls `f` only once, even though it changes both.
    pub fn observe<F>(&self, key: K, f: F) -> Subscription
    where
        F: Fn(Snapshot<V>) + Send + Sync + 'static,
    {
        let inner = Arc::downgrade(&self.inner);
        let observed = key.clone();
        let callback: Arc<Callback> = Arc::new(move || {
            if let Some(inner) = inner.upgrade() {
                f(inner.peek(&observed));
            }
        });

        {
            let mut maps = self.inner.maps();
            maps.status.observe(key.clone(), &callback);
            maps.values.observe(key, &callback);
        }

        callback();
        Subscription::new(callback)
    }

    /// Observes the status of `key`.
    ///
    /// `f` is called once right away, and then every time the status changes.
    pub fn observe_status<F>(&self, key: K, f: F) -> Subscription
    where
        F: Fn(Option<Status>) + Send + Sync + 'static,
    {
        let cache = self.downgrade();
        let observed = key.clone();
        let callback: Arc<Callback> = Arc::new(move || {
            if let Some(cache) = cache.upgrade() {
                f(cache.status(&observed));
            }
        });

        self.inner.maps().status.observe(key, &callback);

        callback();
        Subscription::new(callback)
    }

    /// Observes the value of `key`.
    ///
    /// `f` is called once right away, and then every time a value is stored,
    /// even if it compares equal to the previous one.
    pub fn observe_value<F>(&self, key: K, f: F) -> Subscription
    where
        F: Fn(Option<Arc<V>>) + Send + Sync + 'static,
    {
        let cache = self.downgrade();
        let observed = key.clone();
        let callback: Arc<Callback> = Arc::new(move || {
            if let Some(cache) = cache.upgrade() {
                f(cache.value(&observed));
            }
        });

        self.inner.maps().values.observe(key, &callback);

        callback();
        Subscription::new(callback)
    }

    fn downgrade(&self) -> WeakCache<K, V> {
        WeakCache {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Invokes the producer if `key` was never requested or populated.
    fn maybe_miss(&self, key: &K) {
        let Some(producer) = &self.inner.producer else {
            return;
        };

        let claimed = self
            .inner
            .maps()
            .status
            .insert_if_vacant(key.clone(), Phase::Claimed);
        if !claimed {
            tracing::trace!(cache = self.name(), ?key, "Cache hit");
            metric!(counter("cache.access") += 1, "cache" => self.name(), "result" => "hit");
            return;
        }

        tracing::debug!(cache = self.name(), ?key, "Cache miss");
        metric!(counter("cache.access") += 1, "cache" => self.name(), "result" => "miss");

        let produced = std::panic::catch_unwind(AssertUnwindSafe(|| producer.produce(key)))
            .unwrap_or_else(|_| {
                tracing::error!(cache = self.name(), ?key, "Producer panicked");
                Produced::Failed(CacheError::Panicked)
            });

        match produced {
            Produced::Ready(value) => self.populate(key.clone(), value),
            Produced::Failed(error) => self.fail(key.clone(), error),
            Produced::Deferred(future) => self.defer(key.clone(), future),
        }
    }

    /// Marks `key` as pending and spawns the task that populates it.
    fn defer(&self, key: K, future: BoxFuture<'static, Result<V, CacheError>>) {
        let runtime = match self.inner.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                tracing::error!(cache = self.name(), ?key, "No runtime to drive the producer");
                self.fail(key, CacheError::NoRuntime);
                return;
            }
        };

        let notifier = {
            let mut maps = self.inner.maps();
            // `populate` may have raced us to the key, which must not go back to pending.
            match maps.status.get(&key) {
                Some(Phase::Claimed) => maps
                    .status
                    .set_if_changed(key.clone(), Phase::Visible(Status::Pending)),
                _ => Default::default(),
            }
        };
        notifier.notify();

        let span = tracing::debug_span!("produce", cache = self.name(), ?key);
        let cache = self.downgrade();
        let name = self.name().to_owned();

        runtime.spawn(
            async move {
                let start = Instant::now();
                let result = AssertUnwindSafe(future)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!("Producer panicked");
                        Err(CacheError::Panicked)
                    });
                metric!(timer("cache.producer.duration") = start.elapsed(), "cache" => &name);

                // Nobody can observe the result once the cache is gone.
                let Some(cache) = cache.upgrade() else {
                    return;
                };
                match result {
                    Ok(value) => cache.populate(key, value),
                    Err(error) => cache.fail(key, error),
                }
            }
            .instrument(span),
        );
    }

    /// Records a producer failure for `key`, according to the failure policy.
    ///
    /// A key that reached `success` in the meantime keeps its value.
    fn fail(&self, key: K, error: CacheError) {
        tracing::warn!(cache = self.name(), ?key, error = %error, "Failed to produce cache entry");
        metric!(counter("cache.failure") += 1, "cache" => self.name());

        let phase = match self.inner.config.on_failure {
            FailurePolicy::Record => Phase::Visible(Status::Failed(error)),
            FailurePolicy::KeepPending => Phase::Visible(Status::Pending),
        };

        let notifier = {
            let mut maps = self.inner.maps();
            if maps.status.get(&key) == Some(&Phase::Visible(Status::Success)) {
                return;
            }
            maps.status.set_if_changed(key, phase)
        };
        notifier.notify();
    }
}

struct WeakCache<K, V> {
    inner: Weak<Inner<K, V>>,
}

impl<K, V> WeakCache<K, V> {
    fn upgrade(&self) -> Option<ReactiveCache<K, V>> {
        self.inner.upgrade().map(|inner| ReactiveCache { inner })
    }
}

/// Builder for a [`ReactiveCache`].
pub struct ReactiveCacheBuilder<K, V> {
    config: CacheConfig,
    producer: Option<Box<dyn Producer<K, V>>>,
    process: Option<Box<PostProcessor<V>>>,
    runtime: Option<Handle>,
}

impl<K, V> Default for ReactiveCacheBuilder<K, V> {
    fn default() -> Self {
        Self {
            config: CacheConfig::default(),
            producer: None,
            process: None,
            runtime: None,
        }
    }
}

impl<K, V> ReactiveCacheBuilder<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Uses `producer` to populate missing keys.
    pub fn producer<P: Producer<K, V>>(mut self, producer: P) -> Self {
        self.producer = Some(Box::new(producer));
        self
    }

    /// Applies `process` to every value before it is stored.
    ///
    /// This covers producer results as well as values passed to
    /// [`populate`](ReactiveCache::populate).
    pub fn process_data<F>(mut self, process: F) -> Self
    where
        F: Fn(V) -> V + Send + Sync + 'static,
    {
        self.process = Some(Box::new(process));
        self
    }

    /// Sets name and failure policy.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Drives deferred producer results on `runtime`.
    ///
    /// Without this, they are spawned on the runtime that is current at the time
    /// of the miss.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Creates the cache.
    pub fn build(self) -> ReactiveCache<K, V> {
        let process: Box<PostProcessor<V>> = self
            .process
            .unwrap_or_else(|| Box::new(std::convert::identity::<V>));
        ReactiveCache {
            inner: Arc::new(Inner {
                config: self.config,
                producer: self.producer,
                process,
                runtime: self.runtime,
                maps: Mutex::new(Maps {
                    status: ObservableMap::new(),
                    values: ObservableMap::new(),
                }),
            }),
        }
    }
}
