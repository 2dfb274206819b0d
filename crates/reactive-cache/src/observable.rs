//! Keyed observable containers.
//!
//! An [`ObservableMap`] is a plain map that additionally keeps a list of observers per
//! key. Mutations never invoke observers directly: they return a [`Notifier`] that the
//! caller fires once it has released whatever lock guards the map. This lets observers
//! read the map again (or even mutate it) from within their callback.
//!
//! # Invariants
//!
//! 1. A mutation of key `a` only ever collects the observers registered for `a`.
//! 2. Observers are notified in registration order.
//! 3. [`ObservableMap::set_if_changed`] with a value equal to the current one is a
//!    no-op and yields an empty [`Notifier`].
//! 4. Dropping a [`Subscription`] removes the callback before the next notification.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

/// The callback type invoked when an observed entry changes.
pub type Callback = dyn Fn() + Send + Sync;

/// A map whose entries can be observed individually.
pub struct ObservableMap<K, T> {
    entries: HashMap<K, T>,
    observers: HashMap<K, Vec<Weak<Callback>>>,
}

impl<K, T> Default for ObservableMap<K, T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            observers: HashMap::new(),
        }
    }
}

impl<K, T> fmt::Debug for ObservableMap<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableMap")
            .field("entries", &self.entries.len())
            .field("observed keys", &self.observers.len())
            .finish()
    }
}

impl<K, T> ObservableMap<K, T>
where
    K: Eq + Hash,
{
    /// Creates an empty map without any observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entry for `key`, if any.
    pub fn get(&self, key: &K) -> Option<&T> {
        self.entries.get(key)
    }

    /// The number of entries in the map.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stores `value` under `key`, returning the observers of `key` to notify.
    pub fn set(&mut self, key: K, value: T) -> Notifier {
        let notifier = self.collect(&key);
        self.entries.insert(key, value);
        notifier
    }

    /// Stores `value` under `key` without notifying anyone, unless `key` is taken.
    ///
    /// Returns `true` if the value was inserted. This is meant for bookkeeping entries
    /// that are not externally visible.
    pub fn insert_if_vacant(&mut self, key: K, value: T) -> bool {
        match self.entries.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        }
    }

    /// Registers `callback` to be notified whenever the entry for `key` changes.
    ///
    /// Only a weak reference is kept: the callback stays registered for as long as
    /// some [`Subscription`] (or other strong reference) keeps it alive.
    pub fn observe(&mut self, key: K, callback: &Arc<Callback>) {
        let observers = self.observers.entry(key).or_default();
        // Entries that are never written would otherwise pile up dropped observers.
        observers.retain(|observer| observer.strong_count() > 0);
        observers.push(Arc::downgrade(callback));
    }

    /// Removes the dropped observers of `key`.
    pub fn prune(&mut self, key: &K) {
        if let Some(observers) = self.observers.get_mut(key) {
            observers.retain(|observer| observer.strong_count() > 0);
            if observers.is_empty() {
                self.observers.remove(key);
            }
        }
    }

    /// The number of observer slots registered for `key`, including dropped
    /// observers that were not pruned yet.
    pub fn observer_slots(&self, key: &K) -> usize {
        self.observers.get(key).map_or(0, Vec::len)
    }

    /// Collects the live observers of `key`, pruning dropped ones.
    fn collect(&mut self, key: &K) -> Notifier {
        let Some(observers) = self.observers.get_mut(key) else {
            return Notifier::default();
        };

        let mut callbacks = Vec::with_capacity(observers.len());
        observers.retain(|observer| match observer.upgrade() {
            Some(callback) => {
                callbacks.push(callback);
                true
            }
            None => false,
        });

        if observers.is_empty() {
            self.observers.remove(key);
        }

        Notifier { callbacks }
    }
}

impl<K, T> ObservableMap<K, T>
where
    K: Eq + Hash,
    T: PartialEq,
{
    /// Stores `value` under `key`, notifying observers only if the entry changed.
    pub fn set_if_changed(&mut self, key: K, value: T) -> Notifier {
        if self.entries.get(&key) == Some(&value) {
            return Notifier::default();
        }
        self.set(key, value)
    }
}

/// A batch of observer callbacks waiting to be invoked.
#[derive(Default)]
#[must_use = "observers are only invoked once the notifier is fired"]
pub struct Notifier {
    callbacks: Vec<Arc<Callback>>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl Notifier {
    /// Appends the callbacks of `other` that are not already part of this batch.
    ///
    /// An observer watching several maps is thus invoked only once per batch.
    pub fn merge(mut self, other: Notifier) -> Self {
        for callback in other.callbacks {
            if !self.callbacks.iter().any(|c| Arc::ptr_eq(c, &callback)) {
                self.callbacks.push(callback);
            }
        }
        self
    }

    /// The number of callbacks in this batch.
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether there is nobody to notify.
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Invokes all callbacks in order.
    pub fn notify(self) {
        for callback in self.callbacks {
            callback();
        }
    }
}

/// RAII guard for a registered observer.
///
/// The observer is unregistered as soon as this guard is dropped.
#[must_use = "dropping a subscription unregisters the observer immediately"]
pub struct Subscription {
    _callback: Arc<Callback>,
}

impl Subscription {
    pub(crate) fn new(callback: Arc<Callback>) -> Self {
        Self {
            _callback: callback,
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}
