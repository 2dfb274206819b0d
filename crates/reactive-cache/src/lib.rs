//! A reactive, key-addressed, lazily populated cache.
//!
//! [`ReactiveCache::get`] returns whatever is cached for a key. The very first request
//! for a key invokes a [`Producer`], which may return the value right away or a future
//! resolving to it. Either way, the producer runs at most once per key, and observers
//! registered with [`ReactiveCache::observe`] are notified as the key moves through its
//! [`Status`] lifecycle.
//!
//! The status and value of every key live in two [`ObservableMap`]s, which can also be
//! used on their own.

#![warn(missing_docs)]

#[macro_use]
pub mod metrics;

mod cache;
mod config;
mod error;
pub mod observable;
mod producer;
mod status;

pub use cache::*;
pub use config::*;
pub use error::*;
pub use observable::{Notifier, ObservableMap, Subscription};
pub use producer::*;
pub use status::{Snapshot, Status};
