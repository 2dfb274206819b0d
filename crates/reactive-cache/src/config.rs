use serde::Deserialize;

/// Controls what happens to a key whose producer fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// The key moves to [`Status::Failed`](crate::Status::Failed), carrying the error.
    #[default]
    Record,
    /// The key stays [`Status::Pending`](crate::Status::Pending) forever and the
    /// error is only logged.
    KeepPending,
}

/// Per-cache configuration.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name of the cache, used in logs and as a metrics tag.
    pub name: String,
    /// What to do when the producer fails.
    pub on_failure: FailurePolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            on_failure: FailurePolicy::Record,
        }
    }
}
