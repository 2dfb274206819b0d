use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::Deserialize;

use reactive_cache::{CacheConfig, CacheError, Produced, Producer};

#[derive(Debug, Deserialize)]
pub struct WorkloadsConfig {
    /// Settings shared by the caches of all workloads.
    #[serde(default)]
    pub cache: CacheConfig,
    pub workloads: Vec<Workload>,
}

#[derive(Debug, Deserialize)]
pub struct Workload {
    pub concurrency: usize,
    /// Number of distinct keys requested by this workload.
    pub keys: u64,
    #[serde(default)]
    pub producer: ProducerConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProducerConfig {
    /// Values are available right away.
    #[default]
    Sync,
    /// Values are available after `latency`, a `failure_rate` share of keys fails.
    Deferred {
        #[serde(with = "humantime_serde")]
        latency: Duration,
        #[serde(default)]
        failure_rate: f64,
    },
}

impl WorkloadsConfig {
    pub fn get(path: &Path) -> Result<Self> {
        let config = fs::read_to_string(path).context("failed to open workloads file")?;
        Self::from_str(&config)
    }

    fn from_str(config: &str) -> Result<Self> {
        // check for empty files explicitly
        if config.trim().is_empty() {
            anyhow::bail!("workloads file empty");
        }
        let config: Self =
            serde_yaml::from_str(config).context("failed to parse workloads YAML")?;

        for (i, workload) in config.workloads.iter().enumerate() {
            anyhow::ensure!(
                workload.concurrency > 0 && workload.keys > 0,
                "workload {i} needs a positive concurrency and key count"
            );
            anyhow::ensure!(
                u32::try_from(workload.concurrency).is_ok(),
                "workload {i} has a concurrency above {}",
                u32::MAX
            );
            if let ProducerConfig::Deferred { failure_rate, .. } = workload.producer {
                anyhow::ensure!(
                    (0.0..=1.0).contains(&failure_rate),
                    "workload {i} has a failure rate outside of [0, 1]"
                );
            }
        }

        Ok(config)
    }
}

/// A synthetic producer that counts its invocations.
#[derive(Clone, Debug)]
pub struct StressProducer {
    config: ProducerConfig,
    calls: Arc<AtomicUsize>,
}

impl StressProducer {
    pub fn new(config: ProducerConfig) -> Self {
        Self {
            config,
            calls: Default::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Producer<u64, u64> for StressProducer {
    fn produce(&self, key: &u64) -> Produced<u64> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let value = key.wrapping_mul(0x9e37_79b9_7f4a_7c15);

        match self.config {
            ProducerConfig::Sync => Produced::ready(value),
            ProducerConfig::Deferred {
                latency,
                failure_rate,
            } => {
                let fails = rand::rng().random_bool(failure_rate);
                Produced::deferred(async move {
                    tokio::time::sleep(latency).await;
                    if fails {
                        return Err(CacheError::Failed("injected failure".into()));
                    }
                    Ok(value)
                })
            }
        }
    }
}
