use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rand::Rng;
use reactive_cache::{CacheConfig, ReactiveCache};
use sketches_ddsketch::DDSketch;
use tokio::sync::Semaphore;

use crate::workloads::{StressProducer, WorkloadsConfig};

/// Outcome counters of a single workload.
#[derive(Debug, Default)]
struct Outcomes {
    failures: AtomicUsize,
    timeouts: AtomicUsize,
}

struct Report {
    concurrency: usize,
    keys: u64,
    durations: DDSketch,
    failures: usize,
    timeouts: usize,
    producer_calls: usize,
    entries: usize,
}

pub async fn perform_stresstest(workloads: WorkloadsConfig, duration: Duration) -> Result<()> {
    let WorkloadsConfig {
        cache: cache_config,
        workloads,
    } = workloads;

    // initialize workloads, each one gets a fresh cache
    let workloads: Vec<_> = workloads
        .into_iter()
        .enumerate()
        .map(|(i, workload)| {
            let producer = StressProducer::new(workload.producer);
            let cache: ReactiveCache<u64, u64> = ReactiveCache::builder()
                .producer(producer.clone())
                .config(CacheConfig {
                    name: format!("{}-{i}", cache_config.name),
                    ..cache_config.clone()
                })
                .build();
            (workload.concurrency, workload.keys, producer, cache)
        })
        .collect();

    tracing::info!(workloads = workloads.len(), ?duration, "starting stresstest");

    // run the workloads concurrently
    let mut tasks = Vec::with_capacity(workloads.len());
    for (concurrency, keys, producer, cache) in workloads {
        let start = Instant::now();
        let deadline = tokio::time::Instant::from_std(start + duration);
        let permits = u32::try_from(concurrency).context("concurrency exceeds semaphore permits")?;

        let task = tokio::spawn(async move {
            let task_durations = Arc::new(Mutex::new(DDSketch::default()));
            let outcomes = Arc::new(Outcomes::default());
            let semaphore = Arc::new(Semaphore::new(concurrency));

            let sleep = tokio::time::sleep_until(deadline);
            tokio::pin!(sleep);

            loop {
                if deadline.elapsed() > Duration::ZERO {
                    break;
                }
                tokio::select! {
                    permit = semaphore.clone().acquire_owned() => {
                        let cache = cache.clone();
                        let task_durations = Arc::clone(&task_durations);
                        let outcomes = Arc::clone(&outcomes);
                        let key = rand::rng().random_range(0..keys);
                        let task_start = Instant::now();

                        tokio::spawn(async move {
                            match tokio::time::timeout_at(deadline, cache.resolve(key)).await {
                                Ok(Ok(_)) => {}
                                Ok(Err(_)) => {
                                    outcomes.failures.fetch_add(1, Ordering::Relaxed);
                                }
                                Err(_) => {
                                    outcomes.timeouts.fetch_add(1, Ordering::Relaxed);
                                }
                            }

                            task_durations
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .add(task_start.elapsed().as_secs_f64());

                            drop(permit);
                        });
                    }
                    _ = &mut sleep => {
                        break;
                    }
                }
            }

            // by acquiring *all* the semaphores, we essentially wait for all outstanding tasks to finish
            let _permits = semaphore.acquire_many(permits).await;

            let durations = {
                let mut task_durations = task_durations
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *task_durations)
            };

            Report {
                concurrency,
                keys,
                durations,
                failures: outcomes.failures.load(Ordering::Relaxed),
                timeouts: outcomes.timeouts.load(Ordering::Relaxed),
                producer_calls: producer.calls(),
                entries: cache.len(),
            }
        });
        tasks.push(task);
    }

    let finished_tasks = futures::future::join_all(tasks).await;

    let mut violations = Vec::new();
    for (i, task) in finished_tasks.into_iter().enumerate() {
        let report = task.context("workload task panicked")?;
        let Report {
            concurrency,
            keys,
            durations,
            failures,
            timeouts,
            producer_calls,
            entries,
        } = report;

        let ops = durations.count();
        let ops_ps = ops as f64 / duration.as_secs_f64();
        println!("Workload {i} (concurrency: {concurrency}): {ops} operations, {ops_ps:.2} ops/s");

        if ops > 0 {
            let quantile = |q| {
                let secs = durations.quantile(q).ok().flatten().unwrap_or_default();
                Duration::from_secs_f64(secs)
            };
            let avg = Duration::from_secs_f64(durations.sum().unwrap_or_default() / ops as f64);
            let (p50, p90, p99) = (quantile(0.5), quantile(0.9), quantile(0.99));
            println!("  avg: {avg:.2?}; p50: {p50:.2?}; p90: {p90:.2?}; p99: {p99:.2?}");
        }
        println!(
            "  failures: {failures}; timeouts: {timeouts}; producer calls: {producer_calls}; entries: {entries}/{keys}"
        );

        if producer_calls as u64 > keys || entries as u64 > keys {
            violations.push(i);
        }
    }

    if !violations.is_empty() {
        anyhow::bail!("producer called more than once per key in workloads {violations:?}");
    }

    Ok(())
}
