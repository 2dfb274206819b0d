//! Stress test for the reactive cache.
//!
//! Runs a set of workloads against fresh caches, each with a configurable producer,
//! and reports throughput, latencies and how often the producer was invoked.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;

use crate::workloads::WorkloadsConfig;

mod logging;
mod stresstest;
mod workloads;

/// Command line interface parser.
#[derive(Debug, Parser)]
#[command(version)]
struct Cli {
    /// Path to the workload definition file.
    #[arg(long, short, value_name = "FILE")]
    workloads: PathBuf,

    /// Duration of the stresstest.
    #[arg(long, short, value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Report metrics to the statsd server at this address.
    #[arg(long, value_name = "HOST")]
    statsd: Option<String>,

    /// Log filter directives, in `RUST_LOG` syntax.
    #[arg(long, default_value = "info")]
    log: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let workloads = WorkloadsConfig::get(&cli.workloads)?;

    logging::init(logging::Config {
        env_filter: cli.log,
        json: cli.json,
    });

    if let Some(host) = cli.statsd {
        // have some default tags, just to be closer to the real world config
        let mut tags = BTreeMap::new();
        tags.insert("host".into(), "stresstest".into());
        tags.insert("env".into(), "stresstest".into());

        reactive_cache::metrics::configure_statsd("reactive_cache", host.as_str(), tags)
            .context("failed to configure statsd")?;
    }

    stresstest::perform_stresstest(workloads, cli.duration).await
}
