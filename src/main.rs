use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use throughput_stress::logging::{init_logging, LogFormat};
use throughput_stress::{run_stress_test_with, Runtime, SleepDistribution, StressTestConfig};
use tracing::warn;

/// Keep stress workflows in flight against an in-memory durable runtime and
/// report throughput.
#[derive(Parser, Debug)]
#[command(name = "throughput-stress", version, about)]
struct Args {
    /// JSON config file; flags below override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Iterations per workflow
    #[arg(long)]
    iterations: Option<u64>,

    /// Seconds to keep launching workflows
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Workflows in flight at once
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Stop after launching this many workflows
    #[arg(long)]
    max_workflows: Option<usize>,

    /// Continue as new once a run's history reaches this many events
    #[arg(long)]
    continue_as_new_after: Option<u64>,

    /// Sleep buckets in seconds with weights, e.g. "1:5,10:2,60:1"
    #[arg(long)]
    sleep_distribution: Option<SleepDistribution>,

    #[arg(long)]
    skip_sleep: bool,

    /// Run the self query/describe/update/signal block every N iterations
    #[arg(long)]
    control_plane_every: Option<u64>,

    /// Spawn a child workflow every N iterations
    #[arg(long)]
    spawn_child_every: Option<u64>,

    /// Remote endpoint called once per iteration; registered with the runtime
    #[arg(long)]
    nexus_endpoint: Option<String>,

    /// Divide every sleep by this factor
    #[arg(long)]
    time_scale: Option<u32>,

    /// Crash and replay each execution once its history reaches this many events
    #[arg(long)]
    crash_after_events: Option<u64>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<StressTestConfig> {
        let mut config = match &self.config {
            Some(path) => StressTestConfig::from_file(path)?,
            None => StressTestConfig::default(),
        };
        let params = &mut config.params;
        if let Some(v) = self.iterations {
            params.iterations = v;
        }
        if let Some(v) = self.continue_as_new_after {
            params.continue_as_new_after_event_count = v;
        }
        if let Some(v) = self.sleep_distribution {
            params.sleep_activity_distribution = v;
        }
        if self.skip_sleep {
            params.skip_sleep = true;
        }
        if let Some(v) = self.control_plane_every {
            params.control_plane_every = v;
        }
        if let Some(v) = self.spawn_child_every {
            params.spawn_child_every = v;
        }
        if let Some(endpoint) = self.nexus_endpoint {
            if !config.runtime.nexus_endpoints.contains(&endpoint) {
                config.runtime.nexus_endpoints.push(endpoint.clone());
            }
            config.params.nexus_endpoint = Some(endpoint);
        }
        if let Some(v) = self.duration_secs {
            config.duration_secs = v;
        }
        if let Some(v) = self.max_concurrent {
            config.max_concurrent = v;
        }
        if self.max_workflows.is_some() {
            config.max_workflows = self.max_workflows;
        }
        if let Some(v) = self.time_scale {
            config.runtime.time_scale = v;
        }
        if self.crash_after_events.is_some() {
            config.runtime.faults.crash_after_events = self.crash_after_events;
        }
        if let Some(v) = self.log_format {
            config.logging.format = v;
        }
        if let Some(v) = self.log_level {
            config.logging.level = v;
        }
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.logging).map_err(anyhow::Error::msg)?;

    let runtime = Runtime::new(config.runtime.clone());
    let result = tokio::select! {
        result = run_stress_test_with(&runtime, &config) => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling running workflows");
            runtime.shutdown();
            bail!("interrupted");
        }
    };
    runtime.shutdown();

    println!("{}", serde_json::to_string_pretty(&serde_json::json!({
        "launched": result.launched,
        "completed": result.completed,
        "failed": result.failed,
        "failedByCategory": result.failed_by_category,
        "childrenSpawned": result.children_spawned,
        "timesContinued": result.times_continued,
        "throughput": result.throughput,
        "avgLatencyMs": result.avg_latency_ms,
    }))?);

    if result.failed > 0 {
        bail!("{} of {} workflows failed", result.failed, result.launched);
    }
    Ok(())
}
