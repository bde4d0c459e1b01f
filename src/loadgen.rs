//! Load generator: keeps stress workflows in flight and reports throughput.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::error::{ConfigError, StressError};
use crate::logging::LoggingConfig;
use crate::metrics::MetricsSnapshot;
use crate::params::WorkflowParams;
use crate::runtime::{ClientError, Runtime, RuntimeOptions};

/// Configuration for a load run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StressTestConfig {
    /// Maximum number of workflows in flight
    pub max_concurrent: usize,
    /// How long to keep launching workflows (seconds)
    pub duration_secs: u64,
    /// Stop launching after this many workflows, even if time remains
    #[serde(default)]
    pub max_workflows: Option<usize>,
    /// Timeout for each workflow to finish once launched (seconds)
    #[serde(default = "default_wait_timeout_secs")]
    pub wait_timeout_secs: u64,
    /// Input of every launched workflow
    #[serde(default = "default_params")]
    pub params: WorkflowParams,
    #[serde(default)]
    pub runtime: RuntimeOptions,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_wait_timeout_secs() -> u64 {
    60
}

fn default_params() -> WorkflowParams {
    WorkflowParams::new(10)
}

impl Default for StressTestConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 20,
            duration_secs: 10,
            max_workflows: None,
            wait_timeout_secs: default_wait_timeout_secs(),
            params: default_params(),
            runtime: RuntimeOptions::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl StressTestConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config_error = |message: String| ConfigError::ConfigFile {
            path: path.display().to_string(),
            message,
        };
        let text = std::fs::read_to_string(path).map_err(|e| config_error(e.to_string()))?;
        let config: Self = serde_json::from_str(&text).map_err(|e| config_error(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::NonPositive { field: "max_concurrent" });
        }
        if self.duration_secs == 0 {
            return Err(ConfigError::NonPositive { field: "duration_secs" });
        }
        if self.wait_timeout_secs == 0 {
            return Err(ConfigError::NonPositive { field: "wait_timeout_secs" });
        }
        if self.max_workflows == Some(0) {
            return Err(ConfigError::NonPositive { field: "max_workflows" });
        }
        self.params.validate()
    }
}

/// Results from a load run
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Number of workflows launched
    pub launched: usize,
    /// Number of workflows completed successfully
    pub completed: usize,
    /// Number of workflows that failed or timed out
    pub failed: usize,
    /// Failures keyed by error category; timeouts count as `infrastructure`
    pub failed_by_category: BTreeMap<String, usize>,
    /// Children spawned, summed over completed workflows
    pub children_spawned: u64,
    /// Continue-as-new count, summed over completed workflows
    pub times_continued: u64,
    pub total_time: Duration,
    /// Completed workflows per second
    pub throughput: f64,
    /// Mean start-to-finish latency of completed workflows
    pub avg_latency_ms: f64,
    pub metrics: MetricsSnapshot,
}

impl StressTestResult {
    /// Calculate success rate as a percentage
    pub fn success_rate(&self) -> f64 {
        if self.launched == 0 {
            return 0.0;
        }
        (self.completed as f64 / self.launched as f64) * 100.0
    }

    pub fn failed_in(&self, category: &str) -> usize {
        self.failed_by_category.get(category).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    failed: usize,
    failed_by_category: BTreeMap<String, usize>,
    children_spawned: u64,
    times_continued: u64,
    latency_total: Duration,
}

impl Tally {
    fn fail(&mut self, category: &str) {
        self.failed += 1;
        *self.failed_by_category.entry(category.to_string()).or_default() += 1;
    }
}

/// Run a load test on a fresh in-memory runtime built from `config.runtime`.
pub async fn run_stress_test(config: StressTestConfig) -> Result<StressTestResult, StressError> {
    let runtime = Runtime::new(config.runtime.clone());
    let result = run_stress_test_with(&runtime, &config).await;
    runtime.shutdown();
    result
}

/// Run a load test against an existing runtime.
pub async fn run_stress_test_with(runtime: &Runtime, config: &StressTestConfig) -> Result<StressTestResult, StressError> {
    config.validate()?;
    info!(
        max_concurrent = config.max_concurrent,
        duration_secs = config.duration_secs,
        iterations = config.params.iterations,
        continue_as_new_after = config.params.continue_as_new_after_event_count,
        "starting load run"
    );

    let client = runtime.client();
    let tally = Arc::new(Mutex::new(Tally::default()));
    let active = Arc::new(AtomicUsize::new(0));
    let mut tasks = JoinSet::new();
    let wait_timeout = Duration::from_secs(config.wait_timeout_secs);

    let start_time = Instant::now();
    let end_time = start_time + Duration::from_secs(config.duration_secs);
    let mut launched = 0_usize;

    loop {
        if Instant::now() >= end_time {
            info!("duration elapsed, stopping pump");
            break;
        }
        if config.max_workflows.is_some_and(|max| launched >= max) {
            info!(launched, "workflow limit reached, stopping pump");
            break;
        }
        if active.load(Ordering::SeqCst) >= config.max_concurrent {
            tokio::time::sleep(Duration::from_millis(10)).await;
            continue;
        }

        launched += 1;
        let instance = format!("throughput-stress-{launched}");
        active.fetch_add(1, Ordering::SeqCst);

        let client = client.clone();
        let params = config.params.clone();
        let tally = tally.clone();
        let active = active.clone();
        tasks.spawn(async move {
            let started = Instant::now();
            let outcome = match client.start_workflow(&instance, params).await {
                Ok(()) => client.wait_for_workflow(&instance, wait_timeout).await,
                Err(e) => Err(e),
            };

            let mut tally = tally.lock().await;
            match outcome {
                Ok(output) => {
                    tally.completed += 1;
                    tally.children_spawned += output.children_spawned;
                    tally.times_continued += output.times_continued;
                    tally.latency_total += started.elapsed();
                }
                Err(ClientError::Workflow(error)) => {
                    warn!(instance_id = %instance, category = error.category(), error = %error, "workflow failed");
                    tally.fail(error.category());
                }
                Err(error) => {
                    warn!(instance_id = %instance, error = %error, "workflow did not finish");
                    tally.fail("infrastructure");
                }
            }
            active.fetch_sub(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    info!(active = active.load(Ordering::SeqCst), "waiting for active workflows to finish");
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "load task panicked");
            tally.lock().await.fail("infrastructure");
        }
    }

    let total_time = start_time.elapsed();
    let tally = tally.lock().await;
    let result = StressTestResult {
        launched,
        completed: tally.completed,
        failed: tally.failed,
        failed_by_category: tally.failed_by_category.clone(),
        children_spawned: tally.children_spawned,
        times_continued: tally.times_continued,
        total_time,
        throughput: tally.completed as f64 / total_time.as_secs_f64().max(f64::EPSILON),
        avg_latency_ms: tally.latency_total.as_millis() as f64 / tally.completed.max(1) as f64,
        metrics: runtime.metrics(),
    };
    print_summary(&result);
    Ok(result)
}

/// Log a results table for one run.
pub fn print_summary(result: &StressTestResult) {
    info!("=== Results ===");
    info!("Total time: {:?}", result.total_time);
    info!("Launched: {}", result.launched);
    info!("Completed: {}", result.completed);
    info!(
        "Failed: {} (infra: {}, config: {}, app: {})",
        result.failed,
        result.failed_in("infrastructure"),
        result.failed_in("configuration"),
        result.failed_in("application")
    );
    info!("Success rate: {:.2}%", result.success_rate());
    info!("Throughput: {:.2} workflows/sec", result.throughput);
    info!("Average latency: {:.2}ms", result.avg_latency_ms);
    info!(
        "Children spawned: {}, continued as new: {}, replays: {}",
        result.children_spawned, result.times_continued, result.metrics.replays
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_handles_empty_runs() {
        let result = StressTestResult {
            launched: 0,
            completed: 0,
            failed: 0,
            failed_by_category: BTreeMap::new(),
            children_spawned: 0,
            times_continued: 0,
            total_time: Duration::ZERO,
            throughput: 0.0,
            avg_latency_ms: 0.0,
            metrics: MetricsSnapshot::default(),
        };
        assert_eq!(result.success_rate(), 0.0);
        assert_eq!(result.failed_in("application"), 0);
    }

    #[test]
    fn validate_rejects_zero_limits() {
        let config = StressTestConfig {
            max_concurrent: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::NonPositive { field: "max_concurrent" })
        );
        let config = StressTestConfig {
            params: WorkflowParams::new(0),
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NonPositiveIterations));
    }
}
