//! Throughput stress workflow for durable execution platforms.
//!
//! The [`workflow`] module holds the iteration loop: each run-segment executes
//! iterations of a fixed action plan, counts the history it produces, and
//! continues as new before that history grows past a threshold. Everything the
//! loop talks to sits behind the traits in [`collaborators`], so it runs
//! unchanged against the in-memory [`runtime`] or against scripted doubles.
//!
//! ```no_run
//! use std::time::Duration;
//! use throughput_stress::{Runtime, RuntimeOptions, WorkflowParams};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let runtime = Runtime::new(RuntimeOptions::default());
//! let client = runtime.client();
//! let params = WorkflowParams {
//!     continue_as_new_after_event_count: 200,
//!     sleep_activity_distribution: "1:5,3:1".parse()?,
//!     ..WorkflowParams::new(50)
//! };
//! client.start_workflow("stress-1", params).await?;
//! let output = client.wait_for_workflow("stress-1", Duration::from_secs(600)).await?;
//! println!("continued {} times", output.times_continued);
//! # Ok(())
//! # }
//! ```

pub mod activities;
pub mod collaborators;
pub mod distribution;
pub mod error;
pub mod loadgen;
pub mod logging;
pub mod metrics;
pub mod params;
pub mod plan;
pub mod random;
pub mod runtime;
pub mod workflow;

pub use activities::{LocalActivities, PayloadActivityInput, SleepActivityInput};
pub use collaborators::{
    ActivityExecutor, ChildHandle, ChildSpawner, Collaborators, ContinuationPrimitive, ControlPlaneClient,
    DurableRandom, ExecutionDescription, ExecutionInfo, ExecutionStatus, HistorySizeMonitor,
    RemoteOperationInvoker,
};
pub use distribution::SleepDistribution;
pub use error::{
    ActionKind, ActivityError, ConfigError, ContinuationError, ControlPlaneError, RemoteOperationError, SpawnError,
    StressError,
};
pub use loadgen::{print_summary, run_stress_test, run_stress_test_with, StressTestConfig, StressTestResult};
pub use metrics::{MetricsProvider, MetricsSnapshot};
pub use params::{ChildWorkflowParams, WorkflowOutput, WorkflowParams, WorkflowProgress};
pub use plan::{IterationPlan, StressAction};
pub use random::SeededRandom;
pub use runtime::{Client, ClientError, FaultOptions, HistoryEvent, Runtime, RuntimeOptions};
pub use workflow::{next_transition, run_child_workflow, run_segment, run_to_completion, SegmentOutcome, Transition};
