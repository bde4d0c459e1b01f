//! Seams between the stress workflow and the platform it runs on.
//!
//! Every suspension point of the iteration loop is a call through one of these
//! traits. The loop never talks to the platform any other way, which keeps each
//! of its decisions a function of inputs the platform has already recorded.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::activities::{PayloadActivityInput, SleepActivityInput};
use crate::error::{
    ActivityError, ContinuationError, ControlPlaneError, RemoteOperationError, SpawnError,
};
use crate::params::{ChildWorkflowParams, WorkflowParams, WorkflowProgress};

/// Runs payload and sleep activities out of process.
///
/// Retry policy, if any, lives behind this trait.
#[async_trait]
pub trait ActivityExecutor: Send + Sync {
    /// Returns exactly `input.desired_output_size` bytes.
    async fn payload(&self, input: PayloadActivityInput) -> Result<Vec<u8>, ActivityError>;

    async fn sleep(&self, input: SleepActivityInput) -> Result<(), ActivityError>;
}

/// Query, update, signal and describe calls against a workflow instance.
#[async_trait]
pub trait ControlPlaneClient: Send + Sync {
    async fn query(&self, workflow_id: &str, query_type: &str) -> Result<String, ControlPlaneError>;

    /// Resolves once the update has completed.
    async fn update(&self, workflow_id: &str, run_id: &str, update_name: &str) -> Result<(), ControlPlaneError>;

    async fn signal(&self, workflow_id: &str, run_id: &str, signal_name: &str) -> Result<(), ControlPlaneError>;

    async fn describe(&self, workflow_id: &str) -> Result<ExecutionDescription, ControlPlaneError>;
}

/// Starts nested workflow instances.
#[async_trait]
pub trait ChildSpawner: Send + Sync {
    async fn spawn(&self, params: ChildWorkflowParams) -> Result<ChildHandle, SpawnError>;
}

/// Number of events recorded so far in the current run-segment.
pub trait HistorySizeMonitor: Send + Sync {
    fn current_event_count(&self) -> u64;
}

/// Remote (Nexus-style) operation endpoint.
#[async_trait]
pub trait RemoteOperationInvoker: Send + Sync {
    async fn invoke(&self, endpoint: &str, operation: &str, input: &str) -> Result<String, RemoteOperationError>;
}

/// Replay-safe randomness. The platform records each draw so a replayed
/// segment sees the same values.
pub trait DurableRandom: Send + Sync {
    /// Uniform value in `[0, bound)`. Callers never pass `bound == 0`.
    fn next_below(&self, bound: u64) -> u64;
}

/// Identity of the running execution.
pub trait ExecutionInfo: Send + Sync {
    fn workflow_id(&self) -> String;

    fn run_id(&self) -> String;

    /// True while the segment is re-running steps that are already recorded.
    fn is_replaying(&self) -> bool {
        false
    }

    /// Publish the segment's progress so progress queries can answer it.
    fn record_progress(&self, _progress: &WorkflowProgress) {}
}

/// Ends the current run-segment and produces the collaborators of the next one.
#[async_trait]
pub trait ContinuationPrimitive: Send + Sync {
    async fn continue_as_new(&self, params: &WorkflowParams) -> Result<Collaborators, ContinuationError>;
}

/// Everything one run-segment talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub activities: Arc<dyn ActivityExecutor>,
    pub control_plane: Arc<dyn ControlPlaneClient>,
    pub children: Arc<dyn ChildSpawner>,
    pub history: Arc<dyn HistorySizeMonitor>,
    pub remote: Arc<dyn RemoteOperationInvoker>,
    pub random: Arc<dyn DurableRandom>,
    pub info: Arc<dyn ExecutionInfo>,
    pub cancellation: CancellationToken,
}

impl Collaborators {
    /// Use one platform context for every seam.
    pub fn from_context<C>(ctx: Arc<C>, cancellation: CancellationToken) -> Self
    where
        C: ActivityExecutor
            + ControlPlaneClient
            + ChildSpawner
            + HistorySizeMonitor
            + RemoteOperationInvoker
            + DurableRandom
            + ExecutionInfo
            + 'static,
    {
        Self {
            activities: ctx.clone(),
            control_plane: ctx.clone(),
            children: ctx.clone(),
            history: ctx.clone(),
            remote: ctx.clone(),
            random: ctx.clone(),
            info: ctx,
            cancellation,
        }
    }

    /// Used by the logging macros to stay quiet while replaying.
    pub fn is_logging_enabled(&self) -> bool {
        !self.info.is_replaying()
    }
}

/// Handle to a started child workflow.
pub struct ChildHandle {
    instance_id: String,
    completion: BoxFuture<'static, Result<String, String>>,
}

impl ChildHandle {
    pub fn new(instance_id: impl Into<String>, completion: BoxFuture<'static, Result<String, String>>) -> Self {
        Self {
            instance_id: instance_id.into(),
            completion,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Wait for the child to finish.
    pub async fn join(self) -> Result<String, String> {
        self.completion.await
    }
}

impl fmt::Debug for ChildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChildHandle")
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

/// Lifecycle state reported by describe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    ContinuedAsNew,
}

/// Result of a describe call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescription {
    pub workflow_id: String,
    pub run_id: String,
    pub execution_id: u64,
    pub status: ExecutionStatus,
    pub history_length: u64,
    pub started_at: DateTime<Utc>,
}
