use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of step an iteration was executing when it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Payload,
    Sleep,
    SelfQuery,
    SelfDescribe,
    SelfUpdate,
    SelfSignal,
    SpawnChild,
    RemoteOperation,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Payload => "Payload",
            ActionKind::Sleep => "Sleep",
            ActionKind::SelfQuery => "SelfQuery",
            ActionKind::SelfDescribe => "SelfDescribe",
            ActionKind::SelfUpdate => "SelfUpdate",
            ActionKind::SelfSignal => "SelfSignal",
            ActionKind::SpawnChild => "SpawnChild",
            ActionKind::RemoteOperation => "RemoteOperation",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invalid workflow parameters or load generator configuration.
///
/// Always detected before the first iteration runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid format, expected colon-separated number pair: {entry}")]
    MalformedEntry { entry: String },
    #[error("invalid sleep duration: {entry}")]
    InvalidBucket { entry: String },
    #[error("invalid weight: {entry}")]
    InvalidWeight { entry: String },
    #[error("total sleep weight overflows u64")]
    WeightOverflow,
    #[error("iterations must be positive")]
    NonPositiveIterations,
    #[error("initial iteration {initial_iteration} exceeds iterations {iterations}")]
    InitialIterationOutOfRange { initial_iteration: u64, iterations: u64 },
    #[error("{field} must be positive")]
    NonPositive { field: &'static str },
    #[error("failed to load config {path}: {message}")]
    ConfigFile { path: String, message: String },
}

/// Failure reported by the activity executor for a payload or sleep step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("activity {activity} failed: {message}")]
pub struct ActivityError {
    pub activity: String,
    pub message: String,
}

impl ActivityError {
    pub fn new(activity: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            activity: activity.into(),
            message: message.into(),
        }
    }
}

/// Failure of a self-directed control-plane call.
///
/// A rejected query is kept apart from transport problems so a run report can
/// tell "the workflow refused" from "the platform was unreachable".
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ControlPlaneError {
    #[error("query rejected: {query_type}: {reason}")]
    QueryRejected { query_type: String, reason: String },
    #[error("update {update_name} failed: {reason}")]
    UpdateFailed { update_name: String, reason: String },
    #[error("workflow not found: {workflow_id}")]
    NotFound { workflow_id: String },
    #[error("{operation}: {message}")]
    Transport { operation: String, message: String },
}

impl ControlPlaneError {
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        ControlPlaneError::Transport {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_rejection(&self) -> bool {
        matches!(self, ControlPlaneError::QueryRejected { .. })
    }
}

/// The platform could not start a child workflow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to start child {child_instance}: {message}")]
pub struct SpawnError {
    pub child_instance: String,
    pub message: String,
}

/// Failure of a remote (Nexus-style) operation call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("remote operation {operation} on {endpoint} failed: {message}")]
pub struct RemoteOperationError {
    pub endpoint: String,
    pub operation: String,
    pub message: String,
}

/// The platform refused to continue the run-segment as new.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("continue-as-new rejected for {instance}: {reason}")]
pub struct ContinuationError {
    pub instance: String,
    pub reason: String,
}

/// Error surfaced by a stress workflow run-segment.
///
/// Step failures carry the iteration index and the action that failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StressError {
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigError),
    #[error("iteration {iteration}: {action} failed: {source}")]
    Activity {
        iteration: u64,
        action: ActionKind,
        source: ActivityError,
    },
    #[error("iteration {iteration}: {action} failed: {source}")]
    ControlPlane {
        iteration: u64,
        action: ActionKind,
        source: ControlPlaneError,
    },
    #[error("iteration {iteration}: {action} failed: {source}")]
    Spawn {
        iteration: u64,
        action: ActionKind,
        source: SpawnError,
    },
    #[error("iteration {iteration}: {action} failed: {source}")]
    RemoteOperation {
        iteration: u64,
        action: ActionKind,
        source: RemoteOperationError,
    },
    #[error(transparent)]
    Continuation(#[from] ContinuationError),
    #[error("nondeterministic replay: expected {expected}, found {found}")]
    Nondeterminism { expected: String, found: String },
    #[error("run-segment cancelled at iteration {iteration}")]
    Cancelled { iteration: u64 },
}

impl StressError {
    /// Coarse classification used when tallying failed runs.
    pub fn category(&self) -> &'static str {
        match self {
            StressError::Configuration(_) | StressError::Nondeterminism { .. } => "configuration",
            StressError::Activity { .. } | StressError::ControlPlane { .. } => "application",
            StressError::Spawn { .. }
            | StressError::RemoteOperation { .. }
            | StressError::Continuation(_)
            | StressError::Cancelled { .. } => "infrastructure",
        }
    }

    /// Iteration the failure happened in, if it happened inside the loop.
    pub fn iteration(&self) -> Option<u64> {
        match self {
            StressError::Activity { iteration, .. }
            | StressError::ControlPlane { iteration, .. }
            | StressError::Spawn { iteration, .. }
            | StressError::RemoteOperation { iteration, .. }
            | StressError::Cancelled { iteration } => Some(*iteration),
            _ => None,
        }
    }

    /// Action that failed, if the failure is attributable to one.
    pub fn action(&self) -> Option<ActionKind> {
        match self {
            StressError::Activity { action, .. }
            | StressError::ControlPlane { action, .. }
            | StressError::Spawn { action, .. }
            | StressError::RemoteOperation { action, .. } => Some(*action),
            _ => None,
        }
    }
}
