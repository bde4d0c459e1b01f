use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::{HistoryEvent, RuntimeInner, WorkflowInput};
use crate::collaborators::{ControlPlaneClient, ExecutionDescription, ExecutionStatus};
use crate::error::{ControlPlaneError, StressError};
use crate::params::{WorkflowOutput, WorkflowParams};
use crate::plan::{STRESS_QUERY, STRESS_SIGNAL, STRESS_UPDATE};

/// Error returned by [`Client`] start and wait helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("instance already exists: {0}")]
    AlreadyExists(String),
    #[error("instance not found: {0}")]
    NotFound(String),
    #[error("timed out waiting for {0}")]
    Timeout(String),
    #[error(transparent)]
    Workflow(#[from] StressError),
    #[error("unreadable workflow output: {0}")]
    Output(String),
}

/// Control-plane client bound to a [`Runtime`](super::Runtime).
///
/// Answers `myquery` with the instance's progress, accepts `myupdate` and
/// `mysignal`, and rejects everything else.
#[derive(Clone)]
pub struct Client {
    inner: Arc<RuntimeInner>,
}

impl Client {
    pub(crate) fn new(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    /// Start a stress workflow instance.
    pub async fn start_workflow(&self, instance: &str, params: WorkflowParams) -> Result<(), ClientError> {
        self.inner.start_instance(instance, WorkflowInput::Stress(params)).await
    }

    /// Wait for a stress workflow to finish, up to `timeout`.
    pub async fn wait_for_workflow(&self, instance: &str, timeout: Duration) -> Result<WorkflowOutput, ClientError> {
        let output = tokio::time::timeout(timeout, self.inner.wait_instance(instance))
            .await
            .map_err(|_| ClientError::Timeout(instance.to_string()))??;
        serde_json::from_str(&output).map_err(|e| ClientError::Output(format!("{e}: {output}")))
    }

    /// History of the latest execution of `instance`.
    pub async fn read_history(&self, instance: &str) -> Vec<HistoryEvent> {
        self.inner.store.read(instance).await
    }

    pub async fn read_execution_history(&self, instance: &str, execution_id: u64) -> Vec<HistoryEvent> {
        self.inner.store.read_with_execution(instance, execution_id).await
    }

    pub async fn list_executions(&self, instance: &str) -> Vec<u64> {
        self.inner.store.list_executions(instance).await
    }

    /// Append inbound events to a running instance, checking the run id if one is given.
    async fn deliver(&self, workflow_id: &str, run_id: &str, events: Vec<HistoryEvent>) -> Result<(), ControlPlaneError> {
        let live = self.inner.live(workflow_id).ok_or_else(|| ControlPlaneError::NotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        let state = live.state();
        if !run_id.is_empty() && run_id != state.run_id {
            return Err(ControlPlaneError::NotFound {
                workflow_id: format!("{workflow_id} (run {run_id})"),
            });
        }
        if state.status != ExecutionStatus::Running {
            return Err(ControlPlaneError::transport("deliver", format!("workflow {workflow_id} is not running")));
        }
        self.inner
            .record(&live, events)
            .await
            .map_err(|e| ControlPlaneError::transport("deliver", e))?;
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneClient for Client {
    async fn query(&self, workflow_id: &str, query_type: &str) -> Result<String, ControlPlaneError> {
        self.inner.metrics.record_control_plane_call();
        if query_type != STRESS_QUERY {
            return Err(ControlPlaneError::QueryRejected {
                query_type: query_type.to_string(),
                reason: "unknown query type".to_string(),
            });
        }
        let live = self.inner.live(workflow_id).ok_or_else(|| ControlPlaneError::NotFound {
            workflow_id: workflow_id.to_string(),
        })?;
        serde_json::to_string(&live.state().progress).map_err(|e| ControlPlaneError::transport("query", e.to_string()))
    }

    async fn update(&self, workflow_id: &str, run_id: &str, update_name: &str) -> Result<(), ControlPlaneError> {
        self.inner.metrics.record_control_plane_call();
        if update_name != STRESS_UPDATE {
            return Err(ControlPlaneError::UpdateFailed {
                update_name: update_name.to_string(),
                reason: "unknown update".to_string(),
            });
        }
        let name = update_name.to_string();
        self.deliver(
            workflow_id,
            run_id,
            vec![
                HistoryEvent::UpdateAccepted { name: name.clone() },
                HistoryEvent::UpdateCompleted { name },
            ],
        )
        .await
        .map_err(|e| match e {
            ControlPlaneError::Transport { message, .. } => ControlPlaneError::UpdateFailed {
                update_name: update_name.to_string(),
                reason: message,
            },
            other => other,
        })
    }

    async fn signal(&self, workflow_id: &str, run_id: &str, signal_name: &str) -> Result<(), ControlPlaneError> {
        self.inner.metrics.record_control_plane_call();
        if signal_name != STRESS_SIGNAL {
            return Err(ControlPlaneError::transport("signal", format!("unknown signal {signal_name}")));
        }
        self.deliver(
            workflow_id,
            run_id,
            vec![HistoryEvent::SignalReceived {
                name: signal_name.to_string(),
            }],
        )
        .await
    }

    async fn describe(&self, workflow_id: &str) -> Result<ExecutionDescription, ControlPlaneError> {
        self.inner.metrics.record_control_plane_call();
        self.inner
            .live(workflow_id)
            .map(|live| live.describe())
            .ok_or_else(|| ControlPlaneError::NotFound {
                workflow_id: workflow_id.to_string(),
            })
    }
}
