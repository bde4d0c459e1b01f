//! In-memory durable execution platform for running the stress workflow.
//!
//! Every step a segment takes is appended to the instance's history before the
//! segment moves on. A segment that is interrupted (a simulated worker crash)
//! is re-run against that history: recorded steps return their recorded
//! results, and the segment picks up live execution where the history ends.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activities::LocalActivities;
use crate::collaborators::{
    ActivityExecutor, Collaborators, ContinuationPrimitive, ExecutionDescription, ExecutionStatus,
};
use crate::error::{ContinuationError, StressError};
use crate::metrics::{MetricsProvider, MetricsSnapshot};
use crate::params::{ChildWorkflowParams, WorkflowParams, WorkflowProgress};
use crate::random::execution_seed;
use crate::workflow::{run_child_workflow, run_segment, SegmentOutcome};

mod client;
mod context;
mod history;

pub use client::{Client, ClientError};
pub use context::SegmentContext;
pub use history::{HistoryEvent, InMemoryHistoryStore};

/// Failures injected into segments, for exercising replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FaultOptions {
    /// Interrupt the first attempt of every execution once its history holds
    /// this many events. The segment is then replayed from history.
    pub crash_after_events: Option<u64>,
}

/// Configuration options for the Runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeOptions {
    /// Activities allowed to run at once across all instances.
    pub worker_concurrency: usize,
    /// Divides every sleep activity duration.
    pub time_scale: u32,
    /// Fail a workflow that tries to continue as new more often than this.
    pub max_continuations: Option<u64>,
    /// Remote endpoints that exist. Calls to any other endpoint fail.
    pub nexus_endpoints: Vec<String>,
    pub faults: FaultOptions,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            worker_concurrency: 64,
            time_scale: 1,
            max_continuations: None,
            nexus_endpoints: Vec::new(),
            faults: FaultOptions::default(),
        }
    }
}

/// Run id of an execution. Stable for a given instance and execution number.
pub fn run_id(instance: &str, execution_id: u64) -> String {
    format!("{:016x}", execution_seed(instance, execution_id))
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What an instance runs.
#[derive(Debug, Clone)]
pub(crate) enum WorkflowInput {
    Stress(WorkflowParams),
    Child(ChildWorkflowParams),
}

impl WorkflowInput {
    fn encode(&self) -> String {
        let encoded = match self {
            WorkflowInput::Stress(params) => serde_json::to_string(params),
            WorkflowInput::Child(params) => serde_json::to_string(params),
        };
        encoded.unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct LiveState {
    pub(crate) execution_id: u64,
    pub(crate) run_id: String,
    pub(crate) status: ExecutionStatus,
    pub(crate) progress: WorkflowProgress,
    pub(crate) started_at: DateTime<Utc>,
}

/// Runtime-side view of one instance.
pub(crate) struct LiveInstance {
    pub(crate) instance: String,
    state: Mutex<LiveState>,
    /// Length of the current execution's stored history.
    event_count: AtomicU64,
    /// Events recorded outside an await point, written with the next append.
    pending: Mutex<Vec<HistoryEvent>>,
    crashed: AtomicBool,
    nondeterminism: Mutex<Option<StressError>>,
    outcome: watch::Sender<Option<Result<String, StressError>>>,
}

impl LiveInstance {
    fn new(instance: &str) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            instance: instance.to_string(),
            state: Mutex::new(LiveState {
                execution_id: 1,
                run_id: run_id(instance, 1),
                status: ExecutionStatus::Running,
                progress: WorkflowProgress::default(),
                started_at: Utc::now(),
            }),
            event_count: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
            crashed: AtomicBool::new(false),
            nondeterminism: Mutex::new(None),
            outcome,
        }
    }

    pub(crate) fn state(&self) -> LiveState {
        lock(&self.state).clone()
    }

    pub(crate) fn set_progress(&self, progress: WorkflowProgress) {
        lock(&self.state).progress = progress;
    }

    fn set_status(&self, status: ExecutionStatus) {
        lock(&self.state).status = status;
    }

    fn begin_execution(&self, execution_id: u64) {
        let mut state = lock(&self.state);
        state.execution_id = execution_id;
        state.run_id = run_id(&self.instance, execution_id);
        state.status = ExecutionStatus::Running;
        state.started_at = Utc::now();
        self.event_count.store(1, Ordering::SeqCst);
    }

    /// Stored events plus those waiting to be written.
    pub(crate) fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::SeqCst) + lock(&self.pending).len() as u64
    }

    pub(crate) fn push_pending(&self, event: HistoryEvent) {
        lock(&self.pending).push(event);
    }

    pub(crate) fn mark_crashed(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }

    /// Keep the first nondeterminism found in an attempt.
    pub(crate) fn report_nondeterminism(&self, error: StressError) {
        lock(&self.nondeterminism).get_or_insert(error);
    }

    fn begin_attempt(&self) {
        self.crashed.store(false, Ordering::SeqCst);
        *lock(&self.nondeterminism) = None;
        lock(&self.pending).clear();
    }

    pub(crate) fn describe(&self) -> ExecutionDescription {
        let state = self.state();
        ExecutionDescription {
            workflow_id: self.instance.clone(),
            run_id: state.run_id,
            execution_id: state.execution_id,
            status: state.status,
            history_length: self.event_count(),
            started_at: state.started_at,
        }
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) store: InMemoryHistoryStore,
    pub(crate) options: RuntimeOptions,
    pub(crate) activities: Arc<dyn ActivityExecutor>,
    pub(crate) workers: Semaphore,
    pub(crate) metrics: MetricsProvider,
    pub(crate) shutdown: CancellationToken,
    instances: Mutex<HashMap<String, Arc<LiveInstance>>>,
}

impl RuntimeInner {
    pub(crate) fn live(&self, instance: &str) -> Option<Arc<LiveInstance>> {
        lock(&self.instances).get(instance).cloned()
    }

    /// Append to the instance's current execution, writing pending events first.
    pub(crate) async fn record(&self, live: &LiveInstance, events: Vec<HistoryEvent>) -> Result<u64, String> {
        let execution_id = live.state().execution_id;
        let mut batch: Vec<HistoryEvent> = lock(&live.pending).drain(..).collect();
        batch.extend(events);
        let len = self.store.append(&live.instance, execution_id, batch).await?;
        live.event_count.store(len, Ordering::SeqCst);
        Ok(len)
    }

    /// Register and launch an instance.
    pub(crate) async fn start_instance(self: &Arc<Self>, instance: &str, input: WorkflowInput) -> Result<(), ClientError> {
        if let WorkflowInput::Stress(params) = &input {
            params.validate().map_err(StressError::from)?;
        }
        let started = HistoryEvent::ExecutionStarted { input: input.encode() };
        self.store
            .create_instance(instance, started)
            .await
            .map_err(|_| ClientError::AlreadyExists(instance.to_string()))?;

        let live = Arc::new(LiveInstance::new(instance));
        lock(&self.instances).insert(instance.to_string(), live.clone());
        self.metrics.record_workflow_start();
        debug!(instance_id = %instance, "instance started");

        tokio::spawn(drive(self.clone(), live, input));
        Ok(())
    }

    /// Wait for an instance to finish and return its encoded output.
    pub(crate) async fn wait_instance(&self, instance: &str) -> Result<String, ClientError> {
        let live = self
            .live(instance)
            .ok_or_else(|| ClientError::NotFound(instance.to_string()))?;
        let mut rx = live.outcome.subscribe();
        rx.wait_for(Option::is_some)
            .await
            .map_err(|_| ClientError::NotFound(instance.to_string()))?;
        let outcome = rx.borrow().clone();
        match outcome {
            Some(Ok(output)) => Ok(output),
            Some(Err(error)) => Err(ClientError::Workflow(error)),
            None => Err(ClientError::NotFound(instance.to_string())),
        }
    }
}

/// Drives one execution chain of an instance.
struct ExecutionChain {
    inner: Arc<RuntimeInner>,
    live: Arc<LiveInstance>,
}

impl ExecutionChain {
    async fn segment(&self, attempt: u32) -> Collaborators {
        self.live.begin_attempt();
        let execution_id = self.live.state().execution_id;
        let history = self.inner.store.read_with_execution(&self.live.instance, execution_id).await;
        self.live.event_count.store(history.len() as u64, Ordering::SeqCst);
        SegmentContext::new(self.inner.clone(), self.live.clone(), execution_id, history, attempt).collaborators()
    }

    /// Run one execution, replaying it after every simulated crash.
    async fn run_with_recovery<T, F, Fut>(&self, first: Collaborators, body: F) -> Result<T, StressError>
    where
        F: Fn(Collaborators) -> Fut,
        Fut: Future<Output = Result<T, StressError>>,
    {
        let mut env = first;
        let mut attempt = 0;
        loop {
            let result = body(env).await;
            if let Some(error) = lock(&self.live.nondeterminism).take() {
                return Err(error);
            }
            let crashed = self.live.crashed.load(Ordering::SeqCst);
            if crashed && matches!(result, Err(StressError::Cancelled { .. })) && !self.inner.shutdown.is_cancelled() {
                attempt += 1;
                self.inner.metrics.record_replay();
                info!(
                    instance_id = %self.live.instance,
                    execution_id = self.live.state().execution_id,
                    attempt,
                    "worker crashed, replaying segment"
                );
                env = self.segment(attempt).await;
                continue;
            }
            return result;
        }
    }
}

#[async_trait]
impl ContinuationPrimitive for ExecutionChain {
    async fn continue_as_new(&self, params: &WorkflowParams) -> Result<Collaborators, ContinuationError> {
        let instance = self.live.instance.clone();
        let refuse = |reason: String| ContinuationError {
            instance: instance.clone(),
            reason,
        };
        if let Some(max) = self.inner.options.max_continuations {
            if params.times_continued > max {
                return Err(refuse(format!("continuation limit of {max} reached")));
            }
        }
        let input = serde_json::to_string(params).map_err(|e| refuse(e.to_string()))?;
        self.inner
            .record(&self.live, vec![HistoryEvent::ContinuedAsNew { input: input.clone() }])
            .await
            .map_err(&refuse)?;
        let execution_id = self
            .inner
            .store
            .create_execution(&instance, HistoryEvent::ExecutionStarted { input })
            .await
            .map_err(&refuse)?;
        self.live.begin_execution(execution_id);
        self.inner.metrics.record_continue_as_new();
        debug!(instance_id = %instance, execution_id, "continued as new");
        Ok(self.segment(0).await)
    }
}

async fn drive(inner: Arc<RuntimeInner>, live: Arc<LiveInstance>, input: WorkflowInput) {
    let chain = ExecutionChain {
        inner: inner.clone(),
        live: live.clone(),
    };
    let result = match input {
        WorkflowInput::Stress(params) => drive_stress(&chain, params).await,
        WorkflowInput::Child(params) => drive_child(&chain, params).await,
    };

    let terminal = match &result {
        Ok(output) => HistoryEvent::ExecutionCompleted { output: output.clone() },
        Err(error) => HistoryEvent::ExecutionFailed { error: error.to_string() },
    };
    if let Err(e) = inner.record(&live, vec![terminal]).await {
        warn!(instance_id = %live.instance, error = %e, "failed to record terminal event");
    }
    match &result {
        Ok(_) => {
            live.set_status(ExecutionStatus::Completed);
            inner.metrics.record_workflow_completion();
            debug!(instance_id = %live.instance, "instance completed");
        }
        Err(error) => {
            live.set_status(ExecutionStatus::Failed);
            inner.metrics.record_workflow_failure(error.category());
            warn!(
                instance_id = %live.instance,
                category = error.category(),
                error = %error,
                "instance failed"
            );
        }
    }
    live.outcome.send_replace(Some(result));
}

async fn drive_stress(chain: &ExecutionChain, params: WorkflowParams) -> Result<String, StressError> {
    let mut env = chain.segment(0).await;
    let mut params = params;
    loop {
        let segment_params = params.clone();
        let outcome = chain
            .run_with_recovery(env, |env| {
                let params = segment_params.clone();
                async move { run_segment(&env, params).await }
            })
            .await?;
        match outcome {
            SegmentOutcome::Completed(output) => return Ok(serde_json::to_string(&output).unwrap_or_default()),
            SegmentOutcome::ContinueAsNew(next) => {
                env = chain.continue_as_new(&next).await?;
                params = next;
            }
        }
    }
}

async fn drive_child(chain: &ExecutionChain, params: ChildWorkflowParams) -> Result<String, StressError> {
    let env = chain.segment(0).await;
    chain
        .run_with_recovery(env, |env| {
            let params = params.clone();
            async move { run_child_workflow(&env, params).await }
        })
        .await
}

/// Handle to a running in-memory platform.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Runtime executing activities in process with [`LocalActivities`].
    pub fn new(options: RuntimeOptions) -> Self {
        let activities = Arc::new(LocalActivities::with_time_scale(options.time_scale));
        Self::with_activities(options, activities)
    }

    pub fn with_activities(options: RuntimeOptions, activities: Arc<dyn ActivityExecutor>) -> Self {
        let workers = Semaphore::new(options.worker_concurrency.max(1));
        Self {
            inner: Arc::new(RuntimeInner {
                store: InMemoryHistoryStore::new(),
                options,
                activities,
                workers,
                metrics: MetricsProvider::new(),
                shutdown: CancellationToken::new(),
                instances: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn client(&self) -> Client {
        Client::new(self.inner.clone())
    }

    pub fn store(&self) -> &InMemoryHistoryStore {
        &self.inner.store
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.inner.options
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Cancel every running segment. Instances fail with `Cancelled`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_stable_per_execution() {
        assert_eq!(run_id("a", 1), run_id("a", 1));
        assert_ne!(run_id("a", 1), run_id("a", 2));
        assert_eq!(run_id("a", 1).len(), 16);
    }

    #[test]
    fn options_fill_defaults_from_json() {
        let options: RuntimeOptions = serde_json::from_str(r#"{"time_scale": 100}"#).unwrap();
        assert_eq!(options.time_scale, 100);
        assert_eq!(options.worker_concurrency, 64);
        assert_eq!(options.faults.crash_after_events, None);
    }

    #[test]
    fn pending_events_count_toward_history_length() {
        let live = LiveInstance::new("i");
        assert_eq!(live.event_count(), 1);
        live.push_pending(HistoryEvent::RandomRecorded { bound: 4, value: 2 });
        assert_eq!(live.event_count(), 2);
        live.begin_attempt();
        assert_eq!(live.event_count(), 1);
    }
}
