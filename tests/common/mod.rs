#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

pub mod tracing_capture;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use throughput_stress::*;
use tokio_util::sync::CancellationToken;

/// Behaviour of the scripted platform, shared by every segment of a chain.
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// History events added by each payload call (one per iteration).
    pub events_per_iteration: u64,
    /// Fail the n-th payload call of the chain (0-based).
    pub fail_payload_at: Option<u64>,
    /// Fail the n-th sleep call of the chain (0-based).
    pub fail_sleep_at: Option<u64>,
    pub reject_queries: bool,
    /// Fail describe, update or signal, whichever this names.
    pub failing_control_plane: Option<ActionKind>,
    /// Refuse to start any child.
    pub failing_spawn: bool,
    pub failing_children: bool,
    pub refuse_continuation: bool,
    pub replaying: bool,
    pub seed: u64,
}

impl Script {
    pub fn with_events_per_iteration(events_per_iteration: u64) -> Self {
        Self {
            events_per_iteration,
            ..Default::default()
        }
    }
}

/// Everything the scripted platform was asked to do, across segments.
#[derive(Default)]
pub struct CallLog {
    calls: Mutex<Vec<String>>,
    payload_inputs: Mutex<Vec<Vec<u8>>>,
    continuations: Mutex<Vec<WorkflowParams>>,
    progress: Mutex<Vec<WorkflowProgress>>,
    payloads: AtomicU64,
    sleeps: AtomicU64,
    spawned: AtomicU64,
}

impl CallLog {
    fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn payload_inputs(&self) -> Vec<Vec<u8>> {
        self.payload_inputs.lock().unwrap().clone()
    }

    pub fn continuations(&self) -> Vec<WorkflowParams> {
        self.continuations.lock().unwrap().clone()
    }

    pub fn progress(&self) -> Vec<WorkflowProgress> {
        self.progress.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> u64 {
        self.spawned.load(Ordering::SeqCst)
    }
}

/// One run-segment of the scripted platform. The history count starts at
/// zero in every segment.
pub struct ScriptedSegment {
    script: Script,
    log: Arc<CallLog>,
    events: AtomicU64,
    random: SeededRandom,
}

#[async_trait]
impl ActivityExecutor for ScriptedSegment {
    async fn payload(&self, input: PayloadActivityInput) -> Result<Vec<u8>, ActivityError> {
        self.log.push("payload");
        let n = self.log.payloads.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_payload_at == Some(n) {
            return Err(ActivityError::new("Payload", "scripted failure"));
        }
        self.log.payload_inputs.lock().unwrap().push(input.ignored_input_data);
        self.events.fetch_add(self.script.events_per_iteration, Ordering::SeqCst);
        Ok(vec![0u8; input.desired_output_size])
    }

    async fn sleep(&self, input: SleepActivityInput) -> Result<(), ActivityError> {
        self.log.push(format!("sleep:{}", input.sleep_duration.as_secs()));
        let n = self.log.sleeps.fetch_add(1, Ordering::SeqCst);
        if self.script.fail_sleep_at == Some(n) {
            return Err(ActivityError::new("Sleep", "scripted failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneClient for ScriptedSegment {
    async fn query(&self, _workflow_id: &str, query_type: &str) -> Result<String, ControlPlaneError> {
        self.log.push(format!("query:{query_type}"));
        if self.script.reject_queries {
            return Err(ControlPlaneError::QueryRejected {
                query_type: query_type.to_string(),
                reason: "query rejected".to_string(),
            });
        }
        Ok("{}".to_string())
    }

    async fn update(&self, _workflow_id: &str, _run_id: &str, update_name: &str) -> Result<(), ControlPlaneError> {
        self.log.push(format!("update:{update_name}"));
        if self.script.failing_control_plane == Some(ActionKind::SelfUpdate) {
            return Err(ControlPlaneError::UpdateFailed {
                update_name: update_name.to_string(),
                reason: "validator rejected".to_string(),
            });
        }
        Ok(())
    }

    async fn signal(&self, _workflow_id: &str, _run_id: &str, signal_name: &str) -> Result<(), ControlPlaneError> {
        self.log.push(format!("signal:{signal_name}"));
        if self.script.failing_control_plane == Some(ActionKind::SelfSignal) {
            return Err(ControlPlaneError::transport("signal", "connection reset"));
        }
        Ok(())
    }

    async fn describe(&self, workflow_id: &str) -> Result<ExecutionDescription, ControlPlaneError> {
        self.log.push("describe");
        if self.script.failing_control_plane == Some(ActionKind::SelfDescribe) {
            return Err(ControlPlaneError::NotFound {
                workflow_id: workflow_id.to_string(),
            });
        }
        Ok(ExecutionDescription {
            workflow_id: workflow_id.to_string(),
            run_id: self.run_id(),
            execution_id: 1,
            status: ExecutionStatus::Running,
            history_length: self.events.load(Ordering::SeqCst),
            started_at: Utc::now(),
        })
    }
}

#[async_trait]
impl ChildSpawner for ScriptedSegment {
    async fn spawn(&self, _params: ChildWorkflowParams) -> Result<ChildHandle, SpawnError> {
        self.log.push("spawn");
        if self.script.failing_spawn {
            return Err(SpawnError {
                child_instance: "child-refused".to_string(),
                message: "scripted failure".to_string(),
            });
        }
        let n = self.log.spawned.fetch_add(1, Ordering::SeqCst);
        let failing = self.script.failing_children;
        let completion = async move {
            if failing {
                Err("child exploded".to_string())
            } else {
                Ok("done".to_string())
            }
        }
        .boxed();
        Ok(ChildHandle::new(format!("child-{n}"), completion))
    }
}

#[async_trait]
impl RemoteOperationInvoker for ScriptedSegment {
    async fn invoke(&self, endpoint: &str, operation: &str, input: &str) -> Result<String, RemoteOperationError> {
        self.log.push(format!("remote:{endpoint}/{operation}"));
        Ok(input.to_string())
    }
}

impl HistorySizeMonitor for ScriptedSegment {
    fn current_event_count(&self) -> u64 {
        self.events.load(Ordering::SeqCst)
    }
}

impl DurableRandom for ScriptedSegment {
    fn next_below(&self, bound: u64) -> u64 {
        self.random.next_below(bound)
    }
}

impl ExecutionInfo for ScriptedSegment {
    fn workflow_id(&self) -> String {
        "scripted-wf".to_string()
    }

    fn run_id(&self) -> String {
        format!("run-{}", self.log.continuations.lock().unwrap().len() + 1)
    }

    fn is_replaying(&self) -> bool {
        self.script.replaying
    }

    fn record_progress(&self, progress: &WorkflowProgress) {
        self.log.progress.lock().unwrap().push(*progress);
    }
}

/// Collaborators for a fresh scripted segment.
pub fn scripted_env(script: &Script, log: &Arc<CallLog>) -> Collaborators {
    scripted_env_with_token(script, log, CancellationToken::new())
}

pub fn scripted_env_with_token(script: &Script, log: &Arc<CallLog>, token: CancellationToken) -> Collaborators {
    let segment = ScriptedSegment {
        script: script.clone(),
        log: log.clone(),
        events: AtomicU64::new(0),
        random: SeededRandom::new(script.seed),
    };
    Collaborators::from_context(Arc::new(segment), token)
}

/// Continuation double: records the params and hands out a fresh segment.
pub struct ScriptedChain {
    pub script: Script,
    pub log: Arc<CallLog>,
}

impl ScriptedChain {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            log: Arc::new(CallLog::default()),
        }
    }

    pub fn first_segment(&self) -> Collaborators {
        scripted_env(&self.script, &self.log)
    }
}

#[async_trait]
impl ContinuationPrimitive for ScriptedChain {
    async fn continue_as_new(&self, params: &WorkflowParams) -> Result<Collaborators, ContinuationError> {
        self.log.continuations.lock().unwrap().push(params.clone());
        if self.script.refuse_continuation {
            return Err(ContinuationError {
                instance: "scripted-wf".to_string(),
                reason: "refused by script".to_string(),
            });
        }
        Ok(scripted_env(&self.script, &self.log))
    }
}

/// Activity executor that counts calls before delegating to [`LocalActivities`].
pub struct CountingActivities {
    inner: LocalActivities,
    pub payloads: AtomicU64,
    pub sleeps: AtomicU64,
}

impl CountingActivities {
    pub fn new(time_scale: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalActivities::with_time_scale(time_scale),
            payloads: AtomicU64::new(0),
            sleeps: AtomicU64::new(0),
        })
    }
}

#[async_trait]
impl ActivityExecutor for CountingActivities {
    async fn payload(&self, input: PayloadActivityInput) -> Result<Vec<u8>, ActivityError> {
        self.payloads.fetch_add(1, Ordering::SeqCst);
        self.inner.payload(input).await
    }

    async fn sleep(&self, input: SleepActivityInput) -> Result<(), ActivityError> {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
        self.inner.sleep(input).await
    }
}

/// Poll the instance's progress until `predicate` holds.
pub async fn wait_for_progress<F>(client: &Client, instance: &str, predicate: F, timeout_ms: u64) -> Option<WorkflowProgress>
where
    F: Fn(&WorkflowProgress) -> bool,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if let Ok(raw) = client.query(instance, "myquery").await {
            let progress: WorkflowProgress = serde_json::from_str(&raw).ok()?;
            if predicate(&progress) {
                return Some(progress);
            }
        }
        if Instant::now() > deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Names of the activities scheduled in a history, in order.
pub fn scheduled_activities(history: &[HistoryEvent]) -> Vec<String> {
    history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::ActivityScheduled { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

/// Inputs of the sleep activities scheduled in a history.
pub fn scheduled_sleeps(history: &[HistoryEvent]) -> Vec<String> {
    history
        .iter()
        .filter_map(|e| match e {
            HistoryEvent::ActivityScheduled { name, input } if name == "Sleep" => Some(input.clone()),
            _ => None,
        })
        .collect()
}

pub const WAIT: Duration = Duration::from_secs(10);
