use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{lock, run_id, Client, HistoryEvent, LiveInstance, RuntimeInner, WorkflowInput};
use crate::activities::{PayloadActivityInput, SleepActivityInput, PAYLOAD_ACTIVITY, SLEEP_ACTIVITY};
use crate::collaborators::{
    ActivityExecutor, ChildHandle, ChildSpawner, Collaborators, ControlPlaneClient, DurableRandom,
    ExecutionDescription, ExecutionInfo, HistorySizeMonitor, RemoteOperationInvoker,
};
use crate::error::{ActivityError, ControlPlaneError, RemoteOperationError, SpawnError, StressError};
use crate::params::{ChildWorkflowParams, WorkflowProgress};
use crate::random::{execution_seed, SeededRandom};

const SELF_QUERY: &str = "SelfQuery";
const SELF_DESCRIBE: &str = "SelfDescribe";
const SELF_UPDATE: &str = "SelfUpdate";
const SELF_SIGNAL: &str = "SelfSignal";
const REMOTE_OPERATION: &str = "RemoteOperation";

/// Position of a segment in its recorded history.
#[derive(Debug)]
struct ReplayCursor {
    events: Vec<HistoryEvent>,
    cursor: usize,
}

impl ReplayCursor {
    fn skip_inbound(&mut self) {
        while self.events.get(self.cursor).is_some_and(HistoryEvent::is_inbound) {
            self.cursor += 1;
        }
    }

    fn peek(&mut self) -> Option<&HistoryEvent> {
        self.skip_inbound();
        self.events.get(self.cursor)
    }

    /// True while a recorded workflow step is still ahead.
    fn has_remaining(&self) -> bool {
        self.events[self.cursor.min(self.events.len())..]
            .iter()
            .any(|e| !e.is_inbound())
    }
}

fn is_outcome(event: &HistoryEvent) -> bool {
    matches!(
        event,
        HistoryEvent::ActivityCompleted { .. }
            | HistoryEvent::ActivityFailed { .. }
            | HistoryEvent::ChildCompleted { .. }
            | HistoryEvent::ChildFailed { .. }
    )
}

fn encode_control_plane(error: ControlPlaneError) -> String {
    serde_json::to_string(&error).unwrap_or_else(|_| error.to_string())
}

fn decode_control_plane(operation: &str, recorded: String) -> ControlPlaneError {
    serde_json::from_str(&recorded).unwrap_or_else(|_| ControlPlaneError::transport(operation, recorded))
}

/// Platform context of one attempt at one execution.
///
/// Implements every collaborator trait. Each step is matched against the
/// recorded history first; only steps past the end of that history run.
#[derive(Clone)]
pub struct SegmentContext {
    runtime: Arc<RuntimeInner>,
    live: Arc<LiveInstance>,
    execution_id: u64,
    attempt: u32,
    replay: Arc<Mutex<ReplayCursor>>,
    random: Arc<SeededRandom>,
    child_seq: Arc<AtomicU64>,
    cancellation: CancellationToken,
}

impl SegmentContext {
    pub(crate) fn new(
        runtime: Arc<RuntimeInner>,
        live: Arc<LiveInstance>,
        execution_id: u64,
        history: Vec<HistoryEvent>,
        attempt: u32,
    ) -> Self {
        let seed = execution_seed(&live.instance, execution_id);
        let cancellation = runtime.shutdown.child_token();
        Self {
            runtime,
            live,
            execution_id,
            attempt,
            replay: Arc::new(Mutex::new(ReplayCursor {
                events: history,
                cursor: 0,
            })),
            random: Arc::new(SeededRandom::new(seed)),
            child_seq: Arc::new(AtomicU64::new(0)),
            cancellation,
        }
    }

    pub fn execution_id(&self) -> u64 {
        self.execution_id
    }

    /// Bind every seam of a segment to this context.
    pub fn collaborators(&self) -> Collaborators {
        Collaborators::from_context(Arc::new(self.clone()), self.cancellation.clone())
    }

    /// Report a replay mismatch and stop the attempt at its next suspension point.
    fn nondeterministic(&self, expected: String, found: String) -> String {
        let error = StressError::Nondeterminism { expected, found };
        let message = error.to_string();
        warn!(instance_id = %self.live.instance, execution_id = self.execution_id, error = %message, "replay mismatch");
        self.live.report_nondeterminism(error);
        self.cancellation.cancel();
        message
    }

    /// Returns true if `expected` is already recorded.
    fn match_scheduled(&self, expected: &HistoryEvent) -> Result<bool, String> {
        let mut replay = lock(&self.replay);
        let mismatch = match replay.peek() {
            None => return Ok(false),
            Some(found) if found == expected => None,
            Some(found) => Some(found.describe()),
        };
        match mismatch {
            None => {
                replay.cursor += 1;
                Ok(true)
            }
            Some(found) => {
                drop(replay);
                Err(self.nondeterministic(expected.describe(), found))
            }
        }
    }

    /// Recorded outcome of the step just matched, if the step finished before
    /// the history ends.
    fn take_outcome(&self) -> Result<Option<HistoryEvent>, String> {
        let mut replay = lock(&self.replay);
        let next = match replay.peek() {
            None => return Ok(None),
            Some(event) if is_outcome(event) => Ok(event.clone()),
            Some(other) => Err(other.describe()),
        };
        match next {
            Ok(event) => {
                replay.cursor += 1;
                Ok(Some(event))
            }
            Err(found) => {
                drop(replay);
                Err(self.nondeterministic("step outcome".to_string(), found))
            }
        }
    }

    fn take_random(&self, bound: u64) -> Result<Option<u64>, String> {
        let mut replay = lock(&self.replay);
        let next = match replay.peek() {
            None => return Ok(None),
            Some(HistoryEvent::RandomRecorded { bound: recorded, value }) if *recorded == bound => Ok(*value),
            Some(other) => Err(other.describe()),
        };
        match next {
            Ok(value) => {
                replay.cursor += 1;
                Ok(Some(value))
            }
            Err(found) => {
                drop(replay);
                let expected = HistoryEvent::RandomRecorded { bound, value: 0 }.describe();
                Err(self.nondeterministic(expected, found))
            }
        }
    }

    async fn record(&self, event: HistoryEvent) -> Result<(), String> {
        self.runtime.record(&self.live, vec![event]).await.map(|_| ())
    }

    /// Record a step outcome, then inject a crash if the fault threshold is reached.
    async fn record_outcome(&self, event: HistoryEvent) -> Result<(), String> {
        let len = self.runtime.record(&self.live, vec![event]).await?;
        if self.attempt > 0 || self.cancellation.is_cancelled() {
            return Ok(());
        }
        if let Some(limit) = self.runtime.options.faults.crash_after_events {
            if len >= limit {
                warn!(
                    instance_id = %self.live.instance,
                    execution_id = self.execution_id,
                    history_length = len,
                    "injecting worker crash"
                );
                self.live.mark_crashed();
                self.cancellation.cancel();
            }
        }
        Ok(())
    }

    /// Run one recorded step. `encode` turns a result into its history form,
    /// `decode` rebuilds it on replay.
    async fn step<T, Fut>(
        &self,
        name: &str,
        input: String,
        run: Fut,
        encode: impl FnOnce(&T) -> String,
        decode: impl FnOnce(&str) -> Option<T>,
    ) -> Result<T, String>
    where
        Fut: Future<Output = Result<T, String>>,
    {
        let scheduled = HistoryEvent::ActivityScheduled {
            name: name.to_string(),
            input,
        };
        if self.match_scheduled(&scheduled)? {
            match self.take_outcome()? {
                Some(HistoryEvent::ActivityCompleted { result, .. }) => {
                    return decode(&result).ok_or_else(|| format!("unreadable recorded result for {name}: {result}"));
                }
                Some(HistoryEvent::ActivityFailed { error, .. }) => return Err(error),
                Some(other) => {
                    return Err(self.nondeterministic(format!("outcome of {name}"), other.describe()));
                }
                // Interrupted before the outcome was recorded: run it again.
                None => debug!(instance_id = %self.live.instance, step = name, "re-running unfinished step"),
            }
        } else {
            self.record(scheduled).await?;
        }

        let result = run.await;
        let outcome = match &result {
            Ok(value) => HistoryEvent::ActivityCompleted {
                name: name.to_string(),
                result: encode(value),
            },
            Err(error) => HistoryEvent::ActivityFailed {
                name: name.to_string(),
                error: error.clone(),
            },
        };
        self.record_outcome(outcome).await?;
        result
    }

    async fn child_outcome(&self, child: &str) -> Result<String, String> {
        match self.take_outcome()? {
            Some(HistoryEvent::ChildCompleted { instance, result }) if instance == child => return Ok(result),
            Some(HistoryEvent::ChildFailed { instance, error }) if instance == child => return Err(error),
            Some(other) => return Err(self.nondeterministic(format!("outcome of {child}"), other.describe())),
            None => {}
        }
        let result = self.runtime.wait_instance(child).await.map_err(|e| e.to_string());
        let event = match &result {
            Ok(output) => HistoryEvent::ChildCompleted {
                instance: child.to_string(),
                result: output.clone(),
            },
            Err(error) => HistoryEvent::ChildFailed {
                instance: child.to_string(),
                error: error.clone(),
            },
        };
        self.record_outcome(event).await?;
        result
    }

    fn client(&self) -> Client {
        Client::new(self.runtime.clone())
    }
}

#[async_trait]
impl ActivityExecutor for SegmentContext {
    async fn payload(&self, input: PayloadActivityInput) -> Result<Vec<u8>, ActivityError> {
        let descriptor = format!("in={} out={}", input.ignored_input_data.len(), input.desired_output_size);
        let runtime = self.runtime.clone();
        let run = async move {
            let _permit = runtime.workers.acquire().await.map_err(|e| e.to_string())?;
            let result = runtime.activities.payload(input).await.map_err(|e| e.message);
            runtime.metrics.record_activity(result.is_ok());
            result
        };
        // Payload bytes are not kept in history; a replayed payload is zero-filled.
        self.step(
            PAYLOAD_ACTIVITY,
            descriptor,
            run,
            |bytes: &Vec<u8>| bytes.len().to_string(),
            |recorded| recorded.parse::<usize>().ok().map(|len| vec![0u8; len]),
        )
        .await
        .map_err(|message| ActivityError::new(PAYLOAD_ACTIVITY, message))
    }

    async fn sleep(&self, input: SleepActivityInput) -> Result<(), ActivityError> {
        let descriptor = format!("{}ms", input.sleep_duration.as_millis());
        let runtime = self.runtime.clone();
        let run = async move {
            let _permit = runtime.workers.acquire().await.map_err(|e| e.to_string())?;
            let result = runtime.activities.sleep(input).await.map_err(|e| e.message);
            runtime.metrics.record_activity(result.is_ok());
            result
        };
        self.step(SLEEP_ACTIVITY, descriptor, run, |_| String::new(), |_| Some(()))
            .await
            .map_err(|message| ActivityError::new(SLEEP_ACTIVITY, message))
    }
}

#[async_trait]
impl ControlPlaneClient for SegmentContext {
    async fn query(&self, workflow_id: &str, query_type: &str) -> Result<String, ControlPlaneError> {
        let (client, workflow_id, query) = (self.client(), workflow_id.to_string(), query_type.to_string());
        let run = async move { client.query(&workflow_id, &query).await.map_err(encode_control_plane) };
        self.step(SELF_QUERY, query_type.to_string(), run, String::clone, |r| Some(r.to_string()))
            .await
            .map_err(|recorded| decode_control_plane("query", recorded))
    }

    async fn update(&self, workflow_id: &str, run_id: &str, update_name: &str) -> Result<(), ControlPlaneError> {
        let client = self.client();
        let (workflow_id, run_id, update) = (workflow_id.to_string(), run_id.to_string(), update_name.to_string());
        let run = async move {
            client
                .update(&workflow_id, &run_id, &update)
                .await
                .map_err(encode_control_plane)
        };
        self.step(SELF_UPDATE, update_name.to_string(), run, |_| String::new(), |_| Some(()))
            .await
            .map_err(|recorded| decode_control_plane("update", recorded))
    }

    async fn signal(&self, workflow_id: &str, run_id: &str, signal_name: &str) -> Result<(), ControlPlaneError> {
        let client = self.client();
        let (workflow_id, run_id, signal) = (workflow_id.to_string(), run_id.to_string(), signal_name.to_string());
        let run = async move {
            client
                .signal(&workflow_id, &run_id, &signal)
                .await
                .map_err(encode_control_plane)
        };
        self.step(SELF_SIGNAL, signal_name.to_string(), run, |_| String::new(), |_| Some(()))
            .await
            .map_err(|recorded| decode_control_plane("signal", recorded))
    }

    async fn describe(&self, workflow_id: &str) -> Result<ExecutionDescription, ControlPlaneError> {
        let (client, target) = (self.client(), workflow_id.to_string());
        let run = async move { client.describe(&target).await.map_err(encode_control_plane) };
        self.step(
            SELF_DESCRIBE,
            workflow_id.to_string(),
            run,
            |d: &ExecutionDescription| serde_json::to_string(d).unwrap_or_default(),
            |r| serde_json::from_str(r).ok(),
        )
        .await
        .map_err(|recorded| decode_control_plane("describe", recorded))
    }
}

#[async_trait]
impl ChildSpawner for SegmentContext {
    async fn spawn(&self, params: ChildWorkflowParams) -> Result<ChildHandle, SpawnError> {
        let seq = self.child_seq.fetch_add(1, Ordering::SeqCst);
        let child = format!("{}-child-{}-{}", self.live.instance, self.execution_id, seq);
        let spawn_error = |message: String| SpawnError {
            child_instance: child.clone(),
            message,
        };

        let started = HistoryEvent::ChildStarted { instance: child.clone() };
        if !self.match_scheduled(&started).map_err(&spawn_error)? {
            self.runtime
                .start_instance(&child, WorkflowInput::Child(params))
                .await
                .map_err(|e| spawn_error(e.to_string()))?;
            self.record(started).await.map_err(&spawn_error)?;
            self.runtime.metrics.record_child_spawned();
        }

        let ctx = self.clone();
        let instance = child.clone();
        let completion = async move { ctx.child_outcome(&instance).await }.boxed();
        Ok(ChildHandle::new(child, completion))
    }
}

#[async_trait]
impl RemoteOperationInvoker for SegmentContext {
    async fn invoke(&self, endpoint: &str, operation: &str, input: &str) -> Result<String, RemoteOperationError> {
        let registered = self.runtime.options.nexus_endpoints.iter().any(|e| e == endpoint);
        let (target, echoed) = (endpoint.to_string(), input.to_string());
        let run = async move {
            if registered {
                Ok(echoed)
            } else {
                Err(format!("endpoint not registered: {target}"))
            }
        };
        self.step(
            REMOTE_OPERATION,
            format!("{endpoint}/{operation}:{input}"),
            run,
            String::clone,
            |r| Some(r.to_string()),
        )
        .await
        .map_err(|message| RemoteOperationError {
            endpoint: endpoint.to_string(),
            operation: operation.to_string(),
            message,
        })
    }
}

impl HistorySizeMonitor for SegmentContext {
    /// While replaying, the length the history had at this point of the
    /// original run.
    fn current_event_count(&self) -> u64 {
        let replay = lock(&self.replay);
        if replay.has_remaining() {
            replay.cursor as u64
        } else {
            self.live.event_count()
        }
    }
}

impl DurableRandom for SegmentContext {
    fn next_below(&self, bound: u64) -> u64 {
        let drawn = self.random.next_below(bound);
        match self.take_random(bound) {
            Ok(Some(recorded)) => recorded,
            Ok(None) => {
                self.live.push_pending(HistoryEvent::RandomRecorded { bound, value: drawn });
                drawn
            }
            Err(_) => drawn,
        }
    }
}

impl ExecutionInfo for SegmentContext {
    fn workflow_id(&self) -> String {
        self.live.instance.clone()
    }

    fn run_id(&self) -> String {
        run_id(&self.live.instance, self.execution_id)
    }

    fn is_replaying(&self) -> bool {
        lock(&self.replay).has_remaining()
    }

    fn record_progress(&self, progress: &WorkflowProgress) {
        self.live.set_progress(*progress);
    }
}
