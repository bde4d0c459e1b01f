use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// One entry of an execution's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HistoryEvent {
    ExecutionStarted { input: String },
    ActivityScheduled { name: String, input: String },
    ActivityCompleted { name: String, result: String },
    ActivityFailed { name: String, error: String },
    RandomRecorded { bound: u64, value: u64 },
    UpdateAccepted { name: String },
    UpdateCompleted { name: String },
    SignalReceived { name: String },
    ChildStarted { instance: String },
    ChildCompleted { instance: String, result: String },
    ChildFailed { instance: String, error: String },
    ContinuedAsNew { input: String },
    ExecutionCompleted { output: String },
    ExecutionFailed { error: String },
}

impl HistoryEvent {
    /// Events delivered from outside the execution. Replay never matches them
    /// against a workflow step.
    pub fn is_inbound(&self) -> bool {
        matches!(
            self,
            HistoryEvent::ExecutionStarted { .. }
                | HistoryEvent::UpdateAccepted { .. }
                | HistoryEvent::UpdateCompleted { .. }
                | HistoryEvent::SignalReceived { .. }
        )
    }

    /// Events that close an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            HistoryEvent::ContinuedAsNew { .. }
                | HistoryEvent::ExecutionCompleted { .. }
                | HistoryEvent::ExecutionFailed { .. }
        )
    }

    /// Short name used in logs and nondeterminism reports.
    pub fn describe(&self) -> String {
        match self {
            HistoryEvent::ActivityScheduled { name, input } => format!("ActivityScheduled({name}, {input})"),
            HistoryEvent::RandomRecorded { bound, .. } => format!("RandomRecorded(bound={bound})"),
            HistoryEvent::ChildStarted { instance } => format!("ChildStarted({instance})"),
            other => format!("{other:?}"),
        }
    }
}

/// Histories of every instance, kept in memory.
///
/// Each instance owns a list of executions (execution ids start at 1); a
/// continue-as-new opens the next one.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    inner: Mutex<HashMap<String, Vec<Vec<HistoryEvent>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `instance` with its first execution. Returns the execution id.
    pub async fn create_instance(&self, instance: &str, started: HistoryEvent) -> Result<u64, String> {
        let mut g = self.inner.lock().await;
        if g.contains_key(instance) {
            return Err(format!("instance already exists: {instance}"));
        }
        g.insert(instance.to_string(), vec![vec![started]]);
        Ok(1)
    }

    /// Open the next execution of `instance`. The previous one must be closed.
    pub async fn create_execution(&self, instance: &str, started: HistoryEvent) -> Result<u64, String> {
        let mut g = self.inner.lock().await;
        let execs = g
            .get_mut(instance)
            .ok_or_else(|| format!("instance not found: {instance}"))?;
        if let Some(last) = execs.last() {
            if !last.last().is_some_and(HistoryEvent::is_terminal) {
                return Err(format!("execution {instance}#{} is still open", execs.len()));
            }
        }
        execs.push(vec![started]);
        Ok(execs.len() as u64)
    }

    /// Append to an open execution. Returns the execution's new length.
    pub async fn append(&self, instance: &str, execution_id: u64, new_events: Vec<HistoryEvent>) -> Result<u64, String> {
        let mut g = self.inner.lock().await;
        let execs = g
            .get_mut(instance)
            .ok_or_else(|| format!("instance not found: {instance}"))?;
        let idx = execution_id.saturating_sub(1) as usize;
        let cur = execs
            .get_mut(idx)
            .ok_or_else(|| format!("execution not found: {instance}#{execution_id}"))?;
        if cur.last().is_some_and(HistoryEvent::is_terminal) {
            return Err(format!("execution {instance}#{execution_id} is closed"));
        }
        cur.extend(new_events);
        Ok(cur.len() as u64)
    }

    /// History of the latest execution.
    pub async fn read(&self, instance: &str) -> Vec<HistoryEvent> {
        let g = self.inner.lock().await;
        g.get(instance)
            .and_then(|execs| execs.last().cloned())
            .unwrap_or_default()
    }

    pub async fn read_with_execution(&self, instance: &str, execution_id: u64) -> Vec<HistoryEvent> {
        let g = self.inner.lock().await;
        g.get(instance)
            .and_then(|execs| execs.get(execution_id.saturating_sub(1) as usize).cloned())
            .unwrap_or_default()
    }

    pub async fn list_executions(&self, instance: &str) -> Vec<u64> {
        let g = self.inner.lock().await;
        match g.get(instance) {
            Some(v) if !v.is_empty() => (1..=v.len() as u64).collect(),
            _ => Vec::new(),
        }
    }

    pub async fn list_instances(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every instance's histories, one event per line, for failure messages.
    pub async fn dump_all_pretty(&self) -> String {
        let g = self.inner.lock().await;
        let mut instances: Vec<_> = g.iter().collect();
        instances.sort_by(|a, b| a.0.cmp(b.0));
        let mut out = String::new();
        for (inst, execs) in instances {
            out.push_str(&format!("instance={inst}\n"));
            for (i, events) in execs.iter().enumerate() {
                out.push_str(&format!("  execution={}\n", i + 1));
                for e in events {
                    out.push_str(&format!("    {}\n", e.describe()));
                }
            }
        }
        out
    }
}
