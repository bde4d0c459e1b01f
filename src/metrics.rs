//! In-process counters for a stress run.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Snapshot of the counters, for tests and run summaries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub workflow_starts: u64,
    pub workflow_completions: u64,
    pub workflow_failures: u64,
    pub workflow_application_errors: u64,
    pub workflow_infrastructure_errors: u64,
    pub workflow_configuration_errors: u64,
    pub continuations: u64,
    pub activity_success: u64,
    pub activity_errors: u64,
    pub children_spawned: u64,
    pub control_plane_calls: u64,
    pub replays: u64,
    pub active_workflows: i64,
}

#[derive(Debug, Default)]
pub struct MetricsProvider {
    workflow_starts: AtomicU64,
    workflow_completions: AtomicU64,
    workflow_failures: AtomicU64,
    workflow_application_errors: AtomicU64,
    workflow_infrastructure_errors: AtomicU64,
    workflow_configuration_errors: AtomicU64,
    continuations: AtomicU64,
    activity_success: AtomicU64,
    activity_errors: AtomicU64,
    children_spawned: AtomicU64,
    control_plane_calls: AtomicU64,
    replays: AtomicU64,
    active_workflows: AtomicI64,
}

impl MetricsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_workflow_start(&self) {
        self.workflow_starts.fetch_add(1, Ordering::Relaxed);
        self.active_workflows.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_workflow_completion(&self) {
        self.workflow_completions.fetch_add(1, Ordering::Relaxed);
        self.active_workflows.fetch_sub(1, Ordering::Relaxed);
    }

    /// `category` is [`StressError::category`](crate::StressError::category).
    #[inline]
    pub fn record_workflow_failure(&self, category: &str) {
        self.workflow_failures.fetch_add(1, Ordering::Relaxed);
        self.active_workflows.fetch_sub(1, Ordering::Relaxed);
        match category {
            "application" => self.workflow_application_errors.fetch_add(1, Ordering::Relaxed),
            "configuration" => self.workflow_configuration_errors.fetch_add(1, Ordering::Relaxed),
            _ => self.workflow_infrastructure_errors.fetch_add(1, Ordering::Relaxed),
        };
    }

    #[inline]
    pub fn record_continue_as_new(&self) {
        self.continuations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_activity(&self, success: bool) {
        if success {
            self.activity_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.activity_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_child_spawned(&self) {
        self.children_spawned.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_control_plane_call(&self) {
        self.control_plane_calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_replay(&self) {
        self.replays.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            workflow_starts: self.workflow_starts.load(Ordering::Relaxed),
            workflow_completions: self.workflow_completions.load(Ordering::Relaxed),
            workflow_failures: self.workflow_failures.load(Ordering::Relaxed),
            workflow_application_errors: self.workflow_application_errors.load(Ordering::Relaxed),
            workflow_infrastructure_errors: self.workflow_infrastructure_errors.load(Ordering::Relaxed),
            workflow_configuration_errors: self.workflow_configuration_errors.load(Ordering::Relaxed),
            continuations: self.continuations.load(Ordering::Relaxed),
            activity_success: self.activity_success.load(Ordering::Relaxed),
            activity_errors: self.activity_errors.load(Ordering::Relaxed),
            children_spawned: self.children_spawned.load(Ordering::Relaxed),
            control_plane_calls: self.control_plane_calls.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            active_workflows: self.active_workflows.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_bucketed_by_category() {
        let metrics = MetricsProvider::new();
        for _ in 0..3 {
            metrics.record_workflow_start();
        }
        metrics.record_workflow_completion();
        metrics.record_workflow_failure("application");
        metrics.record_workflow_failure("infrastructure");

        let snap = metrics.snapshot();
        assert_eq!(snap.workflow_starts, 3);
        assert_eq!(snap.workflow_completions, 1);
        assert_eq!(snap.workflow_failures, 2);
        assert_eq!(snap.workflow_application_errors, 1);
        assert_eq!(snap.workflow_infrastructure_errors, 1);
        assert_eq!(snap.workflow_configuration_errors, 0);
        assert_eq!(snap.active_workflows, 0);
    }
}
