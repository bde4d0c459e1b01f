use serde::{Deserialize, Serialize};

use crate::distribution::SleepDistribution;
use crate::error::ConfigError;

/// Default size of the opaque payload sent to and returned from the payload activity.
pub const DEFAULT_PAYLOAD_BYTES: usize = 256;

fn default_payload_bytes() -> usize {
    DEFAULT_PAYLOAD_BYTES
}

/// Input of one run-segment of the stress workflow.
///
/// A fresh value is built at every continue-as-new; the counters
/// (`times_continued`, `children_spawned`) are the only state that crosses
/// that boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowParams {
    /// Number of times to loop through the iteration steps.
    pub iterations: u64,
    /// Skip the sleep activity so end-to-end latency reflects platform overhead only.
    #[serde(default)]
    pub skip_sleep: bool,
    /// Iteration this segment starts at. Nonzero after a continue-as-new.
    #[serde(default)]
    pub initial_iteration: u64,
    /// Continue as new once the segment's history has at least this many events. 0 disables.
    #[serde(default)]
    pub continue_as_new_after_event_count: u64,
    /// Incremented every time the workflow continues as new.
    #[serde(default)]
    pub times_continued: u64,
    /// Incremented every time the workflow spawns a child.
    #[serde(default)]
    pub children_spawned: u64,
    /// Remote endpoint to exercise once per iteration. Must exist ahead of time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nexus_endpoint: Option<String>,
    /// Sleep durations (seconds) and their weights. Empty means no sleep activity.
    #[serde(default)]
    pub sleep_activity_distribution: SleepDistribution,
    /// Run the self query/describe/update/signal block every N iterations. 0 disables.
    #[serde(default)]
    pub control_plane_every: u64,
    /// Spawn a child workflow every N iterations. 0 disables.
    #[serde(default)]
    pub spawn_child_every: u64,
    #[serde(default = "default_payload_bytes")]
    pub payload_input_bytes: usize,
    #[serde(default = "default_payload_bytes")]
    pub payload_output_bytes: usize,
}

impl Default for WorkflowParams {
    fn default() -> Self {
        Self {
            iterations: 1,
            skip_sleep: false,
            initial_iteration: 0,
            continue_as_new_after_event_count: 0,
            times_continued: 0,
            children_spawned: 0,
            nexus_endpoint: None,
            sleep_activity_distribution: SleepDistribution::empty(),
            control_plane_every: 0,
            spawn_child_every: 0,
            payload_input_bytes: DEFAULT_PAYLOAD_BYTES,
            payload_output_bytes: DEFAULT_PAYLOAD_BYTES,
        }
    }
}

impl WorkflowParams {
    pub fn new(iterations: u64) -> Self {
        Self {
            iterations,
            ..Default::default()
        }
    }

    /// Check the invariants every segment relies on.
    ///
    /// The distribution validates itself on construction, so only the loop
    /// bounds are checked here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.iterations == 0 {
            return Err(ConfigError::NonPositiveIterations);
        }
        if self.initial_iteration > self.iterations {
            return Err(ConfigError::InitialIterationOutOfRange {
                initial_iteration: self.initial_iteration,
                iterations: self.iterations,
            });
        }
        Ok(())
    }

    /// Remote endpoint, treating an empty string as unset.
    pub fn nexus_endpoint(&self) -> Option<&str> {
        self.nexus_endpoint.as_deref().filter(|e| !e.trim().is_empty())
    }

    /// Parameters for the segment that picks up at `next_iteration`.
    pub fn continued(&self, next_iteration: u64, children_spawned: u64) -> Self {
        Self {
            initial_iteration: next_iteration,
            times_continued: self.times_continued + 1,
            children_spawned,
            ..self.clone()
        }
    }

    /// Iterations not yet executed by any segment.
    pub fn remaining(&self) -> u64 {
        self.iterations.saturating_sub(self.initial_iteration)
    }
}

/// Final result, produced once by the terminal segment of the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOutput {
    /// Children spawned across every continued run.
    pub children_spawned: u64,
    /// Number of times the workflow continued as new.
    pub times_continued: u64,
}

/// Progress of a running segment, answered to progress queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowProgress {
    /// Next iteration to run.
    pub iteration: u64,
    pub children_spawned: u64,
    pub times_continued: u64,
}

/// Input of the child workflow spawned by the stress workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildWorkflowParams {
    pub payload_activities: u32,
    pub payload_output_bytes: usize,
}

impl Default for ChildWorkflowParams {
    fn default() -> Self {
        Self {
            payload_activities: 1,
            payload_output_bytes: DEFAULT_PAYLOAD_BYTES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_zero_iterations() {
        assert_eq!(
            WorkflowParams::new(0).validate(),
            Err(ConfigError::NonPositiveIterations)
        );
        assert!(WorkflowParams::new(3).validate().is_ok());
    }

    #[test]
    fn validate_rejects_initial_iteration_past_end() {
        let params = WorkflowParams {
            initial_iteration: 4,
            ..WorkflowParams::new(3)
        };
        assert!(matches!(
            params.validate(),
            Err(ConfigError::InitialIterationOutOfRange { initial_iteration: 4, iterations: 3 })
        ));

        // Resuming exactly at the end is valid: the segment completes immediately.
        let params = WorkflowParams {
            initial_iteration: 3,
            ..WorkflowParams::new(3)
        };
        assert!(params.validate().is_ok());
        assert_eq!(params.remaining(), 0);
    }

    #[test]
    fn continued_carries_counters_and_copies_configuration() {
        let params = WorkflowParams {
            skip_sleep: true,
            continue_as_new_after_event_count: 100,
            times_continued: 2,
            children_spawned: 4,
            nexus_endpoint: Some("ep".to_string()),
            sleep_activity_distribution: "1:1,3:2".parse().unwrap(),
            spawn_child_every: 2,
            ..WorkflowParams::new(10)
        };
        let next = params.continued(6, 7);
        assert_eq!(next.initial_iteration, 6);
        assert_eq!(next.times_continued, 3);
        assert_eq!(next.children_spawned, 7);
        assert_eq!(next.iterations, 10);
        assert!(next.skip_sleep);
        assert_eq!(next.continue_as_new_after_event_count, 100);
        assert_eq!(next.nexus_endpoint.as_deref(), Some("ep"));
        assert_eq!(next.sleep_activity_distribution, params.sleep_activity_distribution);
        assert_eq!(next.spawn_child_every, 2);
    }

    #[test]
    fn empty_nexus_endpoint_is_unset() {
        let params = WorkflowParams {
            nexus_endpoint: Some("  ".to_string()),
            ..WorkflowParams::new(1)
        };
        assert_eq!(params.nexus_endpoint(), None);
    }

    #[test]
    fn json_uses_camel_case_and_defaults() {
        let params: WorkflowParams = serde_json::from_str(
            r#"{"iterations": 5, "skipSleep": true, "sleepActivityDistribution": {"2": 1}}"#,
        )
        .unwrap();
        assert_eq!(params.iterations, 5);
        assert!(params.skip_sleep);
        assert_eq!(params.initial_iteration, 0);
        assert_eq!(params.payload_output_bytes, DEFAULT_PAYLOAD_BYTES);
        assert_eq!(params.sleep_activity_distribution.to_string(), "2:1");

        let json = serde_json::to_value(WorkflowOutput {
            children_spawned: 3,
            times_continued: 1,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"childrenSpawned": 3, "timesContinued": 1}));
    }
}
