//! What a single iteration does, decided before anything is dispatched.

use crate::activities::{make_payload_input, make_sleep_input, PayloadActivityInput, SleepActivityInput};
use crate::collaborators::DurableRandom;
use crate::error::ActionKind;
use crate::params::{ChildWorkflowParams, WorkflowParams};

/// Query type answered by a running stress workflow.
pub const STRESS_QUERY: &str = "myquery";
/// Update accepted by a running stress workflow.
pub const STRESS_UPDATE: &str = "myupdate";
/// Signal accepted by a running stress workflow.
pub const STRESS_SIGNAL: &str = "mysignal";
/// Operation invoked on the remote endpoint.
pub const REMOTE_ECHO_OPERATION: &str = "echo";

/// One step of an iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StressAction {
    Payload(PayloadActivityInput),
    Sleep(SleepActivityInput),
    SelfQuery,
    SelfDescribe,
    SelfUpdate,
    SelfSignal,
    SpawnChild(ChildWorkflowParams),
    RemoteOperation { endpoint: String },
}

impl StressAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            StressAction::Payload(_) => ActionKind::Payload,
            StressAction::Sleep(_) => ActionKind::Sleep,
            StressAction::SelfQuery => ActionKind::SelfQuery,
            StressAction::SelfDescribe => ActionKind::SelfDescribe,
            StressAction::SelfUpdate => ActionKind::SelfUpdate,
            StressAction::SelfSignal => ActionKind::SelfSignal,
            StressAction::SpawnChild(_) => ActionKind::SpawnChild,
            StressAction::RemoteOperation { .. } => ActionKind::RemoteOperation,
        }
    }
}

/// Ordered actions of one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPlan {
    pub iteration: u64,
    pub actions: Vec<StressAction>,
}

impl IterationPlan {
    /// Plan iteration `iteration` (0-based, absolute across segments).
    ///
    /// Order: payload, sleep, control-plane block, child spawn, remote call.
    /// `random` is only consulted for the sleep sample, and only when sleeping
    /// is enabled.
    pub fn build<R: DurableRandom + ?Sized>(params: &WorkflowParams, iteration: u64, random: &R) -> Self {
        let mut actions = vec![StressAction::Payload(make_payload_input(
            params.payload_input_bytes,
            params.payload_output_bytes,
            iteration,
        ))];

        if !params.skip_sleep {
            if let Some(input) = make_sleep_input(&params.sleep_activity_distribution, random) {
                actions.push(StressAction::Sleep(input));
            }
        }

        if cadence_matches(params.control_plane_every, iteration) {
            actions.extend([
                StressAction::SelfQuery,
                StressAction::SelfDescribe,
                StressAction::SelfUpdate,
                StressAction::SelfSignal,
            ]);
        }

        if cadence_matches(params.spawn_child_every, iteration) {
            actions.push(StressAction::SpawnChild(ChildWorkflowParams {
                payload_output_bytes: params.payload_output_bytes,
                ..Default::default()
            }));
        }

        if let Some(endpoint) = params.nexus_endpoint() {
            actions.push(StressAction::RemoteOperation {
                endpoint: endpoint.to_string(),
            });
        }

        Self { iteration, actions }
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.actions.iter().map(StressAction::kind).collect()
    }
}

fn cadence_matches(every: u64, iteration: u64) -> bool {
    every > 0 && iteration % every == 0
}
