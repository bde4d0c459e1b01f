//! The stress workflow: an iteration loop that bounds its own history.
//!
//! A run-segment starts from [`WorkflowParams`], runs iterations until either
//! all of them are done or the segment's history crosses the configured
//! threshold, and ends in a [`SegmentOutcome`]. Continuing as new is the only
//! way a segment ends without producing [`WorkflowOutput`].

use std::future::Future;

use crate::collaborators::{Collaborators, ContinuationPrimitive};
use crate::error::{ActionKind, ActivityError, StressError};
use crate::params::{ChildWorkflowParams, WorkflowOutput, WorkflowParams, WorkflowProgress};
use crate::plan::{
    IterationPlan, StressAction, REMOTE_ECHO_OPERATION, STRESS_QUERY, STRESS_SIGNAL, STRESS_UPDATE,
};
use crate::activities::make_payload_input;
use crate::{stress_debug, stress_info, stress_warn};

/// How a run-segment ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentOutcome {
    /// History threshold crossed; start a fresh segment with these params.
    ContinueAsNew(WorkflowParams),
    /// All iterations done.
    Completed(WorkflowOutput),
}

/// Decision taken after each iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Continue,
    Complete,
    Stay,
}

/// Decide what follows the iteration that just finished.
///
/// `next_iteration` is the index of the first unprocessed iteration. The
/// history threshold is checked first, but only while work remains: a segment
/// that has just run the final iteration completes rather than starting an
/// empty segment.
pub fn next_transition(params: &WorkflowParams, next_iteration: u64, event_count: u64) -> Transition {
    let threshold = params.continue_as_new_after_event_count;
    if threshold > 0 && next_iteration < params.iterations && event_count >= threshold {
        Transition::Continue
    } else if next_iteration >= params.iterations {
        Transition::Complete
    } else {
        Transition::Stay
    }
}

/// Run one segment of the stress workflow.
pub async fn run_segment(env: &Collaborators, params: WorkflowParams) -> Result<SegmentOutcome, StressError> {
    params.validate()?;

    let mut iteration = params.initial_iteration;
    let mut children_spawned = params.children_spawned;
    stress_info!(
        env,
        initial_iteration = iteration,
        iterations = params.iterations,
        times_continued = params.times_continued,
        "stress segment started"
    );
    publish_progress(env, &params, iteration, children_spawned);

    while iteration < params.iterations {
        let plan = IterationPlan::build(&params, iteration, env.random.as_ref());
        for action in plan.actions {
            dispatch(env, iteration, action, &mut children_spawned).await?;
        }
        iteration += 1;
        publish_progress(env, &params, iteration, children_spawned);

        let event_count = env.history.current_event_count();
        match next_transition(&params, iteration, event_count) {
            Transition::Continue => {
                stress_info!(
                    env,
                    next_iteration = iteration,
                    event_count,
                    threshold = params.continue_as_new_after_event_count,
                    "history threshold reached, continuing as new"
                );
                return Ok(SegmentOutcome::ContinueAsNew(params.continued(iteration, children_spawned)));
            }
            Transition::Complete => break,
            Transition::Stay => {}
        }
    }

    let output = WorkflowOutput {
        children_spawned,
        times_continued: params.times_continued,
    };
    stress_info!(
        env,
        children_spawned = output.children_spawned,
        times_continued = output.times_continued,
        "stress workflow completed"
    );
    Ok(SegmentOutcome::Completed(output))
}

/// Run segments until the chain completes, handing each continuation to
/// `continuation` for a fresh set of collaborators.
pub async fn run_to_completion(
    env: Collaborators,
    continuation: &dyn ContinuationPrimitive,
    params: WorkflowParams,
) -> Result<WorkflowOutput, StressError> {
    let mut env = env;
    let mut params = params;
    loop {
        match run_segment(&env, params).await? {
            SegmentOutcome::Completed(output) => return Ok(output),
            SegmentOutcome::ContinueAsNew(next) => {
                env = continuation.continue_as_new(&next).await?;
                params = next;
            }
        }
    }
}

/// The child workflow: a handful of payload round trips.
pub async fn run_child_workflow(env: &Collaborators, params: ChildWorkflowParams) -> Result<String, StressError> {
    for i in 0..u64::from(params.payload_activities) {
        let input = make_payload_input(params.payload_output_bytes, params.payload_output_bytes, i);
        suspend(env, i, env.activities.payload(input))
            .await?
            .map_err(|source| StressError::Activity {
                iteration: i,
                action: ActionKind::Payload,
                source,
            })?;
    }
    Ok(format!("completed {} payload activities", params.payload_activities))
}

fn publish_progress(env: &Collaborators, params: &WorkflowParams, iteration: u64, children_spawned: u64) {
    env.info.record_progress(&WorkflowProgress {
        iteration,
        children_spawned,
        times_continued: params.times_continued,
    });
}

/// Await a collaborator call, giving up at cancellation.
async fn suspend<T>(env: &Collaborators, iteration: u64, call: impl Future<Output = T>) -> Result<T, StressError> {
    tokio::select! {
        biased;
        _ = env.cancellation.cancelled() => Err(StressError::Cancelled { iteration }),
        out = call => Ok(out),
    }
}

async fn dispatch(
    env: &Collaborators,
    iteration: u64,
    action: StressAction,
    children_spawned: &mut u64,
) -> Result<(), StressError> {
    let kind = action.kind();
    let activity_err = |source: ActivityError| StressError::Activity {
        iteration,
        action: kind,
        source,
    };
    let control_err = |source| StressError::ControlPlane {
        iteration,
        action: kind,
        source,
    };
    stress_debug!(env, iteration, action = %kind, "dispatch");

    match action {
        StressAction::Payload(input) => {
            let expected = input.desired_output_size;
            let output = suspend(env, iteration, env.activities.payload(input))
                .await?
                .map_err(activity_err)?;
            if output.len() != expected {
                return Err(activity_err(ActivityError::new(
                    kind.as_str(),
                    format!("returned {} bytes, expected {expected}", output.len()),
                )));
            }
        }
        StressAction::Sleep(input) => {
            suspend(env, iteration, env.activities.sleep(input))
                .await?
                .map_err(activity_err)?;
        }
        StressAction::SelfQuery => {
            let workflow_id = env.info.workflow_id();
            suspend(env, iteration, env.control_plane.query(&workflow_id, STRESS_QUERY))
                .await?
                .map_err(control_err)?;
        }
        StressAction::SelfDescribe => {
            let workflow_id = env.info.workflow_id();
            suspend(env, iteration, env.control_plane.describe(&workflow_id))
                .await?
                .map_err(control_err)?;
        }
        StressAction::SelfUpdate => {
            let (workflow_id, run_id) = (env.info.workflow_id(), env.info.run_id());
            suspend(env, iteration, env.control_plane.update(&workflow_id, &run_id, STRESS_UPDATE))
                .await?
                .map_err(control_err)?;
        }
        StressAction::SelfSignal => {
            let (workflow_id, run_id) = (env.info.workflow_id(), env.info.run_id());
            suspend(env, iteration, env.control_plane.signal(&workflow_id, &run_id, STRESS_SIGNAL))
                .await?
                .map_err(control_err)?;
        }
        StressAction::SpawnChild(child) => {
            let handle = suspend(env, iteration, env.children.spawn(child))
                .await?
                .map_err(|source| StressError::Spawn {
                    iteration,
                    action: kind,
                    source,
                })?;
            *children_spawned += 1;
            let child_instance = handle.instance_id().to_string();
            match suspend(env, iteration, handle.join()).await? {
                Ok(_) => stress_debug!(env, iteration, child_instance = %child_instance, "child completed"),
                Err(error) => {
                    stress_warn!(env, iteration, child_instance = %child_instance, error = %error, "child failed")
                }
            }
        }
        StressAction::RemoteOperation { endpoint } => {
            let input = format!("iteration-{iteration}");
            suspend(env, iteration, env.remote.invoke(&endpoint, REMOTE_ECHO_OPERATION, &input))
                .await?
                .map_err(|source| StressError::RemoteOperation {
                    iteration,
                    action: kind,
                    source,
                })?;
        }
    }
    Ok(())
}
