use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{OrchestratorState, RunEvent, Shared};
use crate::observability::OperationTimer;

/// Body of the task spawned for one run
///
/// Each stage waits its simulated duration, then appends and publishes.
/// The next stage starts only after both calls have returned.
pub(crate) async fn drive(shared: Arc<Shared>, run_id: String) {
    let stage_count = shared.stages.len();

    if shared.options.record_run_markers {
        let marker = format!("run {run_id} started");
        if let Err(reason) = append_and_publish(&shared, &marker).await {
            fail(&shared, 0, "start marker", &reason).await;
            return;
        }
    }

    for (stage_index, stage) in shared.stages.iter().enumerate() {
        if shared.cancellation_requested().await {
            cancel(&shared, &run_id, &stage.name).await;
            return;
        }

        debug!(stage = %stage.name, stage_index, "Stage started");
        let timer = OperationTimer::new(&stage.name);
        tokio::time::sleep(stage.simulated_duration).await;

        if let Err(reason) = append_and_publish(&shared, &stage.name).await {
            fail(&shared, stage_index, &stage.name, &reason).await;
            return;
        }

        let is_last = stage_index + 1 == stage_count;
        if is_last && shared.options.record_run_markers {
            let marker = format!("run {run_id} completed");
            if let Err(reason) = append_and_publish(&shared, &marker).await {
                fail(&shared, stage_index, "completion marker", &reason).await;
                return;
            }
        }

        timer.finish();
        shared.metrics.record_stage_completed();
        if is_last {
            shared.metrics.record_run_completed();
        }
        info!(stage = %stage.name, stage_index, "Stage completed");

        let state = shared
            .transition(RunEvent::StageCompleted { stage_index })
            .await;
        debug_assert!(!is_last || state == OrchestratorState::Completed);
    }
}

/// Wait for the run task and fail the run if the task died before settling
///
/// A panicking log or publisher would otherwise leave the run slot active
/// forever. The event carries the run id, so a late report cannot touch a
/// newer run.
pub(crate) async fn supervise(shared: Arc<Shared>, run_id: String, run: JoinHandle<()>) {
    let reason = match run.await {
        Ok(()) => return,
        Err(e) if e.is_panic() => "run task panicked".to_string(),
        Err(_) => "run task was aborted".to_string(),
    };

    let state = shared
        .transition(RunEvent::TaskAborted {
            run_id: run_id.clone(),
            reason: reason.clone(),
        })
        .await;
    if state == (OrchestratorState::Failed { reason: reason.clone() }) {
        shared.metrics.record_run_failed();
        error!(run_id = %run_id, %reason, "Run task ended without settling");
    }
}

/// Durable append, then best-effort publish
///
/// Only an append failure is reported back; it is fatal to the stage.
async fn append_and_publish(shared: &Shared, description: &str) -> Result<(), String> {
    let record_id = shared
        .log
        .append(description)
        .await
        .map_err(|e| e.to_string())?;
    debug!(%record_id, description, "Operation recorded");

    publish(shared, description).await;
    Ok(())
}

async fn publish(shared: &Shared, payload: &str) {
    if let Err(e) = shared.publisher.publish(&shared.options.topic, payload).await {
        shared.metrics.record_publish_failure();
        warn!(
            topic = %shared.options.topic,
            payload,
            error = %e,
            "Failed to publish event, continuing run"
        );
    }
}

async fn fail(shared: &Shared, stage_index: usize, stage: &str, reason: &str) {
    let reason = format!("{stage}: {reason}");
    let description = format!("failed at {reason}");
    error!(stage, stage_index, %reason, "Stage failed, aborting run");

    // The store that just failed may still refuse this one
    if let Err(e) = shared.log.append(&description).await {
        error!(error = %e, "Could not record run failure");
    }
    publish(shared, &description).await;

    shared.metrics.record_run_failed();
    shared
        .transition(RunEvent::StageFailed {
            stage_index,
            reason,
        })
        .await;
}

async fn cancel(shared: &Shared, run_id: &str, next_stage: &str) {
    let description = format!("run {run_id} cancelled before {next_stage}");
    info!(next_stage, "Honouring cancellation request");

    if let Err(e) = shared.log.append(&description).await {
        error!(error = %e, "Could not record run cancellation");
    }
    publish(shared, &description).await;

    shared.metrics.record_run_cancelled();
    shared.transition(RunEvent::CancelObserved).await;
}
