// Process Orchestrator - drives one run at a time through the stage table
//
// Admission, cancellation and every state transition go through a single
// mutex around the lifecycle machine. The run task never holds that lock
// while it waits on a stage, the operation log or the event publisher.

pub mod lifecycle;
mod runner;

use serde::{Deserialize, Serialize};
use statig::prelude::*;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, Instrument};

use crate::config::OrchestratorConfig;
use crate::events::{EventPublisher, DEFAULT_TOPIC};
use crate::observability::OrchestratorMetrics;
use crate::oplog::OperationLog;
use crate::stages::StageTable;
use crate::telemetry::{create_run_span, generate_run_id};

pub use lifecycle::{OrchestratorState, RunEvent, RunLifecycle};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAccepted {
    pub run_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("A run is already in progress ({run_id})")]
    AlreadyRunning { run_id: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CancelError {
    #[error("No run is in progress")]
    NotRunning,
    #[error("Run {run_id} is already being cancelled")]
    AlreadyCancelling { run_id: String },
}

/// Snapshot of the run slot, readable without touching the admission lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: Option<String>,
    #[serde(flatten)]
    pub state: OrchestratorState,
}

impl RunStatus {
    fn idle() -> Self {
        Self {
            run_id: None,
            state: OrchestratorState::Idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    pub topic: String,
    pub record_run_markers: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            record_run_markers: false,
        }
    }
}

impl From<&OrchestratorConfig> for OrchestratorOptions {
    fn from(config: &OrchestratorConfig) -> Self {
        Self {
            topic: config.topic.clone(),
            record_run_markers: config.record_run_markers,
        }
    }
}

struct Admission {
    lifecycle: StateMachine<RunLifecycle>,
    /// Supervisor of the current run task; dropped (detached) on its terminal transition
    active: Option<JoinHandle<()>>,
}

pub(crate) struct Shared {
    stages: StageTable,
    log: Arc<dyn OperationLog>,
    publisher: Arc<dyn EventPublisher>,
    options: OrchestratorOptions,
    metrics: OrchestratorMetrics,
    admission: Mutex<Admission>,
    status_tx: watch::Sender<RunStatus>,
}

impl Shared {
    /// Apply a lifecycle event and publish the resulting status
    pub(crate) async fn transition(&self, event: RunEvent) -> OrchestratorState {
        let mut admission = self.admission.lock().await;
        admission.lifecycle.handle(&event);

        let status = snapshot(&admission.lifecycle);
        if status.state.is_terminal() {
            admission.active = None;
        }
        self.status_tx.send_replace(status.clone());
        status.state
    }

    pub(crate) async fn cancellation_requested(&self) -> bool {
        let admission = self.admission.lock().await;
        matches!(
            admission.lifecycle.inner().status(),
            OrchestratorState::Cancelling { .. }
        )
    }
}

fn snapshot(lifecycle: &StateMachine<RunLifecycle>) -> RunStatus {
    RunStatus {
        run_id: lifecycle.inner().run_id().map(str::to_string),
        state: lifecycle.inner().status().clone(),
    }
}

/// Drives the stage table for at most one run at a time
///
/// Cloning is cheap; clones share the same run slot.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
}

impl Orchestrator {
    pub fn new(
        stages: StageTable,
        log: Arc<dyn OperationLog>,
        publisher: Arc<dyn EventPublisher>,
        options: OrchestratorOptions,
    ) -> Self {
        let lifecycle = RunLifecycle::new(stages.len()).state_machine();
        let (status_tx, _) = watch::channel(RunStatus::idle());

        Self {
            shared: Arc::new(Shared {
                stages,
                log,
                publisher,
                options,
                metrics: OrchestratorMetrics::new(),
                admission: Mutex::new(Admission {
                    lifecycle,
                    active: None,
                }),
                status_tx,
            }),
        }
    }

    /// Admit a new run and start it in the background
    ///
    /// Returns as soon as the run is admitted. Fails with `AlreadyRunning`
    /// without any side effect while another run is in progress.
    pub async fn start_run(&self) -> Result<RunAccepted, AdmissionError> {
        let mut admission = self.shared.admission.lock().await;

        if let Some(run_id) = admission.lifecycle.inner().active_run_id() {
            self.shared.metrics.record_run_rejected();
            info!(active_run = run_id, "Rejected run request, a run is in progress");
            return Err(AdmissionError::AlreadyRunning {
                run_id: run_id.to_string(),
            });
        }

        let run_id = generate_run_id();
        admission.lifecycle.handle(&RunEvent::Start {
            run_id: run_id.clone(),
        });
        self.shared
            .status_tx
            .send_replace(snapshot(&admission.lifecycle));

        // The task blocks on the admission lock before its first transition,
        // so it cannot outrun the bookkeeping below
        let span = create_run_span(&run_id, self.shared.stages.len());
        let run = tokio::spawn(
            runner::drive(Arc::clone(&self.shared), run_id.clone()).instrument(span.clone()),
        );
        let supervisor = tokio::spawn(
            runner::supervise(Arc::clone(&self.shared), run_id.clone(), run).instrument(span),
        );
        admission.active = Some(supervisor);
        self.shared.metrics.record_run_accepted();

        Ok(RunAccepted { run_id })
    }

    /// Ask the active run to stop before its next stage
    pub async fn cancel(&self) -> Result<String, CancelError> {
        let mut admission = self.shared.admission.lock().await;
        let RunStatus { run_id, state } = snapshot(&admission.lifecycle);

        match (state, run_id) {
            (OrchestratorState::Running { .. }, Some(run_id)) => {
                admission.lifecycle.handle(&RunEvent::CancelRequested);
                self.shared
                    .status_tx
                    .send_replace(snapshot(&admission.lifecycle));
                Ok(run_id)
            }
            (OrchestratorState::Cancelling { .. }, Some(run_id)) => {
                Err(CancelError::AlreadyCancelling { run_id })
            }
            _ => Err(CancelError::NotRunning),
        }
    }

    /// Current status; never waits on run progress
    pub fn status(&self) -> RunStatus {
        self.shared.status_tx.borrow().clone()
    }

    pub fn state(&self) -> OrchestratorState {
        self.shared.status_tx.borrow().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.shared.status_tx.borrow().state.is_active()
    }

    /// Receiver notified on every state transition
    pub fn subscribe_status(&self) -> watch::Receiver<RunStatus> {
        self.shared.status_tx.subscribe()
    }

    /// Wait until no run is active and return the resulting status
    pub async fn wait_until_idle(&self) -> RunStatus {
        let mut rx = self.subscribe_status();
        let settled = match rx.wait_for(|status| !status.state.is_active()).await {
            Ok(status) => status.clone(),
            // The sender lives in `shared`, which `self` keeps alive
            Err(_) => self.status(),
        };
        settled
    }

    pub fn stages(&self) -> &StageTable {
        &self.shared.stages
    }

    pub fn topic(&self) -> &str {
        &self.shared.options.topic
    }

    pub fn operation_log(&self) -> Arc<dyn OperationLog> {
        Arc::clone(&self.shared.log)
    }

    pub fn metrics(&self) -> &OrchestratorMetrics {
        &self.shared.metrics
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("stages", &self.shared.stages.names())
            .field("topic", &self.shared.options.topic)
            .field("status", &self.status())
            .finish()
    }
}
