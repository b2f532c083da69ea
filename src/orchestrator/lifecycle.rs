use serde::{Deserialize, Serialize};
use statig::prelude::*;
use std::fmt;

/// Externally visible orchestrator state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum OrchestratorState {
    Idle,
    Running { stage_index: usize },
    /// Cancellation requested, honoured before the next stage starts
    Cancelling { stage_index: usize },
    Completed,
    Failed { reason: String },
    Cancelled,
}

impl OrchestratorState {
    /// A run is in progress and admission must be refused
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Running { .. } | OrchestratorState::Cancelling { .. }
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestratorState::Completed
                | OrchestratorState::Failed { .. }
                | OrchestratorState::Cancelled
        )
    }

    pub fn stage_index(&self) -> Option<usize> {
        match self {
            OrchestratorState::Running { stage_index }
            | OrchestratorState::Cancelling { stage_index } => Some(*stage_index),
            _ => None,
        }
    }
}

impl fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorState::Idle => write!(f, "idle"),
            OrchestratorState::Running { stage_index } => write!(f, "running (stage {stage_index})"),
            OrchestratorState::Cancelling { stage_index } => {
                write!(f, "cancelling (stage {stage_index})")
            }
            OrchestratorState::Completed => write!(f, "completed"),
            OrchestratorState::Failed { reason } => write!(f, "failed: {reason}"),
            OrchestratorState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    Start { run_id: String },
    StageCompleted { stage_index: usize },
    StageFailed { stage_index: usize, reason: String },
    CancelRequested,
    /// The run task stopped between stages after a cancel request
    CancelObserved,
    /// The run task ended without reaching a terminal state
    TaskAborted { run_id: String, reason: String },
}

/// Lifecycle of the single run slot
///
/// Events that do not apply to the current state are ignored, so a stale
/// or duplicated event can never move the machine.
#[derive(Debug)]
pub struct RunLifecycle {
    stage_count: usize,
    run_id: Option<String>,
    status: OrchestratorState,
}

impl RunLifecycle {
    pub fn new(stage_count: usize) -> Self {
        Self {
            stage_count,
            run_id: None,
            status: OrchestratorState::Idle,
        }
    }
}

#[state_machine(initial = "State::idle()")]
impl RunLifecycle {
    #[state]
    fn idle(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::Start { run_id } => self.begin(run_id),
            _ => Handled,
        }
    }

    #[state]
    fn running(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::StageCompleted { stage_index } if self.is_current(*stage_index) => {
                match self.advance(*stage_index) {
                    Some(next) => {
                        self.status = OrchestratorState::Running { stage_index: next };
                        Handled
                    }
                    None => {
                        self.status = OrchestratorState::Completed;
                        tracing::info!(run_id = ?self.run_id, "Run completed");
                        Transition(State::completed())
                    }
                }
            }
            RunEvent::StageFailed { stage_index, reason } if self.is_current(*stage_index) => {
                self.fail(reason)
            }
            RunEvent::TaskAborted { run_id, reason } if self.owns(run_id) => self.fail(reason),
            RunEvent::CancelRequested => {
                let stage_index = self.status.stage_index().unwrap_or_default();
                self.status = OrchestratorState::Cancelling { stage_index };
                tracing::info!(run_id = ?self.run_id, stage_index, "Cancellation requested");
                Transition(State::cancelling())
            }
            _ => Handled,
        }
    }

    #[state]
    fn cancelling(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::StageCompleted { stage_index } if self.is_current(*stage_index) => {
                match self.advance(*stage_index) {
                    Some(next) => {
                        self.status = OrchestratorState::Cancelling { stage_index: next };
                        Handled
                    }
                    // Nothing left to cancel
                    None => {
                        self.status = OrchestratorState::Completed;
                        Transition(State::completed())
                    }
                }
            }
            RunEvent::StageFailed { stage_index, reason } if self.is_current(*stage_index) => {
                self.fail(reason)
            }
            RunEvent::TaskAborted { run_id, reason } if self.owns(run_id) => self.fail(reason),
            RunEvent::CancelObserved => {
                self.status = OrchestratorState::Cancelled;
                tracing::info!(run_id = ?self.run_id, "Run cancelled");
                Transition(State::cancelled())
            }
            _ => Handled,
        }
    }

    #[state]
    fn completed(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::Start { run_id } => self.begin(run_id),
            _ => Handled,
        }
    }

    #[state]
    fn failed(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::Start { run_id } => self.begin(run_id),
            _ => Handled,
        }
    }

    #[state]
    fn cancelled(&mut self, event: &RunEvent) -> Outcome<State> {
        match event {
            RunEvent::Start { run_id } => self.begin(run_id),
            _ => Handled,
        }
    }
}

impl RunLifecycle {
    fn begin(&mut self, run_id: &str) -> Outcome<State> {
        self.run_id = Some(run_id.to_string());
        self.status = OrchestratorState::Running { stage_index: 0 };
        tracing::info!(run_id, stages = self.stage_count, "Run admitted");
        Transition(State::running())
    }

    fn fail(&mut self, reason: &str) -> Outcome<State> {
        self.status = OrchestratorState::Failed {
            reason: reason.to_string(),
        };
        tracing::error!(run_id = ?self.run_id, reason, "Run failed");
        Transition(State::failed())
    }

    fn is_current(&self, stage_index: usize) -> bool {
        self.status.stage_index() == Some(stage_index)
    }

    fn owns(&self, run_id: &str) -> bool {
        self.run_id.as_deref() == Some(run_id)
    }

    fn advance(&self, stage_index: usize) -> Option<usize> {
        let next = stage_index + 1;
        (next < self.stage_count).then_some(next)
    }

    pub fn status(&self) -> &OrchestratorState {
        &self.status
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Id of the run holding the slot, if one is in progress
    pub fn active_run_id(&self) -> Option<&str> {
        if self.status.is_active() {
            self.run_id.as_deref()
        } else {
            None
        }
    }
}
