// Control Surface - the two calls a front end needs, start a run and read status

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::oplog::{OperationLog, OperationLogError, OperationRecord};
use crate::orchestrator::{AdmissionError, CancelError, Orchestrator, RunStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartRunResponse {
    Accepted { run_id: String },
    Rejected { reason: String },
}

impl StartRunResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, StartRunResponse::Accepted { .. })
    }
}

/// Thin pass-through used by request handlers and the CLI
#[derive(Clone)]
pub struct ControlSurface {
    orchestrator: Orchestrator,
    log: Arc<dyn OperationLog>,
}

impl ControlSurface {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let log = orchestrator.operation_log();
        Self { orchestrator, log }
    }

    /// Admission result; a busy orchestrator is a normal rejection, not an error
    pub async fn start_run(&self) -> StartRunResponse {
        match self.orchestrator.start_run().await {
            Ok(accepted) => StartRunResponse::Accepted {
                run_id: accepted.run_id,
            },
            Err(e @ AdmissionError::AlreadyRunning { .. }) => StartRunResponse::Rejected {
                reason: e.to_string(),
            },
        }
    }

    /// Most recent operation record, read straight from the log
    pub async fn latest_status(&self) -> Result<Option<OperationRecord>, OperationLogError> {
        self.log.latest().await
    }

    pub async fn cancel_run(&self) -> Result<String, CancelError> {
        self.orchestrator.cancel().await
    }

    pub fn run_status(&self) -> RunStatus {
        self.orchestrator.status()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_run_response_serialization() {
        let accepted = StartRunResponse::Accepted {
            run_id: "abc".to_string(),
        };
        let json = serde_json::to_value(&accepted).unwrap();
        assert_eq!(json["status"], "accepted");
        assert_eq!(json["run_id"], "abc");

        let rejected = StartRunResponse::Rejected {
            reason: "busy".to_string(),
        };
        assert!(!rejected.is_accepted());
        assert_eq!(serde_json::to_value(&rejected).unwrap()["status"], "rejected");
    }
}
