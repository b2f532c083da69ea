use anyhow::Result;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::events::BroadcastPublisher;
use crate::orchestrator::{CancelError, Orchestrator, RunStatus};

/// Graceful shutdown coordinator for the cell controller
pub struct ShutdownCoordinator {
    orchestrator: Orchestrator,
    publisher: BroadcastPublisher,
    grace_period: Duration,
}

impl ShutdownCoordinator {
    pub fn new(orchestrator: Orchestrator, publisher: BroadcastPublisher) -> Self {
        Self {
            orchestrator,
            publisher,
            grace_period: Duration::from_secs(30),
        }
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// Wait for Ctrl-C
    pub async fn wait_for_signal() -> Result<()> {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown signal received");
        Ok(())
    }

    /// Request cooperative cancellation of the active run, if any
    pub async fn cancel_active_run(&self) {
        match self.orchestrator.cancel().await {
            Ok(run_id) => info!(run_id = %run_id, "Cancelling active run after the current stage"),
            Err(CancelError::AlreadyCancelling { run_id }) => {
                info!(run_id = %run_id, "Run is already being cancelled")
            }
            Err(CancelError::NotRunning) => info!("No active run to cancel"),
        }
    }

    /// Wait for the active run to settle, then disconnect the event publisher
    ///
    /// The publisher is disconnected even when the grace period runs out.
    pub async fn shutdown(&self) -> Result<RunStatus> {
        info!("Initiating graceful shutdown...");

        let settled = timeout(self.grace_period, self.orchestrator.wait_until_idle()).await;

        self.publisher.disconnect().await;

        match settled {
            Ok(status) => {
                info!(state = %status.state, "Graceful shutdown completed successfully");
                Ok(status)
            }
            Err(_) => {
                warn!(
                    grace_period_ms = self.grace_period.as_millis(),
                    "Run did not finish within the grace period"
                );
                Err(anyhow::anyhow!("Timeout waiting for the active run to finish"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oplog::InMemoryOperationLog;
    use crate::orchestrator::{OrchestratorOptions, OrchestratorState};
    use crate::stages::{StageDescriptor, StageTable};
    use std::sync::Arc;

    fn setup(stage_secs: u64) -> (Orchestrator, BroadcastPublisher) {
        let stages = StageTable::new(vec![
            StageDescriptor::new("transport", Duration::from_secs(stage_secs)),
            StageDescriptor::new("machine", Duration::from_secs(stage_secs)),
        ])
        .unwrap();
        let publisher = BroadcastPublisher::default();
        let orchestrator = Orchestrator::new(
            stages,
            Arc::new(InMemoryOperationLog::new()),
            Arc::new(publisher.clone()),
            OrchestratorOptions::default(),
        );
        (orchestrator, publisher)
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_run_and_disconnects() {
        let (orchestrator, publisher) = setup(1);
        publisher.connect().await;
        orchestrator.start_run().await.unwrap();

        let coordinator = ShutdownCoordinator::new(orchestrator.clone(), publisher.clone());
        let status = coordinator.shutdown().await.unwrap();

        assert_eq!(status.state, OrchestratorState::Completed);
        assert!(!publisher.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_times_out_but_still_disconnects() {
        let (orchestrator, publisher) = setup(60);
        publisher.connect().await;
        orchestrator.start_run().await.unwrap();

        let coordinator = ShutdownCoordinator::new(orchestrator.clone(), publisher.clone())
            .with_grace_period(Duration::from_secs(5));
        assert!(coordinator.shutdown().await.is_err());
        assert!(!publisher.is_connected().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_shutdown_ends_cancelled() {
        let (orchestrator, publisher) = setup(10);
        publisher.connect().await;
        orchestrator.start_run().await.unwrap();

        let coordinator = ShutdownCoordinator::new(orchestrator.clone(), publisher);
        coordinator.cancel_active_run().await;
        let status = coordinator.shutdown().await.unwrap();

        assert_eq!(status.state, OrchestratorState::Cancelled);
    }
}
