use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Counters for one orchestrator instance
#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    pub runs_accepted: AtomicU64,
    pub runs_rejected: AtomicU64,
    pub runs_completed: AtomicU64,
    pub runs_failed: AtomicU64,
    pub runs_cancelled: AtomicU64,
    pub stages_completed: AtomicU64,
    pub publish_failures: AtomicU64,
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_run_accepted(&self) {
        self.runs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_rejected(&self) {
        self.runs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_completed(&self) {
        self.runs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_run_failed(&self) {
        self.runs_failed.fetch_add(1, Ordering::Relaxed);
        warn!("Run ended in failure");
    }

    pub fn record_run_cancelled(&self) {
        self.runs_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage_completed(&self) {
        self.stages_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publish_failure(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            runs_accepted: self.runs_accepted.load(Ordering::Relaxed),
            runs_rejected: self.runs_rejected.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
            runs_cancelled: self.runs_cancelled.load(Ordering::Relaxed),
            stages_completed: self.stages_completed.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Orchestrator metrics: accepted={}, rejected={}, completed={}, failed={}, cancelled={}, stages={}, publish_failures={}",
            stats.runs_accepted,
            stats.runs_rejected,
            stats.runs_completed,
            stats.runs_failed,
            stats.runs_cancelled,
            stats.stages_completed,
            stats.publish_failures
        );
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrchestratorStats {
    pub runs_accepted: u64,
    pub runs_rejected: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub runs_cancelled: u64,
    pub stages_completed: u64,
    pub publish_failures: u64,
}

/// Time an operation and log its wall-clock duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = OrchestratorMetrics::new();
        metrics.record_run_accepted();
        metrics.record_run_rejected();
        metrics.record_run_rejected();
        metrics.record_stage_completed();

        let stats = metrics.get_stats();
        assert_eq!(stats.runs_accepted, 1);
        assert_eq!(stats.runs_rejected, 2);
        assert_eq!(stats.stages_completed, 1);
        assert_eq!(stats.runs_failed, 0);
    }
}
