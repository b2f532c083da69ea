//! Shared collaborators and builders for orchestrator integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fabcell::{
    Event, EventPublisher, InMemoryOperationLog, OperationLog, OperationLogError,
    OperationRecord, Orchestrator, OrchestratorOptions, PublishError, RecordId, StageDescriptor,
    StageTable,
};

pub const TOPIC: &str = "cell/test";

/// The five-stage cell used by the end-to-end scenarios
pub fn hybrid_cell_stages() -> StageTable {
    StageTable::new(vec![
        StageDescriptor::new("transport", Duration::from_secs(2)),
        StageDescriptor::new("position", Duration::from_secs(1)),
        StageDescriptor::new("print", Duration::from_secs(5)),
        StageDescriptor::new("transfer", Duration::from_secs(2)),
        StageDescriptor::new("machine", Duration::from_secs(4)),
    ])
    .expect("valid stage table")
}

pub fn options() -> OrchestratorOptions {
    OrchestratorOptions {
        topic: TOPIC.to_string(),
        record_run_markers: false,
    }
}

pub fn build_orchestrator(
    stages: StageTable,
    log: Arc<dyn OperationLog>,
    publisher: Arc<dyn EventPublisher>,
) -> Orchestrator {
    Orchestrator::new(stages, log, publisher, options())
}

/// Operation log that refuses selected append attempts (1-based)
#[derive(Debug, Default)]
pub struct FlakyOperationLog {
    inner: InMemoryOperationLog,
    attempts: AtomicUsize,
    failing_attempts: HashSet<usize>,
    failing_from: Option<usize>,
}

impl FlakyOperationLog {
    pub fn failing_on(attempts: &[usize]) -> Self {
        Self {
            failing_attempts: attempts.iter().copied().collect(),
            ..Default::default()
        }
    }

    pub fn failing_from(attempt: usize) -> Self {
        Self {
            failing_from: Some(attempt),
            ..Default::default()
        }
    }

    pub async fn descriptions(&self) -> Vec<String> {
        self.inner.descriptions().await
    }

    pub async fn records(&self) -> Vec<OperationRecord> {
        self.inner.records().await
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OperationLog for FlakyOperationLog {
    async fn append(&self, description: &str) -> Result<RecordId, OperationLogError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let refused = self.failing_attempts.contains(&attempt)
            || self.failing_from.is_some_and(|from| attempt >= from);
        if refused {
            return Err(OperationLogError::StorageUnavailable(format!(
                "store offline (attempt {attempt})"
            )));
        }
        self.inner.append(description).await
    }

    async fn latest(&self) -> Result<Option<OperationRecord>, OperationLogError> {
        self.inner.latest().await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, OperationLogError> {
        self.inner.recent(limit).await
    }
}

/// Operation log whose implementation panics on one append attempt (1-based)
#[derive(Debug, Default)]
pub struct PanickingOperationLog {
    inner: InMemoryOperationLog,
    attempts: AtomicUsize,
    panic_on: usize,
}

impl PanickingOperationLog {
    pub fn panicking_on(attempt: usize) -> Self {
        Self {
            panic_on: attempt,
            ..Default::default()
        }
    }

    pub async fn descriptions(&self) -> Vec<String> {
        self.inner.descriptions().await
    }
}

#[async_trait]
impl OperationLog for PanickingOperationLog {
    async fn append(&self, description: &str) -> Result<RecordId, OperationLogError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt == self.panic_on {
            panic!("storage driver crashed on attempt {attempt}");
        }
        self.inner.append(description).await
    }

    async fn latest(&self) -> Result<Option<OperationRecord>, OperationLogError> {
        self.inner.latest().await
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, OperationLogError> {
        self.inner.recent(limit).await
    }
}

/// Publisher that keeps every event, optionally refusing all of them
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    events: Mutex<Vec<Event>>,
    refuse: bool,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing() -> Self {
        Self {
            refuse: true,
            ..Default::default()
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.payload).collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), PublishError> {
        if self.refuse {
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "broker unreachable".to_string(),
            });
        }
        self.events.lock().unwrap().push(Event::new(topic, payload));
        Ok(())
    }
}
