use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{monotonic_now, OperationLog, OperationLogError, OperationRecord, RecordId};

/// Process-local operation log, lost on exit
#[derive(Debug, Default)]
pub struct InMemoryOperationLog {
    records: RwLock<Vec<OperationRecord>>,
}

impl InMemoryOperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    pub async fn descriptions(&self) -> Vec<String> {
        self.records
            .read()
            .await
            .iter()
            .map(|r| r.description.clone())
            .collect()
    }

    pub async fn records(&self) -> Vec<OperationRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl OperationLog for InMemoryOperationLog {
    async fn append(&self, description: &str) -> Result<RecordId, OperationLogError> {
        let mut records = self.records.write().await;
        let id = RecordId(records.len() as u64 + 1);
        let timestamp = monotonic_now(records.last().map(|r| r.timestamp));
        records.push(OperationRecord {
            id,
            description: description.to_string(),
            timestamp,
        });
        Ok(id)
    }

    async fn latest(&self) -> Result<Option<OperationRecord>, OperationLogError> {
        Ok(self.records.read().await.last().cloned())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, OperationLogError> {
        let records = self.records.read().await;
        let start = records.len().saturating_sub(limit);
        Ok(records[start..].to_vec())
    }
}
