// Operation Log - append-only record of completed stages and run outcomes
//
// The orchestrator only ever appends. Backends must keep records in append
// order and hand out strictly increasing record ids.

pub mod jsonl;
pub mod memory;
#[cfg(feature = "database")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::config::{OperationLogBackend, OperationLogConfig};

pub use jsonl::JsonlOperationLog;
pub use memory::InMemoryOperationLog;
#[cfg(feature = "database")]
pub use sqlite::SqliteOperationLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: RecordId,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum OperationLogError {
    #[error("Operation log storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("Operation log is corrupt at record {position}: {reason}")]
    Corrupt { position: usize, reason: String },
}

impl From<std::io::Error> for OperationLogError {
    fn from(err: std::io::Error) -> Self {
        OperationLogError::StorageUnavailable(err.to_string())
    }
}

/// Durable, append-only store of operation records
#[async_trait]
pub trait OperationLog: Send + Sync {
    /// Append a record and return its id
    async fn append(&self, description: &str) -> Result<RecordId, OperationLogError>;

    /// Most recently appended record, `None` if nothing was ever appended
    async fn latest(&self) -> Result<Option<OperationRecord>, OperationLogError>;

    /// Up to `limit` most recent records, oldest first
    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, OperationLogError>;
}

/// Build the backend selected in configuration
pub async fn build_operation_log(
    config: &OperationLogConfig,
) -> Result<Arc<dyn OperationLog>, OperationLogError> {
    match config.backend {
        OperationLogBackend::Memory => Ok(Arc::new(InMemoryOperationLog::new())),
        OperationLogBackend::Jsonl => {
            let log = JsonlOperationLog::open(&config.path).await?;
            Ok(Arc::new(log))
        }
        #[cfg(feature = "database")]
        OperationLogBackend::Sqlite => {
            let log = SqliteOperationLog::connect(&config.path).await?;
            Ok(Arc::new(log))
        }
        #[cfg(not(feature = "database"))]
        OperationLogBackend::Sqlite => Err(OperationLogError::StorageUnavailable(
            "sqlite backend requires the 'database' feature".to_string(),
        )),
    }
}

/// Timestamp for the next record, never earlier than the previous one
pub(crate) fn monotonic_now(previous: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    match previous {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}
