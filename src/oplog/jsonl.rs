use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{monotonic_now, OperationLog, OperationLogError, OperationRecord, RecordId};

#[derive(Debug)]
struct AppendCursor {
    next_id: u64,
    last_timestamp: Option<DateTime<Utc>>,
}

/// Operation log stored as one JSON object per line
///
/// The file survives process restarts, so a later process can answer
/// `latest()` for runs executed by an earlier one.
#[derive(Debug)]
pub struct JsonlOperationLog {
    path: PathBuf,
    cursor: Mutex<AppendCursor>,
}

impl JsonlOperationLog {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, OperationLogError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let existing = read_records(&path).await?;
        let cursor = AppendCursor {
            next_id: existing.last().map(|r| r.id.0 + 1).unwrap_or(1),
            last_timestamp: existing.last().map(|r| r.timestamp),
        };

        info!(
            path = %path.display(),
            existing_records = existing.len(),
            "Opened operation log"
        );

        Ok(Self {
            path,
            cursor: Mutex::new(cursor),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn read_records(path: &Path) -> Result<Vec<OperationRecord>, OperationLogError> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    // An unterminated last line is an append still in flight from another writer
    let complete = match content.rfind('\n') {
        Some(end) => &content[..=end],
        None => "",
    };

    let mut records = Vec::new();
    for (index, line) in complete.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str::<OperationRecord>(line).map_err(|e| {
            OperationLogError::Corrupt {
                position: index + 1,
                reason: e.to_string(),
            }
        })?;
        records.push(record);
    }
    Ok(records)
}

#[async_trait]
impl OperationLog for JsonlOperationLog {
    async fn append(&self, description: &str) -> Result<RecordId, OperationLogError> {
        // Held across the write so concurrent appends cannot interleave lines
        let mut cursor = self.cursor.lock().await;

        let record = OperationRecord {
            id: RecordId(cursor.next_id),
            description: description.to_string(),
            timestamp: monotonic_now(cursor.last_timestamp),
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| OperationLogError::StorageUnavailable(e.to_string()))?;

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format!("{line}\n").as_bytes()).await?;
        file.flush().await?;

        cursor.next_id += 1;
        cursor.last_timestamp = Some(record.timestamp);
        debug!(record_id = %record.id, description, "Appended operation record");

        Ok(record.id)
    }

    async fn latest(&self) -> Result<Option<OperationRecord>, OperationLogError> {
        // Serialised with appends from this process; only covers file I/O
        let _cursor = self.cursor.lock().await;
        Ok(read_records(&self.path).await?.pop())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, OperationLogError> {
        let _cursor = self.cursor.lock().await;
        let mut records = read_records(&self.path).await?;
        let start = records.len().saturating_sub(limit);
        Ok(records.split_off(start))
    }
}
