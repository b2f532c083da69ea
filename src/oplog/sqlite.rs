use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{migrate::MigrateDatabase, Row, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use super::{monotonic_now, OperationLog, OperationLogError, OperationRecord, RecordId};

impl From<sqlx::Error> for OperationLogError {
    fn from(err: sqlx::Error) -> Self {
        OperationLogError::StorageUnavailable(err.to_string())
    }
}

/// Operation log backed by a SQLite table
pub struct SqliteOperationLog {
    pool: SqlitePool,
    last_timestamp: Mutex<Option<DateTime<Utc>>>,
}

impl SqliteOperationLog {
    /// Connect, creating the database file and table if needed
    pub async fn connect(database_url: &str) -> Result<Self, OperationLogError> {
        if !sqlx::Sqlite::database_exists(database_url).await? {
            info!("Creating operation database at {}", database_url);
            sqlx::Sqlite::create_database(database_url).await?;
        }

        let pool = SqlitePool::connect(database_url).await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS operation_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                description TEXT NOT NULL,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        let log = Self {
            pool,
            last_timestamp: Mutex::new(None),
        };
        let previous = log.latest().await?.map(|r| r.timestamp);
        *log.last_timestamp.lock().await = previous;

        Ok(log)
    }

    /// Close database connections gracefully
    pub async fn shutdown(&self) {
        info!("Shutting down operation database connections...");
        self.pool.close().await;
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<OperationRecord, OperationLogError> {
    let id: i64 = row.get("id");
    let description: String = row.get("description");
    let timestamp: String = row.get("timestamp");
    let timestamp = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| OperationLogError::Corrupt {
            position: id as usize,
            reason: e.to_string(),
        })?
        .with_timezone(&Utc);

    Ok(OperationRecord {
        id: RecordId(id as u64),
        description,
        timestamp,
    })
}

#[async_trait]
impl OperationLog for SqliteOperationLog {
    async fn append(&self, description: &str) -> Result<RecordId, OperationLogError> {
        let mut last = self.last_timestamp.lock().await;
        let timestamp = monotonic_now(*last);

        let result = sqlx::query(
            r#"
            INSERT INTO operation_records (description, timestamp)
            VALUES (?1, ?2)
            "#,
        )
        .bind(description)
        .bind(timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;

        *last = Some(timestamp);
        Ok(RecordId(result.last_insert_rowid() as u64))
    }

    async fn latest(&self) -> Result<Option<OperationRecord>, OperationLogError> {
        let row = sqlx::query(
            r#"
            SELECT id, description, timestamp
            FROM operation_records
            ORDER BY id DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn recent(&self, limit: usize) -> Result<Vec<OperationRecord>, OperationLogError> {
        let rows = sqlx::query(
            r#"
            SELECT id, description, timestamp
            FROM operation_records
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut records = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        records.reverse();
        Ok(records)
    }
}
