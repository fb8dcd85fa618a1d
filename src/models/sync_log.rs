//! Persisted log of recent sync operations.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::time::now_millis;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Maximum number of log entries to keep.
pub const MAX_LOG_ENTRIES: i64 = 200;

/// Status of a sync log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Success,
    Error,
    Skipped,
}

impl From<&str> for LogStatus {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "success" => Self::Success,
            "skipped" => Self::Skipped,
            _ => Self::Error,
        }
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// One logged operation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SyncLogEntry {
    pub id: i64,

    /// Operation name: `import_repository`, `feature_sync`, `comment_sync`, ...
    pub operation: String,

    /// `success`, `error` or `skipped`.
    pub status: String,

    /// `repository` or `feature`.
    pub target_kind: Option<String>,

    pub target_id: Option<i64>,

    /// Details or error message.
    pub message: Option<String>,

    pub duration_ms: Option<i64>,

    /// When the operation finished (Unix ms).
    pub timestamp: i64,
}

impl SyncLogEntry {
    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> LogStatus {
        LogStatus::from(self.status.as_str())
    }
}

/// A log record to write.
#[derive(Debug, Clone)]
pub struct SyncLogRecord<'a> {
    pub operation: &'a str,
    pub status: LogStatus,
    pub target_kind: Option<&'a str>,
    pub target_id: Option<i64>,
    pub message: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Log a sync operation to the sync_log table.
pub async fn log_sync_operation(pool: &DbPool, record: SyncLogRecord<'_>) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO sync_log (operation, status, target_kind, target_id, message, duration_ms, timestamp)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.operation)
    .bind(record.status.to_string())
    .bind(record.target_kind)
    .bind(record.target_id)
    .bind(&record.message)
    .bind(record.duration_ms)
    .bind(now_millis())
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        DELETE FROM sync_log WHERE id NOT IN (
            SELECT id FROM sync_log ORDER BY timestamp DESC, id DESC LIMIT ?
        )
        "#,
    )
    .bind(MAX_LOG_ENTRIES)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get recent sync log entries, newest first.
pub async fn recent_sync_log(pool: &DbPool, limit: i64) -> Result<Vec<SyncLogEntry>, AppError> {
    let entries = sqlx::query_as::<_, SyncLogEntry>(
        r#"
        SELECT id, operation, status, target_kind, target_id, message, duration_ms, timestamp
        FROM sync_log ORDER BY timestamp DESC, id DESC LIMIT ?
        "#,
    )
    .bind(limit.clamp(1, MAX_LOG_ENTRIES))
    .fetch_all(pool)
    .await?;

    Ok(entries)
}
