//! Content repository model.

use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Outcome of the last import recorded on a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositorySyncStatus {
    /// Every file imported (or was unchanged).
    Success,
    /// Some files failed to read or parse; the rest were imported.
    Partial,
    /// The file listing itself failed.
    Error,
}

impl std::fmt::Display for RepositorySyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A markdown repository registered through configuration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Repository {
    pub id: i64,

    /// Unique configured name.
    pub name: String,

    /// Directory inside the repository (GitLab sources) or on disk (local sources).
    pub base_path: String,

    /// Branch read by GitLab sources.
    pub branch: String,

    /// GitLab project id or path. `None` means `base_path` is a local checkout.
    pub source_project: Option<String>,

    pub is_active: bool,

    /// When the last import finished (Unix ms).
    pub last_sync_at: Option<i64>,

    /// `success`, `partial` or `error`.
    pub last_sync_status: Option<String>,

    pub last_sync_error: Option<String>,
}

/// Repository definition as it appears in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRepository {
    pub name: String,
    pub base_path: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub source_project: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_active() -> bool {
    true
}

const REPOSITORY_COLUMNS: &str = "id, name, base_path, branch, source_project, is_active, last_sync_at, last_sync_status, last_sync_error";

/// Insert a configured repository, or update its location if the name exists.
///
/// Sync bookkeeping (`last_sync_*`) is left untouched on update.
pub async fn upsert_repository(pool: &DbPool, repo: &NewRepository) -> Result<Repository, AppError> {
    let query = format!(
        r#"
        INSERT INTO repositories (name, base_path, branch, source_project, is_active)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(name) DO UPDATE SET
            base_path = excluded.base_path,
            branch = excluded.branch,
            source_project = excluded.source_project,
            is_active = excluded.is_active
        RETURNING {}
        "#,
        REPOSITORY_COLUMNS
    );

    let repository = sqlx::query_as::<_, Repository>(&query)
        .bind(&repo.name)
        .bind(&repo.base_path)
        .bind(&repo.branch)
        .bind(&repo.source_project)
        .bind(repo.active)
        .fetch_one(pool)
        .await?;

    Ok(repository)
}

/// Look up a repository by id.
pub async fn get_repository(pool: &DbPool, id: i64) -> Result<Option<Repository>, AppError> {
    let query = format!("SELECT {} FROM repositories WHERE id = ?", REPOSITORY_COLUMNS);
    let repository = sqlx::query_as::<_, Repository>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(repository)
}

/// All active repositories, oldest first (the order ticks process them in).
pub async fn list_active_repositories(pool: &DbPool) -> Result<Vec<Repository>, AppError> {
    let query = format!(
        "SELECT {} FROM repositories WHERE is_active = 1 ORDER BY id",
        REPOSITORY_COLUMNS
    );
    let repositories = sqlx::query_as::<_, Repository>(&query)
        .fetch_all(pool)
        .await?;

    Ok(repositories)
}

/// Record the outcome of an import.
pub async fn record_sync_result(
    pool: &DbPool,
    id: i64,
    status: RepositorySyncStatus,
    error: Option<&str>,
    finished_at: i64,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE repositories SET last_sync_at = ?, last_sync_status = ?, last_sync_error = ? WHERE id = ?",
    )
    .bind(finished_at)
    .bind(status.to_string())
    .bind(error)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}
