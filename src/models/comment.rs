//! Comment model for feature request discussions.

use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Discussion comment on a feature request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i64,

    /// Parent feature request.
    pub feature_id: i64,

    /// Tracker note id. `None` for comments written locally.
    pub external_comment_id: Option<String>,

    /// Tracker author id, when known.
    pub author_id: Option<i64>,

    /// Display name of the author.
    pub author_name: Option<String>,

    /// Comment content (Markdown).
    pub content: String,

    /// Creation timestamp on the tracker (Unix ms).
    pub created_at: i64,

    /// When the comment was imported (Unix ms). `None` for local comments.
    pub imported_at: Option<i64>,
}

/// A comment fetched from the tracker, ready for import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalComment {
    pub external_comment_id: String,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub body: String,
    pub created_at: i64,
}

/// Insert an imported comment unless (feature, external id) already exists.
///
/// Returns `true` when a row was written.
pub async fn insert_imported(
    pool: &DbPool,
    feature_id: i64,
    comment: &ExternalComment,
    imported_at: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        INSERT INTO comments (feature_id, external_comment_id, author_id, author_name, content, created_at, imported_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(feature_id, external_comment_id) DO NOTHING
        "#,
    )
    .bind(feature_id)
    .bind(&comment.external_comment_id)
    .bind(comment.author_id)
    .bind(&comment.author_name)
    .bind(&comment.body)
    .bind(comment.created_at)
    .bind(imported_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Number of comments stored for a feature.
pub async fn count_for_feature(pool: &DbPool, feature_id: i64) -> Result<i64, AppError> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM comments WHERE feature_id = ?")
        .bind(feature_id)
        .fetch_one(pool)
        .await?;

    Ok(count)
}

/// Comments for a feature, oldest first.
pub async fn list_for_feature(pool: &DbPool, feature_id: i64) -> Result<Vec<Comment>, AppError> {
    let comments = sqlx::query_as::<_, Comment>(
        r#"
        SELECT id, feature_id, external_comment_id, author_id, author_name, content, created_at, imported_at
        FROM comments WHERE feature_id = ?
        ORDER BY created_at, id
        "#,
    )
    .bind(feature_id)
    .fetch_all(pool)
    .await?;

    Ok(comments)
}
