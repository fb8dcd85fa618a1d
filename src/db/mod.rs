//! Local SQLite store.
//!
//! Opens the pool and brings the schema up to date. Migrations are embedded
//! SQL files applied in order, each inside its own transaction, and recorded
//! by name in `_migrations`.

pub mod pool;

use crate::time::now_millis;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    #[error("Migration {name} failed: {message}")]
    Migration { name: String, message: String },

    #[error("Cannot create database directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Embedded migrations, in application order.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_initial_schema",
    include_str!("migrations/0001_initial_schema.sql"),
)];

/// Open (creating if needed) the database at `db_path` and migrate it.
pub async fn initialize(db_path: &Path) -> Result<pool::DbPool, DbError> {
    if let Some(dir) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|source| DbError::Directory {
            path: dir.display().to_string(),
            source,
        })?;
    }

    let pool = pool::create_pool(db_path).await?;
    migrate(&pool).await?;
    Ok(pool)
}

async fn migrate(pool: &pool::DbPool) -> Result<(), DbError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS _migrations (
            name TEXT PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let applied: Vec<String> = sqlx::query_scalar("SELECT name FROM _migrations")
        .fetch_all(pool)
        .await?;

    for &(name, sql) in MIGRATIONS {
        if applied.iter().any(|a| a == name) {
            continue;
        }

        log::info!("[db] Applying migration {}", name);

        let failed = |e: sqlx::Error| DbError::Migration {
            name: name.to_string(),
            message: e.to_string(),
        };

        let mut tx = pool.begin().await?;
        sqlx::raw_sql(sql).execute(&mut *tx).await.map_err(failed)?;
        sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES (?, ?)")
            .bind(name)
            .bind(now_millis())
            .execute(&mut *tx)
            .await?;
        tx.commit().await.map_err(failed)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_initialize_creates_schema() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested/roadmap.db");

        let pool = initialize(&db_path).await.unwrap();
        assert!(db_path.exists());

        let tables: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        for expected in [
            "repositories",
            "documents",
            "category_metadata",
            "blog_posts",
            "feature_requests",
            "comments",
            "sync_conflicts",
            "sync_log",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
        }
    }

    #[tokio::test]
    async fn test_reopening_does_not_reapply() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("roadmap.db");

        let first = initialize(&db_path).await.unwrap();
        sqlx::query("INSERT INTO repositories (name, base_path) VALUES ('docs', 'docs')")
            .execute(&first)
            .await
            .unwrap();
        first.close().await;

        let second = initialize(&db_path).await.unwrap();
        let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _migrations")
            .fetch_one(&second)
            .await
            .unwrap();
        assert_eq!(applied, MIGRATIONS.len() as i64);

        let repos: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
            .fetch_one(&second)
            .await
            .unwrap();
        assert_eq!(repos, 1);
    }
}
