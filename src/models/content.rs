//! Imported markdown content: documents, category metadata and blog posts.

use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Which table an imported markdown file lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Document,
    Category,
    BlogPost,
}

impl ContentKind {
    /// Backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Document => "documents",
            Self::Category => "category_metadata",
            Self::BlogPost => "blog_posts",
        }
    }

    /// Parse the front matter `type` value.
    pub fn from_front_matter(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "doc" | "docs" | "document" => Some(Self::Document),
            "category" => Some(Self::Category),
            "blog" | "post" | "blog_post" | "blogpost" => Some(Self::BlogPost),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Document => write!(f, "document"),
            Self::Category => write!(f, "category"),
            Self::BlogPost => write!(f, "blog_post"),
        }
    }
}

/// A parsed markdown file ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentEntry {
    pub kind: ContentKind,
    pub slug: String,
    pub title: String,
    pub file_path: String,
    pub content_hash: String,
    pub category: Option<String>,
    pub author: Option<String>,
    pub body: String,
    /// Category metadata only.
    pub description: Option<String>,
    /// Category metadata only: sort position.
    pub position: Option<i64>,
    /// Blog posts only: publication date as written in front matter.
    pub published_at: Option<String>,
}

/// Stored content row (columns shared by all three tables).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: i64,
    pub repository_id: i64,
    pub slug: String,
    pub title: String,
    pub file_path: String,
    pub content_hash: String,
    pub category: Option<String>,
    pub author: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Stored hash for (repository, slug) in the given kind's table.
pub async fn get_content_hash(
    pool: &DbPool,
    kind: ContentKind,
    repository_id: i64,
    slug: &str,
) -> Result<Option<String>, AppError> {
    let query = format!(
        "SELECT content_hash FROM {} WHERE repository_id = ? AND slug = ?",
        kind.table()
    );
    let hash: Option<String> = sqlx::query_scalar(&query)
        .bind(repository_id)
        .bind(slug)
        .fetch_optional(pool)
        .await?;

    Ok(hash)
}

/// Insert or update an entry keyed by (repository_id, slug).
pub async fn upsert_entry(
    pool: &DbPool,
    repository_id: i64,
    entry: &ContentEntry,
    now: i64,
) -> Result<(), AppError> {
    let (extra_columns, extra_updates): (&str, &str) = match entry.kind {
        ContentKind::Document => ("", ""),
        ContentKind::Category => (
            ", description, position",
            ", description = excluded.description, position = excluded.position",
        ),
        ContentKind::BlogPost => (", published_at", ", published_at = excluded.published_at"),
    };
    let extra_placeholders = match entry.kind {
        ContentKind::Document => "",
        ContentKind::Category => ", ?, ?",
        ContentKind::BlogPost => ", ?",
    };

    let query = format!(
        r#"
        INSERT INTO {table} (
            repository_id, slug, title, file_path, content_hash, category, author, body,
            created_at, updated_at{extra_columns}
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?{extra_placeholders})
        ON CONFLICT(repository_id, slug) DO UPDATE SET
            title = excluded.title,
            file_path = excluded.file_path,
            content_hash = excluded.content_hash,
            category = excluded.category,
            author = excluded.author,
            body = excluded.body,
            updated_at = excluded.updated_at{extra_updates}
        "#,
        table = entry.kind.table(),
    );

    let mut q = sqlx::query(&query)
        .bind(repository_id)
        .bind(&entry.slug)
        .bind(&entry.title)
        .bind(&entry.file_path)
        .bind(&entry.content_hash)
        .bind(&entry.category)
        .bind(&entry.author)
        .bind(&entry.body)
        .bind(now)
        .bind(now);

    q = match entry.kind {
        ContentKind::Document => q,
        ContentKind::Category => q.bind(&entry.description).bind(entry.position),
        ContentKind::BlogPost => q.bind(&entry.published_at),
    };

    q.execute(pool).await?;

    Ok(())
}

/// List stored entries of one kind for a repository, ordered by slug.
pub async fn list_entries(
    pool: &DbPool,
    kind: ContentKind,
    repository_id: i64,
) -> Result<Vec<ContentRecord>, AppError> {
    let query = format!(
        "SELECT id, repository_id, slug, title, file_path, content_hash, category, author, created_at, updated_at
         FROM {} WHERE repository_id = ? ORDER BY slug",
        kind.table()
    );
    let records = sqlx::query_as::<_, ContentRecord>(&query)
        .bind(repository_id)
        .fetch_all(pool)
        .await?;

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::repository::{upsert_repository, NewRepository};
    use tempfile::tempdir;

    fn entry(kind: ContentKind, slug: &str, hash: &str) -> ContentEntry {
        ContentEntry {
            kind,
            slug: slug.to_string(),
            title: format!("Title {}", slug),
            file_path: format!("{}.md", slug),
            content_hash: hash.to_string(),
            category: None,
            author: Some("ops".to_string()),
            body: "body".to_string(),
            description: None,
            position: Some(2),
            published_at: Some("2024-05-01".to_string()),
        }
    }

    #[test]
    fn test_kind_from_front_matter() {
        assert_eq!(ContentKind::from_front_matter("Post"), Some(ContentKind::BlogPost));
        assert_eq!(ContentKind::from_front_matter("doc"), Some(ContentKind::Document));
        assert_eq!(ContentKind::from_front_matter(" category "), Some(ContentKind::Category));
        assert_eq!(ContentKind::from_front_matter("changelog"), None);
    }

    #[tokio::test]
    async fn test_upsert_each_kind_and_update_hash() {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        let repo = upsert_repository(
            &pool,
            &NewRepository {
                name: "site".to_string(),
                base_path: ".".to_string(),
                branch: "main".to_string(),
                source_project: None,
                active: true,
            },
        )
        .await
        .unwrap();

        for kind in [ContentKind::Document, ContentKind::Category, ContentKind::BlogPost] {
            upsert_entry(&pool, repo.id, &entry(kind, "intro", "h1"), 10).await.unwrap();
            upsert_entry(&pool, repo.id, &entry(kind, "intro", "h2"), 20).await.unwrap();

            let hash = get_content_hash(&pool, kind, repo.id, "intro").await.unwrap();
            assert_eq!(hash.as_deref(), Some("h2"));

            let records = list_entries(&pool, kind, repo.id).await.unwrap();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].created_at, 10);
            assert_eq!(records[0].updated_at, 20);
        }
    }
}
