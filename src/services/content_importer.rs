//! Markdown repository import.
//!
//! Lists markdown files through a [`ContentSource`], hashes each one, and
//! upserts the files whose hash changed into the documents, category
//! metadata or blog post tables. Files that disappeared from the listing are
//! left in place.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::content::{self, ContentEntry, ContentKind};
use crate::models::repository::{self, Repository, RepositorySyncStatus};
use crate::services::content_source::ContentSource;
use crate::services::frontmatter::split_front_matter;
use crate::time::now_millis;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// File name that marks category metadata for its directory.
const CATEGORY_FILE: &str = "_category";

/// Top-level directories whose files are blog posts.
const BLOG_DIRECTORIES: &[&str] = &["blog", "posts"];

/// A file that could not be read or parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub path: String,
    pub message: String,
}

/// Result of importing one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub scanned: usize,
    pub upserted: usize,
    pub unchanged: usize,
    pub failed: Vec<FileFailure>,
}

impl ImportSummary {
    pub fn status(&self) -> RepositorySyncStatus {
        if self.failed.is_empty() {
            RepositorySyncStatus::Success
        } else {
            RepositorySyncStatus::Partial
        }
    }
}

/// Lowercase hex SHA-256.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Lowercase, with every run of non-alphanumerics collapsed to `-`.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut pending_dash = false;

    for c in input.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

fn detect_kind(path: &Path, declared: Option<&str>) -> ContentKind {
    if let Some(kind) = declared.and_then(ContentKind::from_front_matter) {
        return kind;
    }

    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if stem == CATEGORY_FILE {
        return ContentKind::Category;
    }

    let mut components = path.components();
    let top = components.next().and_then(|c| c.as_os_str().to_str());
    let nested = components.next().is_some();
    match top {
        Some(dir) if nested && BLOG_DIRECTORIES.contains(&dir.to_lowercase().as_str()) => {
            ContentKind::BlogPost
        }
        _ => ContentKind::Document,
    }
}

fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim_start)
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
        .filter(|title| !title.is_empty())
}

fn parent_name(path: &Path) -> Option<String> {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

/// Parse one markdown file into an entry.
///
/// `path` is relative to the repository base path, with `/` separators.
pub fn parse_entry(path: &str, bytes: &[u8]) -> Result<ContentEntry, AppError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| AppError::content(path, format!("not valid UTF-8: {}", e)))?;
    let fm = split_front_matter(text).map_err(|message| AppError::content(path, message))?;

    let file_path = Path::new(path);
    let kind = detect_kind(file_path, fm.get_str("type").as_deref());
    let stem = file_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path)
        .to_string();

    // Category metadata describes its directory
    let directory = parent_name(file_path);
    let natural_name = match kind {
        ContentKind::Category => directory.clone().unwrap_or_else(|| "index".to_string()),
        _ => stem.clone(),
    };

    let slug_source = match (fm.get_str("slug"), kind) {
        (Some(slug), _) => slug,
        (None, ContentKind::Category) => file_path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| natural_name.clone()),
        (None, _) => path
            .rsplit_once('.')
            .map(|(without_ext, _)| without_ext.to_string())
            .unwrap_or_else(|| path.to_string()),
    };
    let slug = slugify(&slug_source);
    if slug.is_empty() {
        return Err(AppError::content(path, "could not derive a slug"));
    }

    let title = fm
        .get_str("title")
        .or_else(|| first_heading(fm.body))
        .unwrap_or(natural_name);

    let category = match kind {
        ContentKind::Category => fm.get_str("category").or_else(|| {
            file_path.parent().and_then(parent_name_of_dir)
        }),
        _ => fm.get_str("category").or(directory),
    };

    Ok(ContentEntry {
        kind,
        slug,
        title,
        file_path: path.to_string(),
        content_hash: content_hash(bytes),
        category,
        author: fm.get_str("author"),
        body: fm.body.to_string(),
        description: fm.get_str("description"),
        position: fm.get_i64("position").or_else(|| fm.get_i64("sidebar_position")),
        published_at: fm.get_str("date").or_else(|| fm.get_str("published_at")),
    })
}

/// Name of the directory containing `dir`, if any.
fn parent_name_of_dir(dir: &Path) -> Option<String> {
    dir.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(str::to_string)
}

/// Imports repositories into the content tables.
#[derive(Clone)]
pub struct ContentImporter {
    pool: DbPool,
    source: Arc<dyn ContentSource>,
}

impl ContentImporter {
    pub fn new(pool: DbPool, source: Arc<dyn ContentSource>) -> Self {
        Self { pool, source }
    }

    /// Import one repository by id.
    pub async fn import_repository(&self, repository_id: i64) -> Result<ImportSummary, AppError> {
        let repo = repository::get_repository(&self.pool, repository_id)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("Repository", repository_id))?;

        self.import(&repo).await
    }

    /// Import a loaded repository and record the outcome on it.
    pub async fn import(&self, repo: &Repository) -> Result<ImportSummary, AppError> {
        let files = match self.source.list_markdown_files(repo).await {
            Ok(files) => files,
            Err(e) => {
                log::error!("[import] Listing files for '{}' failed: {}", repo.name, e);
                repository::record_sync_result(
                    &self.pool,
                    repo.id,
                    RepositorySyncStatus::Error,
                    Some(&e.to_string()),
                    now_millis(),
                )
                .await?;
                return Err(e);
            }
        };

        let mut summary = ImportSummary::default();
        let mut seen: HashSet<(ContentKind, String)> = HashSet::new();

        for path in files {
            summary.scanned += 1;

            match self.import_file(repo, &path, &mut seen).await {
                Ok(true) => summary.upserted += 1,
                Ok(false) => summary.unchanged += 1,
                Err(e @ AppError::Database { .. }) => return Err(e),
                Err(e) => {
                    log::warn!("[import] {}: skipping {}: {}", repo.name, path, e);
                    summary.failed.push(FileFailure {
                        path,
                        message: e.to_string(),
                    });
                }
            }
        }

        let status = summary.status();
        let error = (!summary.failed.is_empty())
            .then(|| format!("{} of {} files failed", summary.failed.len(), summary.scanned));
        repository::record_sync_result(&self.pool, repo.id, status, error.as_deref(), now_millis())
            .await?;

        log::info!(
            "[import] {}: scanned {}, upserted {}, unchanged {}, failed {}",
            repo.name,
            summary.scanned,
            summary.upserted,
            summary.unchanged,
            summary.failed.len()
        );

        Ok(summary)
    }

    /// Returns whether the file was written.
    async fn import_file(
        &self,
        repo: &Repository,
        path: &str,
        seen: &mut HashSet<(ContentKind, String)>,
    ) -> Result<bool, AppError> {
        let bytes = self.source.read_file(repo, path).await?;
        let entry = parse_entry(path, &bytes)?;

        if !seen.insert((entry.kind, entry.slug.clone())) {
            return Err(AppError::content(
                path,
                format!("duplicate {} slug '{}'", entry.kind, entry.slug),
            ));
        }

        let stored = content::get_content_hash(&self.pool, entry.kind, repo.id, &entry.slug).await?;
        if stored.as_deref() == Some(entry.content_hash.as_str()) {
            return Ok(false);
        }

        content::upsert_entry(&self.pool, repo.id, &entry, now_millis()).await?;
        Ok(true)
    }
}
