//! Where repository markdown comes from.
//!
//! A repository with a `source_project` is read through the GitLab
//! repository API at its branch. Otherwise `base_path` is a directory on
//! disk. Paths handed out by a source are relative to the repository's
//! `base_path` and always use `/` separators.

use crate::error::AppError;
use crate::models::repository::Repository;
use crate::services::gitlab_client::GitLabClient;
use crate::services::retry::{with_retry, RetryPolicy};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Markdown extensions picked up by the importer.
const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// File listing and reading for one repository.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Markdown files under the repository's base path, sorted.
    async fn list_markdown_files(&self, repository: &Repository) -> Result<Vec<String>, AppError>;

    async fn read_file(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, AppError>;
}

pub(crate) fn is_markdown(path: &str) -> bool {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| MARKDOWN_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Base path with `.`/empty meaning the repository root.
fn normalized_base(base_path: &str) -> Option<&str> {
    let trimmed = base_path.trim_matches('/');
    if trimmed.is_empty() || trimmed == "." {
        None
    } else {
        Some(trimmed)
    }
}

/// GitLab repository tree and raw file endpoints.
#[derive(Debug, Clone)]
pub struct GitLabContentSource {
    client: GitLabClient,
    retry: RetryPolicy,
}

impl GitLabContentSource {
    pub fn new(client: GitLabClient, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    fn project(repository: &Repository) -> Result<&str, AppError> {
        repository.source_project.as_deref().ok_or_else(|| {
            AppError::config(format!("Repository '{}' has no source project", repository.name))
        })
    }
}

#[async_trait]
impl ContentSource for GitLabContentSource {
    async fn list_markdown_files(&self, repository: &Repository) -> Result<Vec<String>, AppError> {
        let project = Self::project(repository)?;
        let base = normalized_base(&repository.base_path);

        let entries = with_retry(&self.retry, "list_repository_tree", || {
            self.client.list_repository_tree(project, base, &repository.branch)
        })
        .await?;

        let mut files: Vec<String> = entries
            .into_iter()
            .filter(|e| e.is_blob() && is_markdown(&e.path))
            .map(|e| match base {
                Some(prefix) => e
                    .path
                    .strip_prefix(prefix)
                    .map(|p| p.trim_start_matches('/').to_string())
                    .unwrap_or(e.path),
                None => e.path,
            })
            .collect();
        files.sort();

        Ok(files)
    }

    async fn read_file(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, AppError> {
        let project = Self::project(repository)?;
        let full_path = match normalized_base(&repository.base_path) {
            Some(base) => format!("{}/{}", base, path),
            None => path.to_string(),
        };

        with_retry(&self.retry, "get_file_content_bytes", || {
            self.client
                .get_file_content_bytes(project, &full_path, &repository.branch)
        })
        .await
    }
}

/// Local checkout walked on disk.
#[derive(Debug, Clone, Default)]
pub struct LocalContentSource;

impl LocalContentSource {
    fn walk(root: PathBuf) -> Result<Vec<String>, AppError> {
        let display = root.display().to_string();
        if !root.is_dir() {
            return Err(AppError::content(display, "repository directory does not exist"));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("[import] Skipping unreadable entry under {}: {}", display, e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if is_markdown(&relative) {
                files.push(relative);
            }
        }

        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl ContentSource for LocalContentSource {
    async fn list_markdown_files(&self, repository: &Repository) -> Result<Vec<String>, AppError> {
        let root = PathBuf::from(&repository.base_path);
        tokio::task::spawn_blocking(move || Self::walk(root))
            .await
            .map_err(|e| AppError::internal(format!("Directory walk panicked: {}", e)))?
    }

    async fn read_file(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, AppError> {
        let full_path = Path::new(&repository.base_path).join(path);
        tokio::fs::read(&full_path)
            .await
            .map_err(|e| AppError::content(path, e.to_string()))
    }
}

/// Picks the GitLab or local source per repository.
pub struct RepositorySources {
    gitlab: Option<GitLabContentSource>,
    local: LocalContentSource,
}

impl RepositorySources {
    pub fn new(gitlab: Option<GitLabContentSource>) -> Self {
        Self {
            gitlab,
            local: LocalContentSource,
        }
    }

    fn source_for(&self, repository: &Repository) -> Result<&dyn ContentSource, AppError> {
        match (&repository.source_project, &self.gitlab) {
            (None, _) => Ok(&self.local),
            (Some(_), Some(gitlab)) => Ok(gitlab),
            (Some(project), None) => Err(AppError::config(format!(
                "Repository '{}' reads from GitLab project '{}' but no GitLab content client is configured",
                repository.name, project
            ))),
        }
    }
}

#[async_trait]
impl ContentSource for RepositorySources {
    async fn list_markdown_files(&self, repository: &Repository) -> Result<Vec<String>, AppError> {
        self.source_for(repository)?.list_markdown_files(repository).await
    }

    async fn read_file(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, AppError> {
        self.source_for(repository)?.read_file(repository, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn local_repo(base_path: &Path) -> Repository {
        Repository {
            id: 1,
            name: "docs".to_string(),
            base_path: base_path.display().to_string(),
            branch: "main".to_string(),
            source_project: None,
            is_active: true,
            last_sync_at: None,
            last_sync_status: None,
            last_sync_error: None,
        }
    }

    #[test]
    fn test_is_markdown() {
        assert!(is_markdown("a/b.md"));
        assert!(is_markdown("NOTES.MARKDOWN"));
        assert!(!is_markdown("image.png"));
        assert!(!is_markdown("README"));
    }

    #[test]
    fn test_normalized_base() {
        assert_eq!(normalized_base("."), None);
        assert_eq!(normalized_base(""), None);
        assert_eq!(normalized_base("/docs/"), Some("docs"));
    }

    #[tokio::test]
    async fn test_local_source_lists_markdown_relative_paths() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("blog")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join("intro.md"), "# Intro").unwrap();
        std::fs::write(dir.path().join("blog/launch.markdown"), "# Launch").unwrap();
        std::fs::write(dir.path().join("logo.png"), [0u8, 1]).unwrap();
        std::fs::write(dir.path().join(".git/HEAD.md"), "ignored").unwrap();

        let source = LocalContentSource;
        let repo = local_repo(dir.path());
        let files = source.list_markdown_files(&repo).await.unwrap();
        assert_eq!(files, vec!["blog/launch.markdown".to_string(), "intro.md".to_string()]);

        let bytes = source.read_file(&repo, "intro.md").await.unwrap();
        assert_eq!(bytes, b"# Intro");
    }

    #[tokio::test]
    async fn test_local_source_missing_directory() {
        let dir = tempdir().unwrap();
        let repo = local_repo(&dir.path().join("nope"));
        let err = LocalContentSource.list_markdown_files(&repo).await.unwrap_err();
        assert!(matches!(err, AppError::Content { .. }));
    }

    #[tokio::test]
    async fn test_gitlab_repository_without_client_is_config_error() {
        let dir = tempdir().unwrap();
        let mut repo = local_repo(dir.path());
        repo.source_project = Some("group/site".to_string());

        let sources = RepositorySources::new(None);
        let err = sources.list_markdown_files(&repo).await.unwrap_err();
        assert!(matches!(err, AppError::Config { .. }));
    }
}
