//! Repository import through an in-memory content source.

mod common;

use common::{add_repository, test_pool, FakeContentSource};
use roadmap_sync_lib::models::content::{self, ContentKind};
use roadmap_sync_lib::models::repository::{self, RepositorySyncStatus};
use roadmap_sync_lib::services::content_importer::ContentImporter;
use std::sync::Arc;
use std::time::Duration;

fn doc(title: &str, body: &str) -> String {
    format!("---\ntitle: {}\n---\n\n{}\n", title, body)
}

#[tokio::test]
async fn only_modified_files_are_written() {
    let (_dir, pool) = test_pool().await;
    let repo = add_repository(&pool, "handbook").await;
    let source = FakeContentSource::new();
    source.put_file(repo.id, "getting-started.md", &doc("Getting started", "Welcome."));
    source.put_file(repo.id, "guides/install.md", &doc("Install", "Run the installer."));
    source.put_file(repo.id, "blog/2024/launch.md", &doc("Launch", "We shipped."));

    let importer = ContentImporter::new(pool.clone(), Arc::new(source.clone()));

    let first = importer.import_repository(repo.id).await.unwrap();
    assert_eq!(first.scanned, 3);
    assert_eq!(first.upserted, 3);
    let after_first = repository::get_repository(&pool, repo.id).await.unwrap().unwrap();
    let first_sync_at = after_first.last_sync_at.unwrap();
    assert_eq!(after_first.last_sync_status.as_deref(), Some("success"));

    tokio::time::sleep(Duration::from_millis(5)).await;
    source.put_file(repo.id, "guides/install.md", &doc("Install", "Run the new installer."));

    let second = importer.import_repository(repo.id).await.unwrap();
    assert_eq!(second.scanned, 3);
    assert_eq!(second.upserted, 1);
    assert_eq!(second.unchanged, 2);
    assert!(second.failed.is_empty());

    let after_second = repository::get_repository(&pool, repo.id).await.unwrap().unwrap();
    assert!(after_second.last_sync_at.unwrap() > first_sync_at);

    let docs = content::list_entries(&pool, ContentKind::Document, repo.id).await.unwrap();
    let slugs: Vec<&str> = docs.iter().map(|d| d.slug.as_str()).collect();
    assert_eq!(slugs, vec!["getting-started", "guides-install"]);

    let posts = content::list_entries(&pool, ContentKind::BlogPost, repo.id).await.unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].title, "Launch");
}

#[tokio::test]
async fn bad_file_is_reported_and_others_import() {
    let (_dir, pool) = test_pool().await;
    let repo = add_repository(&pool, "handbook").await;
    let source = FakeContentSource::new();
    source.put_file(repo.id, "ok.md", &doc("Fine", "Body."));
    source.put_file(repo.id, "broken.md", "---\ntitle: [unclosed\n---\nbody\n");

    let importer = ContentImporter::new(pool.clone(), Arc::new(source));
    let summary = importer.import(&repo).await.unwrap();

    assert_eq!(summary.upserted, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].path, "broken.md");
    assert_eq!(summary.status(), RepositorySyncStatus::Partial);

    let stored = repository::get_repository(&pool, repo.id).await.unwrap().unwrap();
    assert_eq!(stored.last_sync_status.as_deref(), Some("partial"));
    assert!(stored.last_sync_error.is_some());
}

#[tokio::test]
async fn unknown_repository_is_not_found() {
    let (_dir, pool) = test_pool().await;
    let importer = ContentImporter::new(pool.clone(), Arc::new(FakeContentSource::new()));

    let err = importer.import_repository(404).await.unwrap_err();
    assert!(err.is_not_found());
}
