//! In-memory tracker and content source shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use roadmap_sync_lib::db::{self, pool::DbPool};
use roadmap_sync_lib::error::AppError;
use roadmap_sync_lib::models::comment::ExternalComment;
use roadmap_sync_lib::models::feature_request::{self, FeatureFields, FeatureRequest};
use roadmap_sync_lib::models::repository::{self, NewRepository, Repository};
use roadmap_sync_lib::services::content_source::ContentSource;
use roadmap_sync_lib::services::tracker::{WorkItem, WorkItemTracker};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Fresh database in a temp dir. Keep the `TempDir` alive for the test.
pub async fn test_pool() -> (TempDir, DbPool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
    (dir, pool)
}

pub fn fields(title: &str, status: &str) -> FeatureFields {
    FeatureFields {
        title: title.to_string(),
        description: format!("{} description", title),
        status: status.to_string(),
        priority: "medium".to_string(),
    }
}

pub fn comment(id: &str, body: &str) -> ExternalComment {
    ExternalComment {
        external_comment_id: id.to_string(),
        author_id: Some(7),
        author_name: Some("Pat".to_string()),
        body: body.to_string(),
        created_at: 1_700_000_000_000,
    }
}

/// A feature already linked to work item `external_id` in the tracker,
/// created locally at `created_at` and last synced at `synced_at`.
pub async fn synced_feature(
    pool: &DbPool,
    tracker: &FakeTracker,
    external_id: &str,
    created_at: i64,
    synced_at: i64,
) -> FeatureRequest {
    let feature = feature_request::create_feature_request(pool, &fields("Dark mode", "open"), created_at)
        .await
        .unwrap();
    tracker.insert_item(external_id, feature.fields(), synced_at);

    let attached = feature_request::record_first_push(
        pool,
        feature.id,
        external_id,
        feature.local_updated_at,
        synced_at,
        synced_at,
    )
    .await
    .unwrap();
    assert!(attached);

    feature_request::require_feature_request(pool, feature.id).await.unwrap()
}

pub async fn add_repository(pool: &DbPool, name: &str) -> Repository {
    repository::upsert_repository(
        pool,
        &NewRepository {
            name: name.to_string(),
            base_path: ".".to_string(),
            branch: "main".to_string(),
            source_project: None,
            active: true,
        },
    )
    .await
    .unwrap()
}

// ── Tracker ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct TrackerState {
    items: HashMap<String, WorkItem>,
    comments: HashMap<String, Vec<ExternalComment>>,
    next_id: u64,
    /// `updated_at` stamped by the next write; `None` means "now".
    write_clock: Option<i64>,
    failing_items: HashSet<String>,
    failing_comments: HashSet<String>,
    updates: Vec<(String, FeatureFields)>,
    created: usize,
}

/// Tracker kept in memory. Writes bump `updated_at` like a real tracker.
#[derive(Clone, Default)]
pub struct FakeTracker {
    state: Arc<Mutex<TrackerState>>,
}

impl FakeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut TrackerState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn insert_item(&self, external_id: &str, fields: FeatureFields, updated_at: i64) {
        self.with(|s| {
            s.items.insert(
                external_id.to_string(),
                WorkItem {
                    external_id: external_id.to_string(),
                    fields,
                    updated_at,
                },
            );
        });
    }

    /// Simulate an edit made directly in the tracker.
    pub fn edit_item(&self, external_id: &str, edit: impl FnOnce(&mut FeatureFields), updated_at: i64) {
        self.with(|s| {
            let item = s.items.get_mut(external_id).unwrap();
            edit(&mut item.fields);
            item.updated_at = updated_at;
        });
    }

    pub fn item(&self, external_id: &str) -> WorkItem {
        self.with(|s| s.items[external_id].clone())
    }

    pub fn add_comment(&self, external_id: &str, comment: ExternalComment) {
        self.with(|s| s.comments.entry(external_id.to_string()).or_default().push(comment));
    }

    pub fn set_write_clock(&self, updated_at: i64) {
        self.with(|s| s.write_clock = Some(updated_at));
    }

    /// Make reads of an item fail with a network error.
    pub fn fail_item(&self, external_id: &str) {
        self.with(|s| s.failing_items.insert(external_id.to_string()));
    }

    pub fn fail_comments(&self, external_id: &str) {
        self.with(|s| s.failing_comments.insert(external_id.to_string()));
    }

    pub fn updates(&self) -> Vec<(String, FeatureFields)> {
        self.with(|s| s.updates.clone())
    }

    pub fn created(&self) -> usize {
        self.with(|s| s.created)
    }
}

fn write_stamp(state: &TrackerState) -> i64 {
    state
        .write_clock
        .unwrap_or_else(roadmap_sync_lib::time::now_millis)
}

#[async_trait]
impl WorkItemTracker for FakeTracker {
    async fn get_work_item(&self, external_id: &str) -> Result<WorkItem, AppError> {
        self.with(|s| {
            if s.failing_items.contains(external_id) {
                return Err(AppError::network("connection reset"));
            }
            s.items
                .get(external_id)
                .cloned()
                .ok_or_else(|| AppError::not_found_with_id("WorkItem", external_id))
        })
    }

    async fn list_comments(&self, external_id: &str) -> Result<Vec<ExternalComment>, AppError> {
        self.with(|s| {
            if s.failing_comments.contains(external_id) {
                return Err(AppError::network("connection reset"));
            }
            Ok(s.comments.get(external_id).cloned().unwrap_or_default())
        })
    }

    async fn update_work_item(&self, external_id: &str, fields: &FeatureFields) -> Result<(), AppError> {
        self.with(|s| {
            let stamp = write_stamp(s);
            let item = s
                .items
                .get_mut(external_id)
                .ok_or_else(|| AppError::not_found_with_id("WorkItem", external_id))?;
            item.fields = fields.clone();
            item.updated_at = stamp;
            s.updates.push((external_id.to_string(), fields.clone()));
            Ok(())
        })
    }

    async fn create_work_item(&self, fields: &FeatureFields) -> Result<String, AppError> {
        self.with(|s| {
            s.next_id += 1;
            s.created += 1;
            let external_id = format!("{}", 100 + s.next_id);
            let stamp = write_stamp(s);
            s.items.insert(
                external_id.clone(),
                WorkItem {
                    external_id: external_id.clone(),
                    fields: fields.clone(),
                    updated_at: stamp,
                },
            );
            Ok(external_id)
        })
    }
}

// ── Content source ───────────────────────────────────────────────────────────

/// Pauses the listing of one repository until released.
pub struct ListingGate {
    pub repository_id: i64,
    /// Notified when the gated listing starts.
    pub entered: Arc<Notify>,
    /// The gated listing waits for this.
    pub release: Arc<Notify>,
}

#[derive(Default)]
struct SourceState {
    files: HashMap<i64, BTreeMap<String, Vec<u8>>>,
    listed: Vec<i64>,
}

/// Markdown files kept in memory, per repository id.
#[derive(Clone, Default)]
pub struct FakeContentSource {
    state: Arc<Mutex<SourceState>>,
    gate: Option<Arc<ListingGate>>,
}

impl FakeContentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_gate(gate: ListingGate) -> Self {
        Self {
            state: Arc::default(),
            gate: Some(Arc::new(gate)),
        }
    }

    pub fn put_file(&self, repository_id: i64, path: &str, content: &str) {
        self.state
            .lock()
            .unwrap()
            .files
            .entry(repository_id)
            .or_default()
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    /// Repository ids in the order their files were listed.
    pub fn listed(&self) -> Vec<i64> {
        self.state.lock().unwrap().listed.clone()
    }
}

#[async_trait]
impl ContentSource for FakeContentSource {
    async fn list_markdown_files(&self, repository: &Repository) -> Result<Vec<String>, AppError> {
        self.state.lock().unwrap().listed.push(repository.id);

        if let Some(gate) = self.gate.as_ref().filter(|g| g.repository_id == repository.id) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        Ok(self
            .state
            .lock()
            .unwrap()
            .files
            .get(&repository.id)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn read_file(&self, repository: &Repository, path: &str) -> Result<Vec<u8>, AppError> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(&repository.id)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| AppError::content(path, "no such file"))
    }
}
