//! Sync primitives shared by the worker loop, manual triggers and the
//! control API.
//!
//! Every per-target operation runs under that target's lock. A target that
//! is already busy is skipped with a notice; a target that fails is logged
//! and recorded without stopping the others.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::feature_request::{self, FeatureRequest};
use crate::models::repository::{self, Repository};
use crate::models::sync_conflict::Resolution;
use crate::models::sync_log::{self, LogStatus, SyncLogEntry, SyncLogRecord};
use crate::models::ConflictView;
use crate::services::comment_sync::{CommentSync, CommentSyncResult};
use crate::services::conflict_resolver::{ConflictResolver, ResolvedState};
use crate::services::content_importer::{ContentImporter, ImportSummary};
use crate::services::content_source::ContentSource;
use crate::services::feature_sync::{FeatureSyncEngine, SyncOutcome};
use crate::services::target_locks::{TargetGuard, TargetKey, TargetLocks};
use crate::services::tracker::WorkItemTracker;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result of running one target.
#[derive(Debug)]
pub enum TargetRun<T> {
    Completed(T),
    /// Another sync held the target's lock.
    Skipped,
    Failed(AppError),
}

/// A per-target failure collected during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetFailure {
    pub target: String,
    pub stage: String,
    pub message: String,
}

/// Aggregate of a manual comment sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ManualSyncSummary {
    /// Features whose comments were actually synced.
    pub features: usize,
    pub synced: usize,
    pub skipped: usize,
    pub failures: Vec<TargetFailure>,
}

/// What one scheduler tick did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickReport {
    pub repositories_processed: usize,
    pub features_processed: usize,
    pub targets_skipped: usize,
    pub failures: Vec<TargetFailure>,
    /// The tick stopped early because cancellation was requested.
    pub cancelled: bool,
}

/// Outcome of syncing one feature during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureRunResult {
    pub outcome: SyncOutcome,
    pub comments: Option<CommentSyncResult>,
}

/// The sync engine's services wired to one store, tracker and content source.
#[derive(Clone)]
pub struct SyncService {
    pool: DbPool,
    locks: TargetLocks,
    importer: ContentImporter,
    engine: FeatureSyncEngine,
    comments: CommentSync,
    resolver: ConflictResolver,
}

impl SyncService {
    pub fn new(
        pool: DbPool,
        tracker: Arc<dyn WorkItemTracker>,
        source: Arc<dyn ContentSource>,
    ) -> Self {
        let locks = TargetLocks::new();
        let engine = FeatureSyncEngine::new(pool.clone(), Arc::clone(&tracker));

        Self {
            importer: ContentImporter::new(pool.clone(), source),
            comments: CommentSync::new(pool.clone(), tracker),
            resolver: ConflictResolver::new(pool.clone(), engine.clone(), locks.clone()),
            engine,
            locks,
            pool,
        }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn locks(&self) -> &TargetLocks {
        &self.locks
    }

    fn busy(key: TargetKey) -> AppError {
        AppError::sync_in_progress(key.to_string())
    }

    async fn record(
        &self,
        operation: &str,
        key: TargetKey,
        status: LogStatus,
        message: Option<String>,
        started: Option<Instant>,
    ) {
        let kind = key.kind.to_string();
        let record = SyncLogRecord {
            operation,
            status,
            target_kind: Some(&kind),
            target_id: Some(key.id),
            message,
            duration_ms: started.map(|s| s.elapsed().as_millis() as i64),
        };

        if let Err(e) = sync_log::log_sync_operation(&self.pool, record).await {
            log::warn!("[sync] Failed to write sync log for {}: {}", key, e);
        }
    }

    // Per-target primitives

    async fn import_with_guard(&self, repo: &Repository, _guard: TargetGuard) -> TargetRun<ImportSummary> {
        let key = TargetKey::repository(repo.id);
        let started = Instant::now();

        match self.importer.import(repo).await {
            Ok(summary) => {
                let status = if summary.failed.is_empty() {
                    LogStatus::Success
                } else {
                    LogStatus::Error
                };
                let message = format!(
                    "scanned {}, upserted {}, unchanged {}, failed {}",
                    summary.scanned,
                    summary.upserted,
                    summary.unchanged,
                    summary.failed.len()
                );
                self.record("import_repository", key, status, Some(message), Some(started))
                    .await;
                TargetRun::Completed(summary)
            }
            Err(e) => {
                log::error!("[import] Repository {} ({}) failed: {}", repo.id, repo.name, e);
                self.record("import_repository", key, LogStatus::Error, Some(e.to_string()), Some(started))
                    .await;
                TargetRun::Failed(e)
            }
        }
    }

    /// Import a repository under its lock.
    pub async fn import_repository_locked(&self, repo: &Repository) -> TargetRun<ImportSummary> {
        let key = TargetKey::repository(repo.id);
        let Some(guard) = self.locks.try_acquire(key) else {
            log::info!("[import] Repository {}: sync already in progress, skipping", repo.id);
            self.record("import_repository", key, LogStatus::Skipped, Some("sync already in progress".into()), None)
                .await;
            return TargetRun::Skipped;
        };

        self.import_with_guard(repo, guard).await
    }

    /// Two-way sync plus comment import for a feature, under one lock.
    pub async fn sync_feature_locked(&self, feature: &FeatureRequest) -> TargetRun<FeatureRunResult> {
        let key = TargetKey::feature(feature.id);
        let Some(_guard) = self.locks.try_acquire(key) else {
            log::info!("[feature-sync] Feature {}: sync already in progress, skipping", feature.id);
            self.record("feature_sync", key, LogStatus::Skipped, Some("sync already in progress".into()), None)
                .await;
            return TargetRun::Skipped;
        };
        let started = Instant::now();

        // Re-read under the lock; the listing may be stale
        let feature = match feature_request::require_feature_request(&self.pool, feature.id).await {
            Ok(feature) => feature,
            Err(e) => return TargetRun::Failed(e),
        };

        let outcome = match self.engine.sync_feature(&feature).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("[feature-sync] Feature {} failed at reconcile: {}", feature.id, e);
                self.record("feature_sync", key, LogStatus::Error, Some(e.to_string()), Some(started))
                    .await;
                return TargetRun::Failed(e);
            }
        };

        let current = match feature_request::require_feature_request(&self.pool, feature.id).await {
            Ok(current) => current,
            Err(e) => return TargetRun::Failed(e),
        };

        // A feature that just went into conflict or was archived waits too
        let comments = if current.is_syncable() || outcome == SyncOutcome::Created {
            match self.comments.sync_feature_comments(&current).await {
                Ok(result) => Some(result),
                Err(e) => {
                    log::error!("[comments] Feature {} failed at comment import: {}", feature.id, e);
                    self.record("comment_sync", key, LogStatus::Error, Some(e.to_string()), Some(started))
                        .await;
                    return TargetRun::Failed(e);
                }
            }
        } else {
            None
        };

        if outcome != SyncOutcome::Unchanged || comments.map(|c| c.synced > 0).unwrap_or(false) {
            let message = match comments {
                Some(c) => format!("{}; {} new comments", outcome, c.synced),
                None => outcome.to_string(),
            };
            self.record("feature_sync", key, LogStatus::Success, Some(message), Some(started))
                .await;
        }

        TargetRun::Completed(FeatureRunResult { outcome, comments })
    }

    // Operations

    /// Start a repository import in the background.
    ///
    /// Unknown ids fail with `NotFound`; a repository already being
    /// imported fails with `SyncInProgress`.
    pub async fn sync_repository(&self, repository_id: i64) -> Result<(), AppError> {
        let repo = repository::get_repository(&self.pool, repository_id)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("Repository", repository_id))?;

        let key = TargetKey::repository(repo.id);
        let guard = self.locks.try_acquire(key).ok_or_else(|| Self::busy(key))?;

        let service = self.clone();
        tokio::spawn(async move {
            service.import_with_guard(&repo, guard).await;
        });

        Ok(())
    }

    /// Import new comments for one feature.
    pub async fn sync_external_comments(&self, feature_id: i64) -> Result<CommentSyncResult, AppError> {
        let feature = feature_request::require_feature_request(&self.pool, feature_id).await?;
        let key = TargetKey::feature(feature.id);
        let _guard = self.locks.try_acquire(key).ok_or_else(|| Self::busy(key))?;

        let started = Instant::now();
        let result = self.comments.sync_feature_comments(&feature).await;
        match &result {
            Ok(r) => {
                self.record(
                    "comment_sync",
                    key,
                    LogStatus::Success,
                    Some(format!("synced {}, skipped {}", r.synced, r.skipped)),
                    Some(started),
                )
                .await
            }
            Err(e) => {
                self.record("comment_sync", key, LogStatus::Error, Some(e.to_string()), Some(started))
                    .await
            }
        }
        result
    }

    /// Import comments for every syncable feature.
    ///
    /// Busy features are skipped and not counted; a failing feature is
    /// listed in `failures` and the run continues.
    pub async fn trigger_manual_sync(&self) -> Result<ManualSyncSummary, AppError> {
        let features = feature_request::list_syncable(&self.pool).await?;
        let mut summary = ManualSyncSummary::default();

        for feature in features {
            let key = TargetKey::feature(feature.id);
            let Some(_guard) = self.locks.try_acquire(key) else {
                log::info!("[comments] Feature {}: sync already in progress, skipping", feature.id);
                continue;
            };

            match self.comments.sync_feature_comments(&feature).await {
                Ok(result) => {
                    summary.features += 1;
                    summary.synced += result.synced;
                    summary.skipped += result.skipped;
                }
                Err(e) => {
                    log::warn!("[comments] Feature {} failed during manual sync: {}", feature.id, e);
                    self.record("comment_sync", key, LogStatus::Error, Some(e.to_string()), None)
                        .await;
                    summary.failures.push(TargetFailure {
                        target: key.to_string(),
                        stage: "comments".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        log::info!(
            "[comments] Manual sync: {} features, {} new comments, {} already present, {} failed",
            summary.features,
            summary.synced,
            summary.skipped,
            summary.failures.len()
        );

        Ok(summary)
    }

    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
    ) -> Result<ResolvedState, AppError> {
        let state = self.resolver.resolve_conflict(conflict_id, resolution).await?;
        self.record(
            "resolve_conflict",
            TargetKey::feature(state.feature_id),
            LogStatus::Success,
            Some(format!("conflict {} resolved with {}", conflict_id, resolution)),
            None,
        )
        .await;
        Ok(state)
    }

    pub async fn list_open_conflicts(&self) -> Result<Vec<ConflictView>, AppError> {
        self.resolver.list_open_conflicts().await
    }

    pub async fn recent_sync_log(&self, limit: i64) -> Result<Vec<SyncLogEntry>, AppError> {
        sync_log::recent_sync_log(&self.pool, limit).await
    }

    /// One pass over every eligible target.
    ///
    /// `cancel` is checked between targets; the target in flight always
    /// finishes.
    pub async fn run_tick(&self, cancel: &CancellationToken) -> Result<TickReport, AppError> {
        let mut report = TickReport::default();

        for repo in repository::list_active_repositories(&self.pool).await? {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }

            match self.import_repository_locked(&repo).await {
                TargetRun::Completed(_) => report.repositories_processed += 1,
                TargetRun::Skipped => report.targets_skipped += 1,
                TargetRun::Failed(e) => {
                    report.repositories_processed += 1;
                    report.failures.push(TargetFailure {
                        target: TargetKey::repository(repo.id).to_string(),
                        stage: "import".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        let pending = feature_request::list_pending_first_push(&self.pool).await?;
        let syncable = feature_request::list_syncable(&self.pool).await?;

        for feature in pending.iter().chain(syncable.iter()) {
            if cancel.is_cancelled() {
                report.cancelled = true;
                return Ok(report);
            }

            match self.sync_feature_locked(feature).await {
                TargetRun::Completed(_) => report.features_processed += 1,
                TargetRun::Skipped => report.targets_skipped += 1,
                TargetRun::Failed(e) => {
                    report.features_processed += 1;
                    report.failures.push(TargetFailure {
                        target: TargetKey::feature(feature.id).to_string(),
                        stage: "feature-sync".to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(report)
    }
}
