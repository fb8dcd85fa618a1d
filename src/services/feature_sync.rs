//! Two-way reconciliation of feature requests with the tracker.
//!
//! A feature is compared against `last_synced_at`: if only the tracker
//! moved, its values are pulled; if only the local copy moved, it is
//! pushed; if both moved, a conflict is opened and the feature waits for an
//! operator. Equal timestamps count as "not moved".

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::feature_request::{self, FeatureFields, FeatureRequest, SyncState};
use crate::models::sync_conflict::{self, FeatureSnapshot, Resolution, SyncConflict};
use crate::services::tracker::{WorkItem, WorkItemTracker};
use crate::time::now_millis;
use serde::Serialize;
use std::sync::Arc;

/// What a sync pass did to one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    Unchanged,
    Pulled,
    Pushed,
    Created,
    Conflicted,
}

impl std::fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unchanged => write!(f, "unchanged"),
            Self::Pulled => write!(f, "pulled"),
            Self::Pushed => write!(f, "pushed"),
            Self::Created => write!(f, "created"),
            Self::Conflicted => write!(f, "conflicted"),
        }
    }
}

/// Snapshot of the local side for conflict bookkeeping.
fn local_snapshot(feature: &FeatureRequest) -> FeatureSnapshot {
    FeatureSnapshot {
        fields: feature.fields(),
        updated_at: Some(feature.local_updated_at),
        field_timestamps: feature.field_timestamps(),
    }
}

/// Snapshot of the tracker side.
///
/// The tracker only reports a whole-item `updated_at`. A field that differs
/// and was not edited locally since the last sync can only have changed on
/// the tracker, so it is stamped with that time. Fields edited locally get
/// no stamp because the tracker may not have touched them.
fn external_snapshot(feature: &FeatureRequest, item: &WorkItem) -> FeatureSnapshot {
    let last_synced = feature.last_synced_at.unwrap_or(i64::MIN);
    let local_stamps = feature.field_timestamps();
    let local_fields = feature.fields();

    let field_timestamps = FeatureFields::NAMES
        .iter()
        .filter(|name| local_fields.get(name) != item.fields.get(name))
        .filter(|name| local_stamps.get(**name).map_or(true, |ts| *ts <= last_synced))
        .map(|name| (name.to_string(), item.updated_at))
        .collect();

    FeatureSnapshot {
        fields: item.fields.clone(),
        updated_at: Some(item.updated_at),
        field_timestamps,
    }
}

/// Reconciles feature requests with the tracker.
#[derive(Clone)]
pub struct FeatureSyncEngine {
    pool: DbPool,
    tracker: Arc<dyn WorkItemTracker>,
}

impl FeatureSyncEngine {
    pub fn new(pool: DbPool, tracker: Arc<dyn WorkItemTracker>) -> Self {
        Self { pool, tracker }
    }

    /// Run one sync pass for a feature. The caller holds its target lock.
    pub async fn sync_feature(&self, feature: &FeatureRequest) -> Result<SyncOutcome, AppError> {
        if feature.is_archived {
            return Ok(SyncOutcome::Unchanged);
        }

        match (feature.sync_state_enum(), feature.external_id.as_deref()) {
            (SyncState::Conflict, _) => Ok(SyncOutcome::Unchanged),
            (_, None) => self.push_first(feature).await,
            (_, Some(external_id)) => self.reconcile(feature, external_id).await,
        }
    }

    /// Create the tracker work item for a feature that has none yet.
    pub async fn push_first(&self, feature: &FeatureRequest) -> Result<SyncOutcome, AppError> {
        if feature.external_id.is_some() {
            return Ok(SyncOutcome::Unchanged);
        }

        let fields = feature.fields();
        let external_id = self.tracker.create_work_item(&fields).await?;

        // The item exists now; record the id even if the re-read fails so
        // the next tick does not create a duplicate.
        let now = now_millis();
        let external_updated_at = match self.tracker.get_work_item(&external_id).await {
            Ok(item) => item.updated_at,
            Err(e) => {
                log::warn!(
                    "[feature-sync] Feature {}: re-read of new work item {} failed: {}",
                    feature.id,
                    external_id,
                    e
                );
                now
            }
        };

        let attached = feature_request::record_first_push(
            &self.pool,
            feature.id,
            &external_id,
            feature.local_updated_at,
            external_updated_at,
            now.max(external_updated_at),
        )
        .await?;

        if !attached {
            log::warn!(
                "[feature-sync] Feature {} already had a work item; created {} is orphaned",
                feature.id,
                external_id
            );
            return Ok(SyncOutcome::Unchanged);
        }

        log::info!("[feature-sync] Feature {} created as work item {}", feature.id, external_id);
        Ok(SyncOutcome::Created)
    }

    async fn reconcile(&self, feature: &FeatureRequest, external_id: &str) -> Result<SyncOutcome, AppError> {
        let item = self.tracker.get_work_item(external_id).await?;
        let last_synced = feature.last_synced_at.unwrap_or(i64::MIN);

        let external_changed = item.updated_at > last_synced;
        let local_changed = feature.local_updated_at > last_synced;

        match (local_changed, external_changed) {
            (false, false) => Ok(SyncOutcome::Unchanged),

            (false, true) => {
                let landed = feature_request::apply_pull(
                    &self.pool,
                    feature.id,
                    feature.local_updated_at,
                    &item.fields,
                    item.updated_at,
                    now_millis().max(item.updated_at),
                )
                .await?;

                if landed {
                    log::debug!("[feature-sync] Feature {} pulled from {}", feature.id, external_id);
                    Ok(SyncOutcome::Pulled)
                } else {
                    // Edited locally mid-pass; the next tick sees both sides changed
                    Ok(SyncOutcome::Unchanged)
                }
            }

            (true, false) => {
                let external_updated_at = self.push_fields(external_id, &feature.fields()).await?;
                feature_request::record_push(
                    &self.pool,
                    feature.id,
                    feature.local_updated_at,
                    external_updated_at,
                    now_millis().max(external_updated_at),
                )
                .await?;

                log::debug!("[feature-sync] Feature {} pushed to {}", feature.id, external_id);
                Ok(SyncOutcome::Pushed)
            }

            (true, true) => {
                let local = local_snapshot(feature);
                let external = external_snapshot(feature, &item);

                match sync_conflict::open_conflict(&self.pool, feature.id, &local, &external, now_millis())
                    .await
                {
                    Ok(conflict) => {
                        log::warn!(
                            "[feature-sync] Feature {} changed on both sides; conflict {} opened",
                            feature.id,
                            conflict.id
                        );
                    }
                    Err(AppError::ConflictAlreadyOpen { .. }) => {
                        feature_request::mark_conflict(&self.pool, feature.id).await?;
                    }
                    Err(e) => return Err(e),
                }

                Ok(SyncOutcome::Conflicted)
            }
        }
    }

    /// Push fields and re-read the item. Returns the tracker's new `updated_at`.
    async fn push_fields(&self, external_id: &str, fields: &FeatureFields) -> Result<i64, AppError> {
        self.tracker.update_work_item(external_id, fields).await?;
        let item = self.tracker.get_work_item(external_id).await?;
        Ok(item.updated_at)
    }

    /// Write an operator-chosen state for a conflicted feature and close the
    /// conflict.
    ///
    /// When `resolution` pushes, the fields go to the tracker first; the
    /// conflict close and the local write then commit together.
    pub async fn apply_resolved_state(
        &self,
        conflict: &SyncConflict,
        feature: &FeatureRequest,
        resolution: Resolution,
        fields: &FeatureFields,
    ) -> Result<(), AppError> {
        let now = now_millis();

        let (external_updated_at, synced_at) = match (resolution.pushes(), feature.external_id.as_deref()) {
            (true, Some(external_id)) => {
                let external_updated_at = self.push_fields(external_id, fields).await?;
                (Some(external_updated_at), now.max(external_updated_at))
            }
            _ => {
                // Keep the tracker's own time so its last edit is not seen again
                let external_updated_at = conflict.external()?.updated_at;
                (external_updated_at, now.max(external_updated_at.unwrap_or(now)))
            }
        };

        sync_conflict::close_conflict(
            &self.pool,
            conflict,
            resolution,
            fields,
            external_updated_at,
            synced_at,
        )
        .await
    }
}
