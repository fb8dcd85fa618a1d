//! Operator resolution of feature sync conflicts.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::feature_request::{self, FeatureFields};
use crate::models::sync_conflict::{self, ConflictView, FeatureSnapshot, Resolution};
use crate::services::feature_sync::FeatureSyncEngine;
use crate::services::target_locks::{TargetKey, TargetLocks};
use serde::Serialize;
use std::collections::BTreeMap;

/// Which snapshot a resolved field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    External,
}

/// The state a resolution settles on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedState {
    pub feature_id: i64,
    pub resolution: Resolution,
    pub fields: FeatureFields,
    pub field_sources: BTreeMap<String, Side>,
}

impl ResolvedState {
    /// Compute the resolved fields from both snapshots.
    pub fn new(
        feature_id: i64,
        resolution: Resolution,
        local: &FeatureSnapshot,
        external: &FeatureSnapshot,
    ) -> Self {
        let whole = |side: Side, snapshot: &FeatureSnapshot| Self {
            feature_id,
            resolution,
            fields: snapshot.fields.clone(),
            field_sources: FeatureFields::NAMES
                .iter()
                .map(|name| (name.to_string(), side))
                .collect(),
        };

        match resolution {
            Resolution::KeepLocal => whole(Side::Local, local),
            Resolution::KeepExternal => whole(Side::External, external),
            Resolution::Merge => Self::merge(feature_id, local, external),
        }
    }

    /// Field-by-field merge.
    ///
    /// Equal values are kept. Otherwise the later per-field timestamp wins
    /// when both sides have one (ties go to local), and local wins when
    /// either side lacks one. The tracker side is only stamped for fields
    /// that changed there alone.
    fn merge(feature_id: i64, local: &FeatureSnapshot, external: &FeatureSnapshot) -> Self {
        let mut fields = local.fields.clone();
        let mut field_sources = BTreeMap::new();

        for name in FeatureFields::NAMES {
            let local_value = local.fields.get(name).unwrap_or_default();
            let external_value = external.fields.get(name).unwrap_or_default();

            let side = if local_value == external_value {
                Side::Local
            } else {
                match (
                    local.field_timestamps.get(name),
                    external.field_timestamps.get(name),
                ) {
                    (Some(local_ts), Some(external_ts)) if external_ts > local_ts => Side::External,
                    _ => Side::Local,
                }
            };

            if side == Side::External {
                fields.set(name, external_value.to_string());
            }
            field_sources.insert(name.to_string(), side);
        }

        Self {
            feature_id,
            resolution: Resolution::Merge,
            fields,
            field_sources,
        }
    }
}

/// Applies operator resolutions.
#[derive(Clone)]
pub struct ConflictResolver {
    pool: DbPool,
    engine: FeatureSyncEngine,
    locks: TargetLocks,
}

impl ConflictResolver {
    pub fn new(pool: DbPool, engine: FeatureSyncEngine, locks: TargetLocks) -> Self {
        Self { pool, engine, locks }
    }

    /// Resolve an open conflict.
    ///
    /// Fails with `NotFound` for an unknown id, `ConflictAlreadyResolved`
    /// for a closed one (nothing is written), and `SyncInProgress` while the
    /// feature is being synced.
    pub async fn resolve_conflict(
        &self,
        conflict_id: i64,
        resolution: Resolution,
    ) -> Result<ResolvedState, AppError> {
        let conflict = sync_conflict::get_conflict(&self.pool, conflict_id)
            .await?
            .ok_or_else(|| AppError::not_found_with_id("SyncConflict", conflict_id))?;

        if !conflict.is_open() {
            return Err(AppError::ConflictAlreadyResolved { conflict_id });
        }

        let key = TargetKey::feature(conflict.feature_id);
        let _guard = self
            .locks
            .try_acquire(key)
            .ok_or_else(|| AppError::sync_in_progress(key.to_string()))?;

        let feature = feature_request::require_feature_request(&self.pool, conflict.feature_id).await?;
        let state = ResolvedState::new(
            feature.id,
            resolution,
            &conflict.local()?,
            &conflict.external()?,
        );

        self.engine
            .apply_resolved_state(&conflict, &feature, resolution, &state.fields)
            .await?;

        log::info!(
            "[feature-sync] Conflict {} on feature {} resolved with {}",
            conflict_id,
            conflict.feature_id,
            resolution
        );

        Ok(state)
    }

    /// Open conflicts with decoded snapshots, oldest first.
    pub async fn list_open_conflicts(&self) -> Result<Vec<ConflictView>, AppError> {
        sync_conflict::list_open_conflicts(&self.pool)
            .await?
            .iter()
            .map(ConflictView::try_from)
            .collect()
    }
}
