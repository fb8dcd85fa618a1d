//! Feature request model and its sync bookkeeping.

use crate::db::pool::DbPool;
use crate::error::AppError;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Two-way sync state of a feature request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Reconciled with the tracker as of `last_synced_at`.
    Synced,
    /// Not yet created on the tracker.
    Pending,
    /// Both sides changed; waiting for an operator resolution.
    Conflict,
}

impl From<&str> for SyncState {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "synced" => Self::Synced,
            "conflict" => Self::Conflict,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::Pending => write!(f, "pending"),
            Self::Conflict => write!(f, "conflict"),
        }
    }
}

/// The fields that travel between the local store and the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFields {
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
}

impl FeatureFields {
    /// Names of the synced fields, in a stable order.
    pub const NAMES: [&'static str; 4] = ["title", "description", "status", "priority"];

    /// Field value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        match name {
            "title" => Some(&self.title),
            "description" => Some(&self.description),
            "status" => Some(&self.status),
            "priority" => Some(&self.priority),
            _ => None,
        }
    }

    /// Set a field by name. Unknown names are ignored.
    pub fn set(&mut self, name: &str, value: String) {
        match name {
            "title" => self.title = value,
            "description" => self.description = value,
            "status" => self.status = value,
            "priority" => self.priority = value,
            _ => {}
        }
    }
}

/// Partial local edit. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeaturePatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
}

impl FeaturePatch {
    fn entries(&self) -> impl Iterator<Item = (&'static str, &String)> {
        [
            ("title", self.title.as_ref()),
            ("description", self.description.as_ref()),
            ("status", self.status.as_ref()),
            ("priority", self.priority.as_ref()),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
    }
}

/// Feature request row.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FeatureRequest {
    pub id: i64,

    /// Tracker work item id; `None` until the first push.
    pub external_id: Option<String>,

    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub is_archived: bool,
    pub is_pinned: bool,
    pub comments_locked: bool,

    /// Last local edit (Unix ms).
    pub local_updated_at: i64,

    /// Tracker `updated_at` as of the last fetch (Unix ms).
    pub external_updated_at: Option<i64>,

    /// Last clean reconciliation or applied resolution (Unix ms).
    pub last_synced_at: Option<i64>,

    /// `synced`, `pending` or `conflict`.
    pub sync_state: String,

    /// JSON map of field name to last local edit time (Unix ms).
    pub field_updated_at: String,

    pub created_at: i64,
}

impl FeatureRequest {
    /// Parse the sync state string into an enum.
    pub fn sync_state_enum(&self) -> SyncState {
        SyncState::from(self.sync_state.as_str())
    }

    /// The synced field values.
    pub fn fields(&self) -> FeatureFields {
        FeatureFields {
            title: self.title.clone(),
            description: self.description.clone(),
            status: self.status.clone(),
            priority: self.priority.clone(),
        }
    }

    /// Per-field local edit times. A malformed column reads as empty.
    pub fn field_timestamps(&self) -> BTreeMap<String, i64> {
        serde_json::from_str(&self.field_updated_at).unwrap_or_default()
    }

    /// Whether the tick should run two-way sync for this feature.
    pub fn is_syncable(&self) -> bool {
        self.external_id.is_some()
            && !self.is_archived
            && self.sync_state_enum() != SyncState::Conflict
    }
}

pub(crate) const FEATURE_COLUMNS: &str = "id, external_id, title, description, status, priority, is_archived, is_pinned, comments_locked, local_updated_at, external_updated_at, last_synced_at, sync_state, field_updated_at, created_at";

/// Create a local feature request. It starts `pending` until first pushed.
pub async fn create_feature_request(
    pool: &DbPool,
    fields: &FeatureFields,
    now: i64,
) -> Result<FeatureRequest, AppError> {
    if fields.title.trim().is_empty() {
        return Err(AppError::validation_field("Title is required", "title"));
    }

    let stamps: BTreeMap<&str, i64> = FeatureFields::NAMES.iter().map(|n| (*n, now)).collect();
    let query = format!(
        r#"
        INSERT INTO feature_requests (
            title, description, status, priority, local_updated_at, sync_state, field_updated_at, created_at
        ) VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
        RETURNING {}
        "#,
        FEATURE_COLUMNS
    );

    let feature = sqlx::query_as::<_, FeatureRequest>(&query)
        .bind(&fields.title)
        .bind(&fields.description)
        .bind(&fields.status)
        .bind(&fields.priority)
        .bind(now)
        .bind(serde_json::to_string(&stamps)?)
        .bind(now)
        .fetch_one(pool)
        .await?;

    Ok(feature)
}

/// Look up a feature request by id.
pub async fn get_feature_request(pool: &DbPool, id: i64) -> Result<Option<FeatureRequest>, AppError> {
    let query = format!("SELECT {} FROM feature_requests WHERE id = ?", FEATURE_COLUMNS);
    let feature = sqlx::query_as::<_, FeatureRequest>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(feature)
}

/// Look up a feature request by id, failing with NotFound.
pub async fn require_feature_request(pool: &DbPool, id: i64) -> Result<FeatureRequest, AppError> {
    get_feature_request(pool, id)
        .await?
        .ok_or_else(|| AppError::not_found_with_id("FeatureRequest", id))
}

/// Features under two-way sync: external id present, not archived, not in conflict.
pub async fn list_syncable(pool: &DbPool) -> Result<Vec<FeatureRequest>, AppError> {
    let query = format!(
        "SELECT {} FROM feature_requests
         WHERE external_id IS NOT NULL AND is_archived = 0 AND sync_state != 'conflict'
         ORDER BY id",
        FEATURE_COLUMNS
    );
    let features = sqlx::query_as::<_, FeatureRequest>(&query)
        .fetch_all(pool)
        .await?;

    Ok(features)
}

/// Features waiting for their first push to the tracker.
pub async fn list_pending_first_push(pool: &DbPool) -> Result<Vec<FeatureRequest>, AppError> {
    let query = format!(
        "SELECT {} FROM feature_requests
         WHERE external_id IS NULL AND is_archived = 0 AND sync_state = 'pending'
         ORDER BY id",
        FEATURE_COLUMNS
    );
    let features = sqlx::query_as::<_, FeatureRequest>(&query)
        .fetch_all(pool)
        .await?;

    Ok(features)
}

/// Apply a local edit: set the given fields and bump their timestamps.
///
/// This is the only path that advances `local_updated_at`, so the next tick
/// sees the feature as locally changed.
pub async fn update_local_fields(
    pool: &DbPool,
    id: i64,
    patch: &FeaturePatch,
    now: i64,
) -> Result<FeatureRequest, AppError> {
    let feature = require_feature_request(pool, id).await?;

    let mut fields = feature.fields();
    let mut stamps = feature.field_timestamps();
    let mut touched = false;
    for (name, value) in patch.entries() {
        if name == "title" && value.trim().is_empty() {
            return Err(AppError::validation_field("Title is required", "title"));
        }
        fields.set(name, value.clone());
        stamps.insert(name.to_string(), now);
        touched = true;
    }

    if !touched {
        return Ok(feature);
    }

    sqlx::query(
        r#"
        UPDATE feature_requests SET
            title = ?, description = ?, status = ?, priority = ?,
            local_updated_at = ?, field_updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&fields.title)
    .bind(&fields.description)
    .bind(&fields.status)
    .bind(&fields.priority)
    .bind(now)
    .bind(serde_json::to_string(&stamps)?)
    .bind(id)
    .execute(pool)
    .await?;

    require_feature_request(pool, id).await
}

/// Overwrite local fields with tracker values after a clean pull.
///
/// `local_updated_at` is left alone: pulled values are not local edits. The
/// write only lands if no local edit happened since `expected_local_updated_at`
/// was read; returns whether it landed.
pub async fn apply_pull(
    pool: &DbPool,
    id: i64,
    expected_local_updated_at: i64,
    fields: &FeatureFields,
    external_updated_at: i64,
    synced_at: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE feature_requests SET
            title = ?, description = ?, status = ?, priority = ?,
            external_updated_at = ?, last_synced_at = ?, sync_state = 'synced'
        WHERE id = ? AND local_updated_at = ? AND sync_state != 'conflict'
        "#,
    )
    .bind(&fields.title)
    .bind(&fields.description)
    .bind(&fields.status)
    .bind(&fields.priority)
    .bind(external_updated_at)
    .bind(synced_at)
    .bind(id)
    .bind(expected_local_updated_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Record a successful push of the fields read at `pushed_local_updated_at`.
///
/// If a local edit landed while the push was in flight, `last_synced_at`
/// falls back to the tracker's timestamp so the newer edit still counts as
/// unpushed on the next tick.
pub async fn record_push(
    pool: &DbPool,
    id: i64,
    pushed_local_updated_at: i64,
    external_updated_at: i64,
    synced_at: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE feature_requests SET
            external_updated_at = ?1,
            last_synced_at = CASE WHEN local_updated_at = ?2 THEN ?3 ELSE ?1 END,
            sync_state = 'synced'
        WHERE id = ?4
        "#,
    )
    .bind(external_updated_at)
    .bind(pushed_local_updated_at)
    .bind(synced_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record the first push: attach the tracker id and mark synced.
///
/// Guarded on `external_id IS NULL` so a racing duplicate create cannot
/// overwrite an id that is already attached.
pub async fn record_first_push(
    pool: &DbPool,
    id: i64,
    external_id: &str,
    pushed_local_updated_at: i64,
    external_updated_at: i64,
    synced_at: i64,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE feature_requests SET
            external_id = ?1,
            external_updated_at = ?2,
            last_synced_at = CASE WHEN local_updated_at = ?3 THEN ?4 ELSE ?2 END,
            sync_state = 'synced'
        WHERE id = ?5 AND external_id IS NULL
        "#,
    )
    .bind(external_id)
    .bind(external_updated_at)
    .bind(pushed_local_updated_at)
    .bind(synced_at)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Flip a feature into `conflict` without creating a conflict row.
///
/// Used when the open conflict already exists and only the state drifted.
pub async fn mark_conflict(pool: &DbPool, id: i64) -> Result<(), AppError> {
    sqlx::query("UPDATE feature_requests SET sync_state = 'conflict' WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
