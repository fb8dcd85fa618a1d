//! Conflicts between local and tracker state of a feature request.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::feature_request::FeatureFields;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Operator choice for closing a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Resolution {
    KeepLocal,
    KeepExternal,
    Merge,
}

impl Resolution {
    /// Whether the resolved state is written back to the tracker.
    pub fn pushes(&self) -> bool {
        !matches!(self, Self::KeepExternal)
    }
}

impl FromStr for Resolution {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "keep-local" => Ok(Self::KeepLocal),
            "keep-external" => Ok(Self::KeepExternal),
            "merge" => Ok(Self::Merge),
            other => Err(AppError::validation_field(
                format!("Invalid resolution '{}': expected keep-local, keep-external or merge", other),
                "resolution",
            )),
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::KeepLocal => write!(f, "keep-local"),
            Self::KeepExternal => write!(f, "keep-external"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// One side of a conflict as captured at detection time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSnapshot {
    #[serde(flatten)]
    pub fields: FeatureFields,

    /// Whole-record modification time (Unix ms).
    pub updated_at: Option<i64>,

    /// Per-field modification times, when the side tracks them.
    #[serde(default)]
    pub field_timestamps: BTreeMap<String, i64>,
}

/// Conflict row. Snapshots are stored as JSON text.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SyncConflict {
    pub id: i64,
    pub feature_id: i64,
    pub local_snapshot: String,
    pub external_snapshot: String,
    pub detected_at: i64,
    pub resolved_at: Option<i64>,
    pub resolution: Option<String>,
}

impl SyncConflict {
    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn local(&self) -> Result<FeatureSnapshot, AppError> {
        Ok(serde_json::from_str(&self.local_snapshot)?)
    }

    pub fn external(&self) -> Result<FeatureSnapshot, AppError> {
        Ok(serde_json::from_str(&self.external_snapshot)?)
    }
}

/// Operator-facing view with decoded snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictView {
    pub id: i64,
    pub feature_id: i64,
    pub local: FeatureSnapshot,
    pub external: FeatureSnapshot,
    pub detected_at: i64,
}

impl TryFrom<&SyncConflict> for ConflictView {
    type Error = AppError;

    fn try_from(conflict: &SyncConflict) -> Result<Self, Self::Error> {
        Ok(Self {
            id: conflict.id,
            feature_id: conflict.feature_id,
            local: conflict.local()?,
            external: conflict.external()?,
            detected_at: conflict.detected_at,
        })
    }
}

const CONFLICT_COLUMNS: &str =
    "id, feature_id, local_snapshot, external_snapshot, detected_at, resolved_at, resolution";

/// Record a new conflict and flip the feature into the `conflict` state.
///
/// Both writes commit together. A second open conflict for the same feature
/// hits the partial unique index and fails with `ConflictAlreadyOpen`.
pub async fn open_conflict(
    pool: &DbPool,
    feature_id: i64,
    local: &FeatureSnapshot,
    external: &FeatureSnapshot,
    detected_at: i64,
) -> Result<SyncConflict, AppError> {
    let mut tx = pool.begin().await?;

    let query = format!(
        r#"
        INSERT INTO sync_conflicts (feature_id, local_snapshot, external_snapshot, detected_at)
        VALUES (?, ?, ?, ?)
        RETURNING {}
        "#,
        CONFLICT_COLUMNS
    );
    let inserted = sqlx::query_as::<_, SyncConflict>(&query)
        .bind(feature_id)
        .bind(serde_json::to_string(local)?)
        .bind(serde_json::to_string(external)?)
        .bind(detected_at)
        .fetch_one(&mut *tx)
        .await;

    let conflict = match inserted {
        Ok(conflict) => conflict,
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            return Err(AppError::ConflictAlreadyOpen { feature_id });
        }
        Err(e) => return Err(e.into()),
    };

    sqlx::query(
        "UPDATE feature_requests SET sync_state = 'conflict', external_updated_at = ? WHERE id = ?",
    )
    .bind(external.updated_at)
    .bind(feature_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(conflict)
}

/// Look up a conflict by id.
pub async fn get_conflict(pool: &DbPool, id: i64) -> Result<Option<SyncConflict>, AppError> {
    let query = format!("SELECT {} FROM sync_conflicts WHERE id = ?", CONFLICT_COLUMNS);
    let conflict = sqlx::query_as::<_, SyncConflict>(&query)
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(conflict)
}

/// The open conflict for a feature, if any.
pub async fn get_open_conflict_for_feature(
    pool: &DbPool,
    feature_id: i64,
) -> Result<Option<SyncConflict>, AppError> {
    let query = format!(
        "SELECT {} FROM sync_conflicts WHERE feature_id = ? AND resolved_at IS NULL",
        CONFLICT_COLUMNS
    );
    let conflict = sqlx::query_as::<_, SyncConflict>(&query)
        .bind(feature_id)
        .fetch_optional(pool)
        .await?;

    Ok(conflict)
}

/// All open conflicts, oldest first.
pub async fn list_open_conflicts(pool: &DbPool) -> Result<Vec<SyncConflict>, AppError> {
    let query = format!(
        "SELECT {} FROM sync_conflicts WHERE resolved_at IS NULL ORDER BY detected_at, id",
        CONFLICT_COLUMNS
    );
    let conflicts = sqlx::query_as::<_, SyncConflict>(&query)
        .fetch_all(pool)
        .await?;

    Ok(conflicts)
}

/// Close a conflict and write the resolved state onto its feature.
///
/// The close is guarded by `resolved_at IS NULL`; if another resolution got
/// there first nothing is written and `ConflictAlreadyResolved` is returned.
pub async fn close_conflict(
    pool: &DbPool,
    conflict: &SyncConflict,
    resolution: Resolution,
    fields: &FeatureFields,
    external_updated_at: Option<i64>,
    synced_at: i64,
) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;

    let closed = sqlx::query(
        "UPDATE sync_conflicts SET resolved_at = ?, resolution = ? WHERE id = ? AND resolved_at IS NULL",
    )
    .bind(synced_at)
    .bind(resolution.to_string())
    .bind(conflict.id)
    .execute(&mut *tx)
    .await?;

    if closed.rows_affected() == 0 {
        tx.rollback().await?;
        return Err(AppError::ConflictAlreadyResolved {
            conflict_id: conflict.id,
        });
    }

    sqlx::query(
        r#"
        UPDATE feature_requests SET
            title = ?, description = ?, status = ?, priority = ?,
            external_updated_at = COALESCE(?, external_updated_at),
            last_synced_at = ?, sync_state = 'synced'
        WHERE id = ?
        "#,
    )
    .bind(&fields.title)
    .bind(&fields.description)
    .bind(&fields.status)
    .bind(&fields.priority)
    .bind(external_updated_at)
    .bind(synced_at)
    .bind(conflict.feature_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::feature_request::{create_feature_request, require_feature_request, SyncState};
    use tempfile::tempdir;

    fn snapshot(title: &str, updated_at: i64) -> FeatureSnapshot {
        FeatureSnapshot {
            fields: FeatureFields {
                title: title.to_string(),
                description: "d".to_string(),
                status: "open".to_string(),
                priority: "high".to_string(),
            },
            updated_at: Some(updated_at),
            field_timestamps: BTreeMap::new(),
        }
    }

    #[test]
    fn test_resolution_from_str() {
        assert_eq!("keep-local".parse::<Resolution>().unwrap(), Resolution::KeepLocal);
        assert_eq!("keep-external".parse::<Resolution>().unwrap(), Resolution::KeepExternal);
        assert_eq!("merge".parse::<Resolution>().unwrap(), Resolution::Merge);

        let err = "keep_local".parse::<Resolution>().unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[test]
    fn test_snapshot_json_is_flat() {
        let json = serde_json::to_value(snapshot("A", 5)).unwrap();
        assert_eq!(json["title"], "A");
        assert_eq!(json["updatedAt"], 5);
    }

    #[tokio::test]
    async fn test_open_then_close_once() {
        let dir = tempdir().unwrap();
        let pool = db::initialize(&dir.path().join("test.db")).await.unwrap();
        let local = snapshot("Local", 10);
        let feature = create_feature_request(&pool, &local.fields, 10).await.unwrap();

        let conflict = open_conflict(&pool, feature.id, &local, &snapshot("Remote", 11), 12)
            .await
            .unwrap();
        let stored = require_feature_request(&pool, feature.id).await.unwrap();
        assert_eq!(stored.sync_state_enum(), SyncState::Conflict);

        let again = open_conflict(&pool, feature.id, &local, &snapshot("Remote", 11), 13).await;
        assert!(matches!(again, Err(AppError::ConflictAlreadyOpen { .. })));

        close_conflict(&pool, &conflict, Resolution::KeepExternal, &snapshot("Remote", 11).fields, None, 20)
            .await
            .unwrap();
        let stored = require_feature_request(&pool, feature.id).await.unwrap();
        assert_eq!(stored.title, "Remote");
        assert_eq!(stored.last_synced_at, Some(20));
        assert_eq!(stored.sync_state_enum(), SyncState::Synced);

        let second = close_conflict(&pool, &conflict, Resolution::KeepLocal, &local.fields, None, 30).await;
        assert!(matches!(second, Err(AppError::ConflictAlreadyResolved { .. })));
        let stored = require_feature_request(&pool, feature.id).await.unwrap();
        assert_eq!(stored.title, "Remote");

        assert!(list_open_conflicts(&pool).await.unwrap().is_empty());
    }
}
