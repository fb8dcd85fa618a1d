//! One-way import of tracker comments.

use crate::db::pool::DbPool;
use crate::error::AppError;
use crate::models::comment;
use crate::models::feature_request::{self, FeatureRequest};
use crate::services::tracker::WorkItemTracker;
use crate::time::now_millis;
use serde::Serialize;
use std::sync::Arc;

/// Counts from one comment import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommentSyncResult {
    /// Newly inserted comments.
    pub synced: usize,
    /// Comments that were already imported.
    pub skipped: usize,
}

/// Imports comments for feature requests.
#[derive(Clone)]
pub struct CommentSync {
    pool: DbPool,
    tracker: Arc<dyn WorkItemTracker>,
}

impl CommentSync {
    pub fn new(pool: DbPool, tracker: Arc<dyn WorkItemTracker>) -> Self {
        Self { pool, tracker }
    }

    /// Import new comments for a feature by id.
    pub async fn sync_comments(&self, feature_id: i64) -> Result<CommentSyncResult, AppError> {
        let feature = feature_request::require_feature_request(&self.pool, feature_id).await?;
        self.sync_feature_comments(&feature).await
    }

    /// Import new comments for a loaded feature.
    ///
    /// Rows are keyed on (feature, external comment id), so repeating the
    /// import only ever counts skips.
    pub async fn sync_feature_comments(
        &self,
        feature: &FeatureRequest,
    ) -> Result<CommentSyncResult, AppError> {
        let external_id = feature.external_id.as_deref().ok_or_else(|| {
            AppError::validation_field(
                format!("Feature {} has no tracker work item yet", feature.id),
                "external_id",
            )
        })?;

        let comments = self.tracker.list_comments(external_id).await?;
        let imported_at = now_millis();
        let mut result = CommentSyncResult::default();

        for external in &comments {
            if comment::insert_imported(&self.pool, feature.id, external, imported_at).await? {
                result.synced += 1;
            } else {
                result.skipped += 1;
            }
        }

        if result.synced > 0 {
            log::info!(
                "[comments] Feature {}: imported {} new comments ({} already present)",
                feature.id,
                result.synced,
                result.skipped
            );
        }

        Ok(result)
    }
}
