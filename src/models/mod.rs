//! Data models for the local store.
//!
//! Rows derive `FromRow` for SQLx and `Serialize` for the control API.
//! Query functions live next to the model they read or write.

pub mod comment;
pub mod content;
pub mod feature_request;
pub mod repository;
pub mod sync_conflict;
pub mod sync_log;

// Re-exports for convenient access
pub use comment::{Comment, ExternalComment};
pub use content::{ContentEntry, ContentKind, ContentRecord};
pub use feature_request::{FeatureFields, FeaturePatch, FeatureRequest, SyncState};
pub use repository::{NewRepository, Repository, RepositorySyncStatus};
pub use sync_conflict::{ConflictView, FeatureSnapshot, Resolution, SyncConflict};
pub use sync_log::{LogStatus, SyncLogEntry, SyncLogRecord};
