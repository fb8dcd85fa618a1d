//! Business logic services.
//!
//! Everything here works against the `WorkItemTracker` and `ContentSource`
//! traits, so the engine runs the same against GitLab or in-memory fakes.

pub mod comment_sync;
pub mod conflict_resolver;
pub mod content_importer;
pub mod content_source;
pub mod control_api;
pub mod control_auth;
pub mod control_server;
pub mod feature_sync;
pub mod frontmatter;
pub mod gitlab_client;
pub mod retry;
pub mod sync_service;
pub mod target_locks;
pub mod tracker;
pub mod worker;

pub use content_source::{ContentSource, GitLabContentSource, LocalContentSource, RepositorySources};
pub use gitlab_client::GitLabClient;
pub use sync_service::SyncService;
pub use tracker::{GitLabTracker, WorkItem, WorkItemTracker};
pub use worker::{SyncWorker, WorkerConfig, WorkerRun, WorkerState};
