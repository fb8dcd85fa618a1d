//! REST routes of the control API.
//!
//! Thin handlers over [`SyncWorker`] and [`SyncService`]; every failure is an
//! [`AppError`] rendered as `{"code", "message"}` with a matching status.
//!
//! [`SyncService`]: crate::services::sync_service::SyncService

use crate::error::AppError;
use crate::models::sync_conflict::Resolution;
use crate::models::sync_log::MAX_LOG_ENTRIES;
use crate::models::{ConflictView, SyncLogEntry};
use crate::services::comment_sync::CommentSyncResult;
use crate::services::control_server::ControlState;
use crate::services::sync_service::ManualSyncSummary;
use crate::services::worker::{WorkerRun, WorkerState};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

/// Page size of `GET /api/sync/log` when no limit is given.
const DEFAULT_LOG_LIMIT: i64 = 50;

// ── Error handling ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

/// Wrapper to make AppError usable as an axum error response.
pub struct ApiErr(pub AppError);

impl ApiErr {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::Validation { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::ConflictAlreadyResolved { .. } => (StatusCode::CONFLICT, "CONFLICT_ALREADY_RESOLVED"),
            AppError::ConflictAlreadyOpen { .. } => (StatusCode::CONFLICT, "CONFLICT_ALREADY_OPEN"),
            AppError::SyncInProgress { .. } => (StatusCode::CONFLICT, "SYNC_IN_PROGRESS"),
            e if e.is_transient() => (StatusCode::SERVICE_UNAVAILABLE, "TRACKER_UNAVAILABLE"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            log::warn!("[control] Request failed: {}", self.0);
        }
        (
            status,
            Json(ApiError {
                code: code.to_string(),
                message: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

impl From<AppError> for ApiErr {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiErr {
    fn from(rejection: JsonRejection) -> Self {
        Self(AppError::validation(rejection.body_text()))
    }
}

// ── Request and response bodies ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct WorkerStatusResponse {
    pub status: WorkerState,
}

impl From<WorkerRun> for WorkerStatusResponse {
    fn from(run: WorkerRun) -> Self {
        Self { status: run.status }
    }
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolution: String,
}

#[derive(Debug, Deserialize)]
struct SyncLogQuery {
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

// ── Route builders ───────────────────────────────────────────────────────────

/// Routes that require the API token. The auth layer is applied in
/// control_server.rs.
pub fn control_api_routes() -> Router<ControlState> {
    Router::new()
        // Worker
        .route("/api/worker/start", post(start_worker_handler))
        .route("/api/worker/stop", post(stop_worker_handler))
        .route("/api/worker/status", get(worker_status_handler))
        // Targets
        .route("/api/repositories/{id}/sync", post(sync_repository_handler))
        .route(
            "/api/features/{id}/comments/sync",
            post(sync_comments_handler),
        )
        .route("/api/sync/manual", post(manual_sync_handler))
        .route("/api/sync/log", get(sync_log_handler))
        // Conflicts
        .route("/api/conflicts", get(list_conflicts_handler))
        .route("/api/conflicts/{id}/resolve", post(resolve_conflict_handler))
}

/// Unauthenticated liveness route.
pub fn health_routes() -> Router<ControlState> {
    Router::new().route("/api/health", get(health_handler))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// POST /api/worker/start
async fn start_worker_handler(State(state): State<ControlState>) -> Json<WorkerStatusResponse> {
    Json(state.worker.start().into())
}

/// POST /api/worker/stop
async fn stop_worker_handler(State(state): State<ControlState>) -> Json<WorkerStatusResponse> {
    Json(state.worker.stop().into())
}

/// GET /api/worker/status
async fn worker_status_handler(State(state): State<ControlState>) -> Json<WorkerRun> {
    Json(state.worker.status())
}

/// POST /api/repositories/:id/sync: accepted, runs in the background.
async fn sync_repository_handler(
    State(state): State<ControlState>,
    Path(repository_id): Path<i64>,
) -> Result<StatusCode, ApiErr> {
    state.worker.service().sync_repository(repository_id).await?;
    Ok(StatusCode::ACCEPTED)
}

/// POST /api/features/:id/comments/sync
async fn sync_comments_handler(
    State(state): State<ControlState>,
    Path(feature_id): Path<i64>,
) -> Result<Json<CommentSyncResult>, ApiErr> {
    let result = state.worker.service().sync_external_comments(feature_id).await?;
    Ok(Json(result))
}

/// POST /api/sync/manual
async fn manual_sync_handler(
    State(state): State<ControlState>,
) -> Result<Json<ManualSyncSummary>, ApiErr> {
    let summary = state.worker.service().trigger_manual_sync().await?;
    Ok(Json(summary))
}

/// GET /api/sync/log?limit=N
async fn sync_log_handler(
    State(state): State<ControlState>,
    Query(query): Query<SyncLogQuery>,
) -> Result<Json<Vec<SyncLogEntry>>, ApiErr> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_ENTRIES);
    let entries = state.worker.service().recent_sync_log(limit).await?;
    Ok(Json(entries))
}

/// GET /api/conflicts
async fn list_conflicts_handler(
    State(state): State<ControlState>,
) -> Result<Json<Vec<ConflictView>>, ApiErr> {
    let conflicts = state.worker.service().list_open_conflicts().await?;
    Ok(Json(conflicts))
}

/// POST /api/conflicts/:id/resolve with `{"resolution": "keep-local"}`.
async fn resolve_conflict_handler(
    State(state): State<ControlState>,
    Path(conflict_id): Path<i64>,
    body: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<StatusCode, ApiErr> {
    let Json(request) = body?;
    let resolution: Resolution = request.resolution.parse()?;

    state
        .worker
        .service()
        .resolve_conflict(conflict_id, resolution)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (AppError::validation("bad"), StatusCode::BAD_REQUEST),
            (AppError::not_found_with_id("SyncConflict", 4), StatusCode::NOT_FOUND),
            (AppError::ConflictAlreadyResolved { conflict_id: 4 }, StatusCode::CONFLICT),
            (AppError::ConflictAlreadyOpen { feature_id: 2 }, StatusCode::CONFLICT),
            (AppError::sync_in_progress("feature:2"), StatusCode::CONFLICT),
            (AppError::network("reset"), StatusCode::SERVICE_UNAVAILABLE),
            (AppError::timeout("get_work_item", 30), StatusCode::SERVICE_UNAVAILABLE),
            (
                AppError::tracker_api_full("Bad gateway", 502, "/issues/1"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                AppError::tracker_api_full("Forbidden", 403, "/issues/1"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (AppError::database("locked"), StatusCode::INTERNAL_SERVER_ERROR),
        ];

        for (err, expected) in cases {
            let label = err.to_string();
            assert_eq!(ApiErr(err).status_and_code().0, expected, "{}", label);
        }
    }

    #[test]
    fn test_worker_status_response_shape() {
        let json = serde_json::to_value(WorkerStatusResponse::from(WorkerRun::default())).unwrap();
        assert_eq!(json, serde_json::json!({ "status": "idle" }));
    }
}
