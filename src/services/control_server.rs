//! HTTP server for the control API.
//!
//! Binds the axum router and serves it until the cancellation token fires.

use crate::error::AppError;
use crate::services::control_api::{control_api_routes, health_routes, ApiError};
use crate::services::control_auth::{auth_middleware, ApiToken};
use crate::services::worker::SyncWorker;
use axum::http::{StatusCode, Uri};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Shared state for the control API routes.
#[derive(Clone)]
pub struct ControlState {
    pub worker: SyncWorker,
}

/// Build the full router.
///
/// `/api/health` is open; every other route needs the bearer token.
pub fn build_router(state: ControlState, token: ApiToken) -> Router {
    let protected = control_api_routes()
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(token, auth_middleware));

    Router::new()
        .merge(health_routes().with_state(state))
        .merge(protected)
        .fallback(not_found_fallback)
}

async fn not_found_fallback(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError {
            code: "NOT_FOUND".to_string(),
            message: format!("No route for {}", uri.path()),
        }),
    )
        .into_response()
}

/// Bind `addr` and serve `router` until `cancel` fires.
pub async fn serve(addr: &str, router: Router, cancel: CancellationToken) -> Result<(), AppError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::config(format!("Failed to bind {}: {}", addr, e)))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| AppError::internal(e.to_string()))?;
    log::info!("[control] Listening on http://{}", local_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await
        .map_err(|e| AppError::internal(format!("Control server error: {}", e)))?;

    log::info!("[control] Server stopped");
    Ok(())
}
