//! Bearer-token authentication for the control API.
//!
//! Every `/api/*` route except health requires
//! `Authorization: Bearer <api_token>`. The token is a static secret from
//! configuration; there are no sessions.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// The configured API token, shared with the middleware.
#[derive(Clone)]
pub struct ApiToken(Arc<str>);

impl ApiToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    /// Compare a presented token without short-circuiting on the first
    /// differing byte.
    pub fn matches(&self, presented: &str) -> bool {
        let expected = Sha256::digest(self.0.as_bytes());
        let actual = Sha256::digest(presented.as_bytes());
        expected
            .iter()
            .zip(actual.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for ApiToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiToken(..)")
    }
}

#[derive(Serialize)]
struct AuthError {
    code: String,
    message: String,
}

/// Pull the token out of an `Authorization: Bearer` header.
fn bearer_token(request: &Request<Body>) -> Option<&str> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Reject requests without a valid bearer token.
pub async fn auth_middleware(
    State(token): State<ApiToken>,
    request: Request<Body>,
    next: Next,
) -> Response {
    match bearer_token(&request) {
        Some(presented) if token.matches(presented) => next.run(request).await,
        _ => {
            log::debug!("[control] Rejected unauthenticated {} {}", request.method(), request.uri().path());
            let error = AuthError {
                code: "UNAUTHORIZED".to_string(),
                message: "Missing or invalid API token".to_string(),
            };
            (StatusCode::UNAUTHORIZED, Json(error)).into_response()
        }
    }
}
