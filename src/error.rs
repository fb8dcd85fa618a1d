//! Application error types.
//!
//! These errors are serializable so the control API can return a structured
//! reason for every failed operator action. Background tick failures never
//! leave the worker; they are logged and surfaced through the worker status.

use serde::Serialize;
use thiserror::Error;

/// Application-level errors shared by the sync engine and the control API.
///
/// All variants serialize to a structured JSON object (`type` + `details`).
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Input rejected before any work was done. Never retried.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Network request failed before a response arrived.
    #[error("Network error: {message}")]
    Network { message: String },

    /// The tracker asked us to slow down (HTTP 429).
    #[error("Rate limited by tracker")]
    RateLimited {
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_secs: Option<u64>,
    },

    /// Tracker or content API returned a non-success status.
    #[error("Tracker API error: {message}")]
    TrackerApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        endpoint: Option<String>,
    },

    /// An external call exceeded its per-call timeout.
    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// A feature already has an open conflict.
    #[error("Conflict already open for feature {feature_id}")]
    ConflictAlreadyOpen { feature_id: i64 },

    /// The conflict was resolved earlier.
    #[error("Conflict {conflict_id} is already resolved")]
    ConflictAlreadyResolved { conflict_id: i64 },

    /// Another sync holds the target lock.
    #[error("Sync already in progress for {target}")]
    SyncInProgress { target: String },

    /// A content file could not be read or parsed.
    #[error("Content error in {path}: {message}")]
    Content { path: String, message: String },

    /// Tracker credentials rejected.
    #[error("Authentication error: {message}")]
    Authentication { message: String },

    /// Local store failure.
    #[error("Store error: {message}")]
    Database { message: String },

    /// Configuration missing or malformed.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a validation error with field name.
    pub fn validation_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a tracker API error.
    pub fn tracker_api(message: impl Into<String>) -> Self {
        Self::TrackerApi {
            message: message.into(),
            status_code: None,
            endpoint: None,
        }
    }

    /// Create a tracker API error with status code and endpoint.
    pub fn tracker_api_full(
        message: impl Into<String>,
        status_code: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self::TrackerApi {
            message: message.into(),
            status_code: Some(status_code),
            endpoint: Some(endpoint.into()),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }

    /// Create a not found error.
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: None,
        }
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.to_string()),
        }
    }

    /// Create a sync-in-progress error for a target label such as `feature:12`.
    pub fn sync_in_progress(target: impl Into<String>) -> Self {
        Self::SyncInProgress {
            target: target.into(),
        }
    }

    /// Create a content error for a repository-relative path.
    pub fn content(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Content {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    ///
    /// Network failures, timeouts, rate limiting and 5xx responses are
    /// transient. Everything else fails the same way on every attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::TrackerApi { status_code, .. } => matches!(status_code, Some(code) if *code >= 500),
            _ => false,
        }
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Server-requested delay before the next attempt, if any.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => *retry_after_secs,
            _ => None,
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::not_found("row"),
            other => Self::database(other.to_string()),
        }
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        Self::database(err.to_string())
    }
}

/// Transport failures stay transient; a status carried by the error keeps
/// its code so 5xx is retried and 4xx is not.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.path().to_string());
        match err.status() {
            Some(status) => Self::TrackerApi {
                message: status.canonical_reason().unwrap_or("HTTP error").to_string(),
                status_code: Some(status.as_u16()),
                endpoint: url,
            },
            None if err.is_timeout() => Self::network(format!(
                "request to {} timed out",
                url.as_deref().unwrap_or("tracker")
            )),
            None if err.is_connect() => Self::network("tracker unreachable"),
            None => Self::network(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("malformed JSON: {}", err))
    }
}
