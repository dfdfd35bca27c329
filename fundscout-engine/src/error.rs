//! Error types for the FundScout engine
//!
//! Two layers, mirroring the component seams:
//! - `EngineError`: the engine taxonomy. Remote-invocation and subscription
//!   failures are absorbed at the track-runner boundary; prerequisite and
//!   concurrent-run rejections are local synchronous rejections surfaced as
//!   warnings, never thrown past the calling action.
//! - `ApiError`: HTTP envelope for the control surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fundscout_common::{GroupId, Stage};
use serde_json::json;
use thiserror::Error;

/// Engine result type
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Engine error taxonomy
#[derive(Debug, Error)]
pub enum EngineError {
    /// Remote processor invocation failed (non-2xx, success=false, or
    /// transport failure)
    #[error("Remote invocation failed: {0}")]
    RemoteInvocation(String),

    /// Progress subscription failed past the point of retrying
    #[error("Progress subscription failed: {0}")]
    Subscription(String),

    /// Stage switch rejected because the target's prerequisite is unmet
    #[error("Stage '{stage}' is not available: {reason}")]
    PrerequisiteNotMet { stage: Stage, reason: String },

    /// A second concurrent run of the same track or group was rejected
    #[error("{subject} is already running")]
    ConcurrentRunRejected { subject: String },

    /// No active session for the requested operation
    #[error("No active workflow session")]
    NoSession,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared library error
    #[error("Common error: {0}")]
    Common(#[from] fundscout_common::Error),
}

impl EngineError {
    pub fn concurrent_group(group: GroupId) -> Self {
        EngineError::ConcurrentRunRejected {
            subject: format!("processor group '{group}'"),
        }
    }
}

/// API result type
pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - e.g., group already running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::ConcurrentRunRejected { .. } => ApiError::Conflict(err.to_string()),
            EngineError::PrerequisiteNotMet { .. } => ApiError::Conflict(err.to_string()),
            EngineError::NoSession => ApiError::NotFound(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<fundscout_common::Error> for ApiError {
    fn from(err: fundscout_common::Error) -> Self {
        match err {
            fundscout_common::Error::NotFound(msg) => ApiError::NotFound(msg),
            fundscout_common::Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrent_run_maps_to_conflict() {
        let err = EngineError::concurrent_group(GroupId::DiscoveryGroup);
        assert!(matches!(ApiError::from(err), ApiError::Conflict(_)));
    }

    #[test]
    fn prerequisite_message_names_stage() {
        let err = EngineError::PrerequisiteNotMet {
            stage: Stage::Analyze,
            reason: "discover is not complete and no results exist".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("analyze"));
        assert!(msg.contains("not available"));
    }
}
