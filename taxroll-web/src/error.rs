//! Error types for taxroll-web
//!
//! One error enum covers the whole HTTP surface; every variant knows its
//! status code and machine-readable code, and conflict variants carry the
//! authoritative value so the client can correct itself.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Entry payload has no page reference (400)
    #[error("page_id is required")]
    PageRequired,

    /// Entry payload is missing required fields; every missing field is
    /// named, not just the first (400)
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    /// Search request without a name (400)
    #[error("name is required")]
    NameRequired,

    /// Payload county disagrees with the page's county; carries the
    /// authoritative page value (400)
    #[error("county does not match page county {0}")]
    CountyMismatch(i64),

    /// Payload district disagrees with the page's non-null district (400)
    #[error("district does not match page district {0}")]
    DistrictMismatch(i64),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Role not in the allow-list; carries the required roles (403)
    #[error("This endpoint requires one of: {0}")]
    Forbidden(String),

    /// Database operation failed (500)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// taxroll-common error
    #[error("Common error: {0}")]
    Common(#[from] taxroll_common::Error),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Whether a bulk-import row hitting this error may be skipped with a
    /// warning while sibling rows continue. Store failures are fatal to
    /// the whole batch.
    pub fn is_recoverable_row_error(&self) -> bool {
        matches!(
            self,
            ApiError::PageRequired
                | ApiError::MissingFields(_)
                | ApiError::CountyMismatch(_)
                | ApiError::DistrictMismatch(_)
                | ApiError::BadRequest(_)
                | ApiError::NotFound(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::PageRequired => (
                StatusCode::BAD_REQUEST,
                json!({"error": {"code": "PAGE_REQUIRED", "message": self.to_string()}}),
            ),
            ApiError::MissingFields(fields) => (
                StatusCode::BAD_REQUEST,
                json!({"error": {
                    "code": "MISSING_FIELDS",
                    "message": self.to_string(),
                    "missing": fields,
                }}),
            ),
            ApiError::NameRequired => (
                StatusCode::BAD_REQUEST,
                json!({"error": {"code": "NAME_REQUIRED", "message": self.to_string()}}),
            ),
            ApiError::CountyMismatch(page_county_id) => (
                StatusCode::BAD_REQUEST,
                json!({"error": {
                    "code": "COUNTY_MISMATCH",
                    "message": self.to_string(),
                    "page_county_id": page_county_id,
                }}),
            ),
            ApiError::DistrictMismatch(page_district_id) => (
                StatusCode::BAD_REQUEST,
                json!({"error": {
                    "code": "DISTRICT_MISMATCH",
                    "message": self.to_string(),
                    "page_district_id": page_district_id,
                }}),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({"error": {"code": "BAD_REQUEST", "message": msg}}),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                json!({"error": {"code": "NOT_FOUND", "message": msg}}),
            ),
            ApiError::Forbidden(required) => (
                StatusCode::FORBIDDEN,
                json!({"error": {
                    "code": "FORBIDDEN",
                    "message": self.to_string(),
                    "required_roles": required,
                }}),
            ),
            ApiError::Database(err) => {
                tracing::error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": {"code": "INTERNAL_ERROR", "message": err.to_string()}}),
                )
            }
            ApiError::Common(err) => {
                tracing::error!("Internal error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": {"code": "INTERNAL_ERROR", "message": err.to_string()}}),
                )
            }
            ApiError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"error": {"code": "INTERNAL_ERROR", "message": msg}}),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
