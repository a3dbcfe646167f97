//! Request identity and role gate
//!
//! Credential issuance and validation live in the out-of-scope auth
//! front-door; by the time a request reaches this service its identity has
//! been verified and flattened into `x-user-*` headers. This module trusts
//! those headers, attaches a `RequestUser` to the request, and enforces the
//! per-route-group role allow-lists before any handler or store work runs.

use axum::{
    extract::Request,
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde_json::{json, Value};
use uuid::Uuid;

use taxroll_common::db::models::Role;

use crate::error::ApiError;

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const TRANSCRIBERS: &[Role] = &[Role::Admin, Role::Transcriber];
pub const REVIEWERS: &[Role] = &[Role::Admin, Role::Reviewer];

/// Identity attached to every inbound request. Anonymous requests get
/// `role = public` and a fresh request id for log/audit correlation.
#[derive(Debug, Clone)]
pub struct RequestUser {
    pub id: Option<i64>,
    pub role: Role,
    pub email: Option<String>,
    pub request_id: Uuid,
    pub forwarded_for: Option<String>,
}

impl RequestUser {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let id = headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok());
        let role = headers
            .get("x-user-role")
            .and_then(|v| v.to_str().ok())
            .map(Role::parse)
            .unwrap_or(Role::Public);
        let email = headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let forwarded_for = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        Self {
            id,
            role,
            email,
            request_id: Uuid::new_v4(),
            forwarded_for,
        }
    }

    /// Request metadata stored alongside audit rows.
    pub fn audit_meta(&self) -> Option<Value> {
        Some(json!({
            "request_id": self.request_id,
            "ip": self.forwarded_for,
        }))
    }
}

/// Outermost middleware: derive the request identity from the pre-validated
/// headers and stash it in request extensions.
pub async fn attach_user(mut request: Request, next: Next) -> Response {
    let user = RequestUser::from_headers(request.headers());
    request.extensions_mut().insert(user);
    next.run(request).await
}

/// Admin-only gate for `/api/admin/*`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    require_role(ADMIN_ONLY, request, next).await
}

/// Admin/transcriber gate for `/api/transcriptions/*`.
pub async fn require_transcriber(request: Request, next: Next) -> Result<Response, ApiError> {
    require_role(TRANSCRIBERS, request, next).await
}

/// Admin/reviewer gate for `/api/review/*`.
pub async fn require_reviewer(request: Request, next: Next) -> Result<Response, ApiError> {
    require_role(REVIEWERS, request, next).await
}

/// Role allow-list check. Runs before the handler, so a forbidden request
/// never touches the store.
pub async fn require_role(
    allowed: &'static [Role],
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let role = request
        .extensions()
        .get::<RequestUser>()
        .map(|u| u.role)
        .unwrap_or(Role::Public);

    if !allowed.contains(&role) {
        let required = allowed
            .iter()
            .map(|r| r.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ApiError::Forbidden(required));
    }

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                axum::http::HeaderName::try_from(*k).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn test_missing_headers_default_to_public() {
        let user = RequestUser::from_headers(&HeaderMap::new());
        assert_eq!(user.role, Role::Public);
        assert!(user.id.is_none());
        assert!(user.email.is_none());
    }

    #[test]
    fn test_headers_parsed() {
        let user = RequestUser::from_headers(&headers(&[
            ("x-user-id", "12"),
            ("x-user-role", "reviewer"),
            ("x-user-email", "r@example.org"),
        ]));
        assert_eq!(user.id, Some(12));
        assert_eq!(user.role, Role::Reviewer);
        assert_eq!(user.email.as_deref(), Some("r@example.org"));
    }

    #[test]
    fn test_garbage_id_and_role_degrade() {
        let user = RequestUser::from_headers(&headers(&[
            ("x-user-id", "not-a-number"),
            ("x-user-role", "superuser"),
        ]));
        assert!(user.id.is_none());
        assert_eq!(user.role, Role::Public);
    }

    #[test]
    fn test_audit_meta_carries_request_id() {
        let user = RequestUser::from_headers(&HeaderMap::new());
        let meta = user.audit_meta().unwrap();
        assert_eq!(
            meta["request_id"].as_str().unwrap(),
            user.request_id.to_string()
        );
    }
}
