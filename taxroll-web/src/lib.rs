//! taxroll-web library interface
//!
//! Exposes the application state and router for the binary and for
//! integration tests.

pub mod api;
pub mod auth;
pub mod error;
pub mod pagination;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::{middleware, Router};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Bulk-import policy knobs resolved from configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImportPolicy {
    /// Also key duplicate detection on the normalized taxpayer name.
    /// Default false: duplicates are keyed on (page, sequence, enslaved
    /// name) only, matching the long-observed behavior.
    pub dedupe_on_taxpayer: bool,
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: PgPool,
    /// Bulk-import policy
    pub import: ImportPolicy,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: PgPool, import: ImportPolicy) -> Self {
        Self {
            db,
            import,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
///
/// Role gates wrap each API group; identity attachment is outermost so the
/// gates always see a resolved `RequestUser`.
pub fn build_router(state: AppState) -> Router {
    let public = api::public::routes().layer(CorsLayer::permissive());

    let transcription =
        api::transcription::routes().layer(middleware::from_fn(auth::require_transcriber));

    let review = api::review::routes().layer(middleware::from_fn(auth::require_reviewer));

    let admin = api::admin::routes().layer(middleware::from_fn(auth::require_admin));

    Router::new()
        .nest("/api/public", public)
        .nest("/api/transcriptions", transcription)
        .nest("/api/review", review)
        .nest("/api/admin", admin)
        .merge(api::health::routes())
        .layer(middleware::from_fn(auth::attach_user))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
