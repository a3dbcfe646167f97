//! Transcription workflow API
//!
//! Entry create/update/submit, the per-page worklist, and the bulk
//! importer. Gated to admin/transcriber roles by the router.

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use taxroll_common::db::models::EnslavementDetails;

use crate::auth::RequestUser;
use crate::error::{ApiError, ApiResult};
use crate::services::import::{self, ImportFormat, ImportOutcome};
use crate::services::resolver::{self, EntryPayload, EntryWithDetails};
use crate::AppState;

/// POST /api/transcriptions/entries
pub async fn create_entry(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Json(payload): Json<EntryPayload>,
) -> ApiResult<(StatusCode, Json<EntryWithDetails>)> {
    let created = resolver::create_entry(&state.db, &user, &payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// PUT /api/transcriptions/entries/:id
pub async fn update_entry(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Path(entry_id): Path<i64>,
    Json(payload): Json<EntryPayload>,
) -> ApiResult<Json<EntryWithDetails>> {
    let updated = resolver::update_entry(&state.db, &user, entry_id, &payload).await?;
    Ok(Json(updated))
}

/// POST /api/transcriptions/entries/:id/submit
pub async fn submit_entry(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Path(entry_id): Path<i64>,
) -> ApiResult<Json<EnslavementDetails>> {
    let details = resolver::submit_entry(&state.db, &user, entry_id).await?;
    Ok(Json(details))
}

/// One row of the per-page worklist
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct PageEntryRow {
    pub id: i64,
    pub page_id: i64,
    pub sequence_on_page: Option<i32>,
    pub line_number: Option<i32>,
    pub year: i32,
    pub taxpayer_name_original: String,
    pub enslaved_name_original: String,
    pub status: String,
    pub transcription_confidence: Option<String>,
}

/// GET /api/transcriptions/entries/by-page/:page_id
pub async fn entries_by_page(
    State(state): State<AppState>,
    Path(page_id): Path<i64>,
) -> ApiResult<Json<Vec<PageEntryRow>>> {
    let rows = sqlx::query_as::<_, PageEntryRow>(
        r#"
        SELECT
            tae.id,
            tae.page_id,
            tae.sequence_on_page,
            tae.line_number,
            tae.year,
            t.name_original AS taxpayer_name_original,
            ep.name_original AS enslaved_name_original,
            ed.status,
            ed.transcription_confidence
        FROM tax_assessment_entries tae
        JOIN enslavement_details ed ON ed.entry_id = tae.id
        JOIN taxpayers t ON t.id = tae.taxpayer_id
        JOIN enslaved_people ep ON ep.id = tae.enslaved_person_id
        WHERE tae.page_id = $1
        ORDER BY tae.sequence_on_page ASC NULLS LAST, tae.id
        "#,
    )
    .bind(page_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ImportQuery {
    pub format: Option<String>,
}

/// POST /api/transcriptions/bulk-import?format=csv|json
///
/// The request body is the raw file buffer; transport concerns (multipart
/// forms, upload limits) belong to the front-door.
pub async fn bulk_import(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> ApiResult<Json<ImportOutcome>> {
    if body.is_empty() {
        return Err(ApiError::BadRequest("file body is required".to_string()));
    }

    let format = match query.format.as_deref() {
        None => ImportFormat::default(),
        Some(value) => ImportFormat::parse(value)
            .ok_or_else(|| ApiError::BadRequest(format!("unknown import format: {}", value)))?,
    };

    let outcome = import::bulk_import(&state.db, state.import, &user, format, &body).await?;
    Ok(Json(outcome))
}

/// Build transcription routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/entries", post(create_entry))
        .route("/entries/:id", put(update_entry))
        .route("/entries/:id/submit", post(submit_entry))
        .route("/entries/by-page/:page_id", get(entries_by_page))
        .route("/bulk-import", post(bulk_import))
}
