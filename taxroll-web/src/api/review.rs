//! Review workflow API
//!
//! Queue listing and approve/reject decisions. Gated to admin/reviewer
//! roles by the router.

use axum::{
    extract::{Extension, Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use taxroll_common::audit::{self, AuditRecord};
use taxroll_common::db::models::{EnslavementDetails, EntryStatus};

use crate::auth::RequestUser;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// One row of the review queue
#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct ReviewQueueRow {
    pub id: i64,
    pub year: i32,
    pub line_number: Option<i32>,
    pub sequence_on_page: Option<i32>,
    pub county_name: String,
    pub district_name: Option<String>,
    pub enslaved_name_original: String,
    pub enslaved_name_normalized: String,
    pub taxpayer_name_original: String,
    pub taxpayer_name_normalized: String,
    pub status: String,
    pub transcription_confidence: Option<String>,
    pub remarks_original: Option<String>,
    pub page_number_label: Option<String>,
    pub image_thumbnail_url: Option<String>,
}

const QUEUE_SELECT: &str = r#"
    SELECT
        tae.id,
        tae.year,
        tae.line_number,
        tae.sequence_on_page,
        c.name AS county_name,
        d.name AS district_name,
        ep.name_original AS enslaved_name_original,
        ep.name_normalized AS enslaved_name_normalized,
        t.name_original AS taxpayer_name_original,
        t.name_normalized AS taxpayer_name_normalized,
        ed.status,
        ed.transcription_confidence,
        ed.remarks_original,
        p.page_number_label,
        p.image_thumbnail_url
    FROM tax_assessment_entries tae
    JOIN enslavement_details ed ON ed.entry_id = tae.id
    JOIN enslaved_people ep ON ep.id = tae.enslaved_person_id
    JOIN taxpayers t ON t.id = tae.taxpayer_id
    JOIN pages p ON p.id = tae.page_id
    JOIN counties c ON c.id = tae.county_id
    LEFT JOIN districts d ON d.id = tae.district_id
"#;

/// GET /api/review/queue
///
/// Entries waiting on a reviewer: pending plus previously rejected ones,
/// most recently touched first.
pub async fn queue(State(state): State<AppState>) -> ApiResult<Json<Vec<ReviewQueueRow>>> {
    let sql = format!(
        "{} WHERE ed.status IN ('pending_review', 'rejected') ORDER BY tae.updated_at DESC LIMIT 200",
        QUEUE_SELECT
    );

    let rows = sqlx::query_as::<_, ReviewQueueRow>(&sql)
        .fetch_all(&state.db)
        .await?;

    Ok(Json(rows))
}

/// GET /api/review/status/:status
///
/// Entries in one workflow status, for triage tabs.
pub async fn by_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
) -> ApiResult<Json<Vec<ReviewQueueRow>>> {
    let status = EntryStatus::parse(&status)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown status: {}", status)))?;

    let sql = format!(
        "{} WHERE ed.status = $1 ORDER BY tae.updated_at DESC LIMIT 200",
        QUEUE_SELECT
    );

    let rows = sqlx::query_as::<_, ReviewQueueRow>(&sql)
        .bind(status.as_str())
        .fetch_all(&state.db)
        .await?;

    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: String,
    pub notes: Option<String>,
}

/// POST /api/review/entries/:id/decision
///
/// Apply an approve/reject decision. Non-empty notes append to the entry's
/// remarks as an annotated line; existing remarks are never overwritten.
pub async fn decide(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Path(entry_id): Path<i64>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<EnslavementDetails>> {
    let decision = match EntryStatus::parse(&request.decision) {
        Some(status @ (EntryStatus::Approved | EntryStatus::Rejected)) => status,
        _ => {
            return Err(ApiError::BadRequest(
                "decision must be approved or rejected".to_string(),
            ))
        }
    };

    let mut tx = state.db.begin().await?;

    let current: EnslavementDetails =
        sqlx::query_as("SELECT * FROM enslavement_details WHERE entry_id = $1")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("entry {} not found", entry_id)))?;

    let updated: EnslavementDetails = sqlx::query_as(
        r#"
        UPDATE enslavement_details
        SET
            status = $1,
            reviewed_by_user_id = $2,
            remarks_original = CASE
                WHEN $3::TEXT IS NULL OR $3 = '' THEN remarks_original
                ELSE CONCAT(COALESCE(remarks_original, ''), E'\n[Review Note] ', $3)
            END,
            updated_at = NOW()
        WHERE entry_id = $4
        RETURNING *
        "#,
    )
    .bind(decision.as_str())
    .bind(user.id)
    .bind(&request.notes)
    .bind(entry_id)
    .fetch_one(&mut *tx)
    .await?;

    let action = match decision {
        EntryStatus::Approved => "review_approved",
        _ => "review_rejected",
    };

    audit::record(
        &mut *tx,
        AuditRecord::new(action, "enslavement_details")
            .actor(user.id)
            .record_id(entry_id)
            .old_data(audit::snapshot(&current))
            .new_data(audit::snapshot(&updated))
            .request_meta(user.audit_meta()),
    )
    .await?;

    tx.commit().await?;
    Ok(Json(updated))
}

/// Build review routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/queue", get(queue))
        .route("/status/:status", get(by_status))
        .route("/entries/:id/decision", post(decide))
}
