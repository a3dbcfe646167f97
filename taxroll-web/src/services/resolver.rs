//! Entry resolver and transcription workflow
//!
//! Translates loosely-typed transcription payloads (form input or bulk
//! rows) into validated, normalized, entity-linked records. Every
//! resolution runs inside the caller's transaction; nothing is persisted
//! when any step fails.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};

use taxroll_common::audit::{self, AuditRecord};
use taxroll_common::db::models::{EnslavementDetails, EntryStatus, TaxAssessmentEntry};
use taxroll_common::normalize;

use crate::auth::RequestUser;
use crate::error::{ApiError, ApiResult};

/// Loosely-typed transcription payload. Absent fields stay `None`; the
/// update path treats absence as "leave unchanged".
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EntryPayload {
    pub page_id: Option<i64>,
    pub county_id: Option<i64>,
    pub district_id: Option<i64>,

    pub taxpayer_id: Option<i64>,
    pub taxpayer_name_original: Option<String>,
    pub taxpayer_name_normalized: Option<String>,

    pub enslaved_person_id: Option<i64>,
    pub enslaved_name_original: Option<String>,
    pub enslaved_name_normalized: Option<String>,
    pub gender: Option<String>,
    pub approx_birth_year: Option<i32>,
    pub enslaved_notes: Option<String>,

    pub line_number: Option<i32>,
    pub sequence_on_page: Option<i32>,
    pub year: Option<i32>,

    pub category_original: Option<String>,
    pub age_original: Option<String>,
    pub age_years: Option<i32>,
    pub value_original: Option<String>,
    pub value_cents: Option<i64>,
    pub quantity_original: Option<String>,
    pub remarks_original: Option<String>,
    pub transcription_confidence: Option<String>,
    pub status: Option<EntryStatus>,
}

/// Entity links resolved for one payload
#[derive(Debug, Clone)]
pub struct ResolvedRefs {
    pub page_id: i64,
    pub county_id: i64,
    pub district_id: Option<i64>,
    pub taxpayer_id: i64,
    pub enslaved_person_id: i64,
}

/// Created/updated entry together with its details row
#[derive(Debug, Clone, Serialize)]
pub struct EntryWithDetails {
    pub entry: TaxAssessmentEntry,
    pub details: EnslavementDetails,
}

/// Page fields the resolver needs for consistency enforcement
#[derive(Debug, Clone, sqlx::FromRow)]
struct PageRef {
    id: i64,
    county_id: i64,
    district_id: Option<i64>,
}

fn text(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Pure validation ahead of any store work: page reference first, then the
/// full list of missing name fields (all of them, not just the first).
/// Payloads that link entities by id are exempt from the name requirement.
pub fn validate_payload(payload: &EntryPayload) -> ApiResult<i64> {
    let page_id = payload
        .page_id
        .filter(|id| *id != 0)
        .ok_or(ApiError::PageRequired)?;

    let mut missing = Vec::new();
    if payload.taxpayer_id.is_none() && text(&payload.taxpayer_name_original).is_none() {
        missing.push("taxpayer_name_original");
    }
    if payload.enslaved_person_id.is_none() && text(&payload.enslaved_name_original).is_none() {
        missing.push("enslaved_name_original");
    }
    if !missing.is_empty() {
        return Err(ApiError::MissingFields(missing));
    }

    Ok(page_id)
}

/// Resolve a payload to entity links inside `tx`.
pub async fn resolve(
    tx: &mut Transaction<'_, Postgres>,
    payload: &EntryPayload,
) -> ApiResult<ResolvedRefs> {
    let page_id = validate_payload(payload)?;

    let page = load_page(tx, page_id).await?;
    let (county_id, district_id) =
        check_page_consistency(&page, payload.county_id, payload.district_id)?;

    let taxpayer_id = match payload.taxpayer_id {
        Some(id) => id,
        None => {
            find_or_create_taxpayer(
                tx,
                county_id,
                district_id,
                text(&payload.taxpayer_name_original).unwrap_or_default(),
                text(&payload.taxpayer_name_normalized),
            )
            .await?
        }
    };

    let enslaved_person_id = match payload.enslaved_person_id {
        Some(id) => id,
        None => find_or_create_enslaved_person(tx, payload).await?,
    };

    Ok(ResolvedRefs {
        page_id: page.id,
        county_id,
        district_id,
        taxpayer_id,
        enslaved_person_id,
    })
}

async fn load_page(tx: &mut Transaction<'_, Postgres>, page_id: i64) -> ApiResult<PageRef> {
    sqlx::query_as::<_, PageRef>(
        "SELECT id, county_id, district_id FROM pages WHERE id = $1",
    )
    .bind(page_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("page {} not found", page_id)))
}

/// Enforce county/district consistency between payload and page.
///
/// The page is authoritative: a payload value may only restate it. A
/// payload district on a page without one stands (the page simply never
/// recorded the subdivision).
fn check_page_consistency(
    page: &PageRef,
    payload_county: Option<i64>,
    payload_district: Option<i64>,
) -> ApiResult<(i64, Option<i64>)> {
    if let Some(county) = payload_county {
        if county != page.county_id {
            return Err(ApiError::CountyMismatch(page.county_id));
        }
    }

    let district_id = match (payload_district, page.district_id) {
        (Some(district), Some(page_district)) if district != page_district => {
            return Err(ApiError::DistrictMismatch(page_district));
        }
        (Some(district), _) => Some(district),
        (None, page_district) => page_district,
    };

    Ok((page.county_id, district_id))
}

/// Find or create a taxpayer scoped by (county, district-or-sentinel,
/// normalized name).
///
/// The insert races are settled by the unique identity index: a concurrent
/// insert makes ours a no-op and the follow-up fetch returns the canonical
/// row.
async fn find_or_create_taxpayer(
    tx: &mut Transaction<'_, Postgres>,
    county_id: i64,
    district_id: Option<i64>,
    name_original: &str,
    name_normalized: Option<&str>,
) -> ApiResult<i64> {
    let normalized = match name_normalized {
        Some(n) => n.to_string(),
        None => normalize(name_original),
    };

    const LOOKUP: &str = r#"
        SELECT id FROM taxpayers
        WHERE county_id = $1
          AND COALESCE(district_id, -1) = COALESCE($2, -1)
          AND name_normalized = $3
        LIMIT 1
    "#;

    let existing: Option<i64> = sqlx::query_scalar(LOOKUP)
        .bind(county_id)
        .bind(district_id)
        .bind(&normalized)
        .fetch_optional(&mut **tx)
        .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO taxpayers (county_id, district_id, name_original, name_normalized)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (county_id, COALESCE(district_id, -1), name_normalized) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(county_id)
    .bind(district_id)
    .bind(name_original)
    .bind(&normalized)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(id) = inserted {
        return Ok(id);
    }

    // Lost the insert race; the canonical row exists now.
    let id: i64 = sqlx::query_scalar(LOOKUP)
        .bind(county_id)
        .bind(district_id)
        .bind(&normalized)
        .fetch_one(&mut **tx)
        .await?;
    Ok(id)
}

/// Find or create an enslaved person, deduped globally by normalized name.
async fn find_or_create_enslaved_person(
    tx: &mut Transaction<'_, Postgres>,
    payload: &EntryPayload,
) -> ApiResult<i64> {
    let name_original = text(&payload.enslaved_name_original).unwrap_or_default();
    let normalized = match text(&payload.enslaved_name_normalized) {
        Some(n) => n.to_string(),
        None => normalize(name_original),
    };

    const LOOKUP: &str =
        "SELECT id FROM enslaved_people WHERE name_normalized = $1 LIMIT 1";

    let existing: Option<i64> = sqlx::query_scalar(LOOKUP)
        .bind(&normalized)
        .fetch_optional(&mut **tx)
        .await?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO enslaved_people (name_original, name_normalized, gender, approx_birth_year, notes)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (name_normalized) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(name_original)
    .bind(&normalized)
    .bind(&payload.gender)
    .bind(payload.approx_birth_year)
    .bind(&payload.enslaved_notes)
    .fetch_optional(&mut **tx)
    .await?;
    if let Some(id) = inserted {
        return Ok(id);
    }

    let id: i64 = sqlx::query_scalar(LOOKUP)
        .bind(&normalized)
        .fetch_one(&mut **tx)
        .await?;
    Ok(id)
}

/// Resolve and insert the entry + details rows inside `tx`. Shared by the
/// create endpoint and the bulk importer.
pub async fn insert_entry(
    tx: &mut Transaction<'_, Postgres>,
    user: &RequestUser,
    payload: &EntryPayload,
) -> ApiResult<EntryWithDetails> {
    let refs = resolve(tx, payload).await?;

    let entry: TaxAssessmentEntry = sqlx::query_as(
        r#"
        INSERT INTO tax_assessment_entries (
            page_id, county_id, district_id, taxpayer_id, enslaved_person_id,
            line_number, sequence_on_page, year
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *
        "#,
    )
    .bind(refs.page_id)
    .bind(refs.county_id)
    .bind(refs.district_id)
    .bind(refs.taxpayer_id)
    .bind(refs.enslaved_person_id)
    .bind(payload.line_number)
    .bind(payload.sequence_on_page)
    .bind(payload.year.unwrap_or(1863))
    .fetch_one(&mut **tx)
    .await?;

    let status = payload.status.unwrap_or(EntryStatus::Draft);
    let details: EnslavementDetails = sqlx::query_as(
        r#"
        INSERT INTO enslavement_details (
            entry_id, category_original, age_original, age_years, value_original,
            value_cents, quantity_original, remarks_original, transcription_confidence,
            transcriber_user_id, status
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(entry.id)
    .bind(&payload.category_original)
    .bind(&payload.age_original)
    .bind(payload.age_years)
    .bind(&payload.value_original)
    .bind(payload.value_cents)
    .bind(&payload.quantity_original)
    .bind(&payload.remarks_original)
    .bind(&payload.transcription_confidence)
    .bind(user.id)
    .bind(status.as_str())
    .fetch_one(&mut **tx)
    .await?;

    Ok(EntryWithDetails { entry, details })
}

/// Create one entry: resolve, insert, audit, commit.
pub async fn create_entry(
    pool: &PgPool,
    user: &RequestUser,
    payload: &EntryPayload,
) -> ApiResult<EntryWithDetails> {
    validate_payload(payload)?;

    let mut tx = pool.begin().await?;

    let created = insert_entry(&mut tx, user, payload).await?;

    audit::record(
        &mut *tx,
        AuditRecord::new("create", "tax_assessment_entries")
            .actor(user.id)
            .record_id(created.entry.id)
            .new_data(audit::snapshot(&created))
            .request_meta(user.audit_meta()),
    )
    .await?;

    tx.commit().await?;
    Ok(created)
}

/// Partial update of an entry and its details.
///
/// Only fields present in the payload change; the taxpayer/enslaved-person
/// links are re-resolved only when the payload supplies the corresponding
/// id or name. Explicit county/district values are still checked against
/// the (possibly new) page.
pub async fn update_entry(
    pool: &PgPool,
    user: &RequestUser,
    entry_id: i64,
    payload: &EntryPayload,
) -> ApiResult<EntryWithDetails> {
    let mut tx = pool.begin().await?;

    let existing: TaxAssessmentEntry =
        sqlx::query_as("SELECT * FROM tax_assessment_entries WHERE id = $1")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("entry {} not found", entry_id)))?;

    let existing_details: EnslavementDetails =
        sqlx::query_as("SELECT * FROM enslavement_details WHERE entry_id = $1")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("entry {} not found", entry_id)))?;

    let page = load_page(&mut tx, payload.page_id.unwrap_or(existing.page_id)).await?;
    check_page_consistency(&page, payload.county_id, payload.district_id)?;

    // Scope for taxpayer dedupe: payload merged over the existing entry.
    let effective_county = payload.county_id.unwrap_or(existing.county_id);
    let effective_district = payload.district_id.or(existing.district_id);

    let taxpayer_id: Option<i64> = if payload.taxpayer_id.is_some() {
        payload.taxpayer_id
    } else if let Some(name) = text(&payload.taxpayer_name_original) {
        Some(
            find_or_create_taxpayer(
                &mut tx,
                effective_county,
                effective_district,
                name,
                text(&payload.taxpayer_name_normalized),
            )
            .await?,
        )
    } else {
        None
    };

    let enslaved_person_id: Option<i64> = if payload.enslaved_person_id.is_some() {
        payload.enslaved_person_id
    } else if text(&payload.enslaved_name_original).is_some() {
        Some(find_or_create_enslaved_person(&mut tx, payload).await?)
    } else {
        None
    };

    let entry: TaxAssessmentEntry = sqlx::query_as(
        r#"
        UPDATE tax_assessment_entries
        SET
            page_id = COALESCE($1, page_id),
            county_id = COALESCE($2, county_id),
            district_id = COALESCE($3, district_id),
            taxpayer_id = COALESCE($4, taxpayer_id),
            enslaved_person_id = COALESCE($5, enslaved_person_id),
            line_number = COALESCE($6, line_number),
            sequence_on_page = COALESCE($7, sequence_on_page),
            year = COALESCE($8, year),
            updated_at = NOW()
        WHERE id = $9
        RETURNING *
        "#,
    )
    .bind(payload.page_id)
    .bind(payload.county_id)
    .bind(payload.district_id)
    .bind(taxpayer_id)
    .bind(enslaved_person_id)
    .bind(payload.line_number)
    .bind(payload.sequence_on_page)
    .bind(payload.year)
    .bind(entry_id)
    .fetch_one(&mut *tx)
    .await?;

    let details: EnslavementDetails = sqlx::query_as(
        r#"
        UPDATE enslavement_details
        SET
            category_original = COALESCE($1, category_original),
            age_original = COALESCE($2, age_original),
            age_years = COALESCE($3, age_years),
            value_original = COALESCE($4, value_original),
            value_cents = COALESCE($5, value_cents),
            quantity_original = COALESCE($6, quantity_original),
            remarks_original = COALESCE($7, remarks_original),
            transcription_confidence = COALESCE($8, transcription_confidence),
            status = COALESCE($9, status),
            updated_at = NOW()
        WHERE entry_id = $10
        RETURNING *
        "#,
    )
    .bind(&payload.category_original)
    .bind(&payload.age_original)
    .bind(payload.age_years)
    .bind(&payload.value_original)
    .bind(payload.value_cents)
    .bind(&payload.quantity_original)
    .bind(&payload.remarks_original)
    .bind(&payload.transcription_confidence)
    .bind(payload.status.map(EntryStatus::as_str))
    .bind(entry_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        AuditRecord::new("update", "tax_assessment_entries")
            .actor(user.id)
            .record_id(entry_id)
            .old_data(audit::snapshot(&EntryWithDetails {
                entry: existing,
                details: existing_details,
            }))
            .new_data(audit::snapshot(&EntryWithDetails {
                entry: entry.clone(),
                details: details.clone(),
            }))
            .request_meta(user.audit_meta()),
    )
    .await?;

    tx.commit().await?;
    Ok(EntryWithDetails { entry, details })
}

/// Move an entry's details to `pending_review`.
///
/// The transition table (`EntryStatus::may_submit`) currently permits
/// resubmission from every state, terminal ones included.
pub async fn submit_entry(
    pool: &PgPool,
    user: &RequestUser,
    entry_id: i64,
) -> ApiResult<EnslavementDetails> {
    let mut tx = pool.begin().await?;

    let current: EnslavementDetails =
        sqlx::query_as("SELECT * FROM enslavement_details WHERE entry_id = $1")
            .bind(entry_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("entry {} not found", entry_id)))?;

    let status = EntryStatus::parse(&current.status)
        .ok_or_else(|| ApiError::Internal(format!("corrupt status {:?}", current.status)))?;
    if !status.may_submit() {
        return Err(ApiError::BadRequest(format!(
            "entry in status {} cannot be submitted",
            current.status
        )));
    }

    let updated: EnslavementDetails = sqlx::query_as(
        r#"
        UPDATE enslavement_details
        SET status = 'pending_review', updated_at = NOW()
        WHERE entry_id = $1
        RETURNING *
        "#,
    )
    .bind(entry_id)
    .fetch_one(&mut *tx)
    .await?;

    audit::record(
        &mut *tx,
        AuditRecord::new("submit_for_review", "enslavement_details")
            .actor(user.id)
            .record_id(entry_id)
            .old_data(audit::snapshot(&current))
            .new_data(audit::snapshot(&updated))
            .request_meta(user.audit_meta()),
    )
    .await?;

    tx.commit().await?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(county_id: i64, district_id: Option<i64>) -> PageRef {
        PageRef {
            id: 1,
            county_id,
            district_id,
        }
    }

    #[test]
    fn test_defaults_from_page() {
        let (county, district) = check_page_consistency(&page(5, None), None, None).unwrap();
        assert_eq!(county, 5);
        assert_eq!(district, None);

        let (county, district) = check_page_consistency(&page(5, Some(9)), None, None).unwrap();
        assert_eq!(county, 5);
        assert_eq!(district, Some(9));
    }

    #[test]
    fn test_county_mismatch_carries_page_value() {
        let err = check_page_consistency(&page(5, None), Some(9), None).unwrap_err();
        match err {
            ApiError::CountyMismatch(page_county) => assert_eq!(page_county, 5),
            other => panic!("expected CountyMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_matching_county_accepted() {
        let (county, _) = check_page_consistency(&page(5, None), Some(5), None).unwrap();
        assert_eq!(county, 5);
    }

    #[test]
    fn test_district_mismatch_only_when_page_has_one() {
        let err = check_page_consistency(&page(5, Some(3)), None, Some(4)).unwrap_err();
        match err {
            ApiError::DistrictMismatch(page_district) => assert_eq!(page_district, 3),
            other => panic!("expected DistrictMismatch, got {:?}", other),
        }

        // Page without a district accepts the payload's district.
        let (_, district) = check_page_consistency(&page(5, None), None, Some(4)).unwrap();
        assert_eq!(district, Some(4));
    }

    #[test]
    fn test_validate_requires_page_first() {
        let err = validate_payload(&EntryPayload::default()).unwrap_err();
        assert!(matches!(err, ApiError::PageRequired));

        let err = validate_payload(&EntryPayload {
            page_id: Some(0),
            ..Default::default()
        })
        .unwrap_err();
        assert!(matches!(err, ApiError::PageRequired));
    }

    #[test]
    fn test_validate_names_all_missing_fields() {
        let err = validate_payload(&EntryPayload {
            page_id: Some(3),
            ..Default::default()
        })
        .unwrap_err();
        match err {
            ApiError::MissingFields(fields) => {
                assert_eq!(
                    fields,
                    vec!["taxpayer_name_original", "enslaved_name_original"]
                );
            }
            other => panic!("expected MissingFields, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_entity_ids_instead_of_names() {
        let page_id = validate_payload(&EntryPayload {
            page_id: Some(3),
            taxpayer_id: Some(10),
            enslaved_person_id: Some(11),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(page_id, 3);
    }

    #[test]
    fn test_validate_accepts_names() {
        let payload = EntryPayload {
            page_id: Some(3),
            taxpayer_name_original: Some("John Doe".to_string()),
            enslaved_name_original: Some("Mary".to_string()),
            ..Default::default()
        };
        assert_eq!(validate_payload(&payload).unwrap(), 3);
    }

    #[test]
    fn test_text_treats_blank_as_missing() {
        assert_eq!(text(&Some("  John ".to_string())), Some("John"));
        assert_eq!(text(&Some("   ".to_string())), None);
        assert_eq!(text(&None), None);
    }
}
