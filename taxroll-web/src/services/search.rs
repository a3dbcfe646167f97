//! Public search over approved entries
//!
//! Ranking is delegated to PostgreSQL: exact-match boosts plus
//! `ts_rank_cd` full-text rank plus `similarity` trigram score, descending,
//! tie-broken by page sequence then id. Only approved entries are ever
//! visible here; a pending or rejected entry looks exactly like a missing
//! one.

use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use taxroll_common::normalize;

use crate::error::{ApiError, ApiResult};

/// Maximum rows a single search may return
pub const MAX_LIMIT: i64 = 100;
/// Default page size
pub const DEFAULT_LIMIT: i64 = 50;
/// Assessment year assumed when the caller does not filter explicitly
pub const DEFAULT_YEAR: i32 = 1863;

/// Match predicate selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Exact,
    Partial,
    #[default]
    Fuzzy,
}

impl SearchMode {
    /// WHERE fragment for this mode. `$1` is the normalized query, `$2`
    /// the raw query.
    fn predicate(self) -> &'static str {
        match self {
            SearchMode::Exact => {
                r#"(
                    ep.name_normalized = $1
                    OR ep.name_original = $2
                )"#
            }
            SearchMode::Partial => {
                r#"(
                    ep.name_normalized ILIKE '%' || $1 || '%'
                    OR ep.name_original ILIKE '%' || $2 || '%'
                )"#
            }
            SearchMode::Fuzzy => {
                r#"(
                    ep.name_tokens @@ websearch_to_tsquery('simple', $2)
                    OR similarity(ep.name_normalized, $1) > 0.3
                    OR ep.name_original ILIKE '%' || $2 || '%'
                )"#
            }
        }
    }
}

/// Validated search request
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub name: String,
    pub county_id: Option<i64>,
    pub district_id: Option<i64>,
    pub year: Option<i32>,
    pub taxpayer: Option<String>,
    pub mode: SearchMode,
    pub limit: i64,
    pub offset: i64,
}

impl SearchRequest {
    pub fn new(name: &str) -> ApiResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::NameRequired);
        }
        Ok(Self {
            name: name.to_string(),
            county_id: None,
            district_id: None,
            year: Some(DEFAULT_YEAR),
            taxpayer: None,
            mode: SearchMode::default(),
            limit: DEFAULT_LIMIT,
            offset: 0,
        })
    }

    /// Limit clamped into [1, MAX_LIMIT]; negative offsets floor to 0.
    pub fn clamped_limit(&self) -> i64 {
        self.limit.clamp(1, MAX_LIMIT)
    }

    pub fn clamped_offset(&self) -> i64 {
        self.offset.max(0)
    }
}

/// One search hit with the citation chain denormalized
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub year: i32,
    pub line_number: Option<i32>,
    pub sequence_on_page: Option<i32>,
    pub county_id: i64,
    pub county_name: String,
    pub district_id: Option<i64>,
    pub district_name: Option<String>,
    pub enslaved_person_id: i64,
    pub enslaved_name_original: String,
    pub enslaved_name_normalized: String,
    pub taxpayer_id: i64,
    pub taxpayer_name_original: String,
    pub taxpayer_name_normalized: String,
    pub category_original: Option<String>,
    pub age_original: Option<String>,
    pub age_years: Option<i32>,
    pub value_original: Option<String>,
    pub value_cents: Option<i64>,
    pub quantity_original: Option<String>,
    pub remarks_original: Option<String>,
    pub transcription_confidence: Option<String>,
    pub page_id: i64,
    pub page_number_label: Option<String>,
    pub image_url: Option<String>,
    pub image_thumbnail_url: Option<String>,
    pub source_item_id: i64,
    pub source_item_label: Option<String>,
    pub source_id: i64,
    pub source_title: String,
    pub citation_preferred: Option<String>,
    pub repository_id: i64,
    pub repository_name: String,
    pub repository_location: Option<String>,
    pub repository_url: Option<String>,
    pub rank_score: f64,
}

/// Single-entry detail: the search hit shape plus the long-form citation
/// and person fields.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EntryDetail {
    pub id: i64,
    pub year: i32,
    pub line_number: Option<i32>,
    pub sequence_on_page: Option<i32>,
    pub county_id: i64,
    pub county_name: String,
    pub district_id: Option<i64>,
    pub district_name: Option<String>,
    pub enslaved_person_id: i64,
    pub enslaved_name_original: String,
    pub enslaved_name_normalized: String,
    pub gender: Option<String>,
    pub approx_birth_year: Option<i32>,
    pub enslaved_notes: Option<String>,
    pub taxpayer_id: i64,
    pub taxpayer_name_original: String,
    pub taxpayer_name_normalized: String,
    pub taxpayer_notes: Option<String>,
    pub category_original: Option<String>,
    pub age_original: Option<String>,
    pub age_years: Option<i32>,
    pub value_original: Option<String>,
    pub value_cents: Option<i64>,
    pub quantity_original: Option<String>,
    pub remarks_original: Option<String>,
    pub transcription_confidence: Option<String>,
    pub page_id: i64,
    pub page_number_label: Option<String>,
    pub image_url: Option<String>,
    pub image_thumbnail_url: Option<String>,
    pub page_notes: Option<String>,
    pub source_item_id: i64,
    pub source_item_label: Option<String>,
    pub source_item_date_range: Option<String>,
    pub source_id: i64,
    pub source_title: String,
    pub citation_preferred: Option<String>,
    pub call_number: Option<String>,
    pub microfilm_roll: Option<String>,
    pub format: Option<String>,
    pub rights: Option<String>,
    pub repository_id: i64,
    pub repository_name: String,
    pub repository_location: Option<String>,
    pub repository_url: Option<String>,
}

/// Run the ranked public search.
pub async fn search(pool: &PgPool, request: &SearchRequest) -> ApiResult<Vec<SearchHit>> {
    let normalized_name = normalize(&request.name);
    let raw_name = request.name.trim().to_string();
    let normalized_taxpayer = request
        .taxpayer
        .as_deref()
        .map(normalize)
        .filter(|s| !s.is_empty());

    let sql = format!(
        r#"
        SELECT
            tae.id,
            tae.year,
            tae.line_number,
            tae.sequence_on_page,
            c.id AS county_id,
            c.name AS county_name,
            d.id AS district_id,
            d.name AS district_name,
            ep.id AS enslaved_person_id,
            ep.name_original AS enslaved_name_original,
            ep.name_normalized AS enslaved_name_normalized,
            t.id AS taxpayer_id,
            t.name_original AS taxpayer_name_original,
            t.name_normalized AS taxpayer_name_normalized,
            ed.category_original,
            ed.age_original,
            ed.age_years,
            ed.value_original,
            ed.value_cents,
            ed.quantity_original,
            ed.remarks_original,
            ed.transcription_confidence,
            p.id AS page_id,
            p.page_number_label,
            p.image_url,
            p.image_thumbnail_url,
            si.id AS source_item_id,
            si.label AS source_item_label,
            s.id AS source_id,
            s.title AS source_title,
            s.citation_preferred,
            r.id AS repository_id,
            r.name AS repository_name,
            r.location AS repository_location,
            r.url AS repository_url,
            (
                CASE WHEN ep.name_normalized = $1 THEN 10 ELSE 0 END
                + CASE WHEN ep.name_original = $2 THEN 8 ELSE 0 END
                + COALESCE(ts_rank_cd(ep.name_tokens, websearch_to_tsquery('simple', $2)), 0)
                + similarity(ep.name_normalized, $1)
            )::DOUBLE PRECISION AS rank_score
        FROM tax_assessment_entries tae
        JOIN enslavement_details ed ON ed.entry_id = tae.id
        JOIN enslaved_people ep ON ep.id = tae.enslaved_person_id
        JOIN taxpayers t ON t.id = tae.taxpayer_id
        JOIN pages p ON p.id = tae.page_id
        JOIN source_items si ON si.id = p.source_item_id
        JOIN sources s ON s.id = si.source_id
        JOIN repositories r ON r.id = s.repository_id
        JOIN counties c ON c.id = tae.county_id
        LEFT JOIN districts d ON d.id = tae.district_id
        WHERE ed.status = 'approved'
          AND {predicate}
          AND ($3::BIGINT IS NULL OR tae.county_id = $3)
          AND ($4::BIGINT IS NULL OR tae.district_id = $4)
          AND ($5::INT IS NULL OR tae.year = $5)
          AND (
            $6::TEXT IS NULL
            OR t.name_normalized ILIKE '%' || $6 || '%'
            OR t.name_original ILIKE '%' || $7 || '%'
          )
        ORDER BY rank_score DESC, tae.sequence_on_page ASC NULLS LAST, tae.id DESC
        LIMIT $8 OFFSET $9
        "#,
        predicate = request.mode.predicate()
    );

    let hits = sqlx::query_as::<_, SearchHit>(&sql)
        .bind(&normalized_name)
        .bind(&raw_name)
        .bind(request.county_id)
        .bind(request.district_id)
        .bind(request.year)
        .bind(normalized_taxpayer)
        .bind(&request.taxpayer)
        .bind(request.clamped_limit())
        .bind(request.clamped_offset())
        .fetch_all(pool)
        .await?;

    Ok(hits)
}

/// Fetch one approved entry with its full citation chain. `None` for both
/// missing and non-approved entries.
pub async fn detail(pool: &PgPool, entry_id: i64) -> ApiResult<Option<EntryDetail>> {
    let row = sqlx::query_as::<_, EntryDetail>(
        r#"
        SELECT
            tae.id,
            tae.year,
            tae.line_number,
            tae.sequence_on_page,
            tae.county_id,
            c.name AS county_name,
            tae.district_id,
            d.name AS district_name,
            ep.id AS enslaved_person_id,
            ep.name_original AS enslaved_name_original,
            ep.name_normalized AS enslaved_name_normalized,
            ep.gender,
            ep.approx_birth_year,
            ep.notes AS enslaved_notes,
            t.id AS taxpayer_id,
            t.name_original AS taxpayer_name_original,
            t.name_normalized AS taxpayer_name_normalized,
            t.notes AS taxpayer_notes,
            ed.category_original,
            ed.age_original,
            ed.age_years,
            ed.value_original,
            ed.value_cents,
            ed.quantity_original,
            ed.remarks_original,
            ed.transcription_confidence,
            p.id AS page_id,
            p.page_number_label,
            p.image_url,
            p.image_thumbnail_url,
            p.notes AS page_notes,
            si.id AS source_item_id,
            si.label AS source_item_label,
            si.date_range AS source_item_date_range,
            s.id AS source_id,
            s.title AS source_title,
            s.citation_preferred,
            s.call_number,
            s.microfilm_roll,
            s.format,
            s.rights,
            r.id AS repository_id,
            r.name AS repository_name,
            r.location AS repository_location,
            r.url AS repository_url
        FROM tax_assessment_entries tae
        JOIN enslavement_details ed ON ed.entry_id = tae.id
        JOIN enslaved_people ep ON ep.id = tae.enslaved_person_id
        JOIN taxpayers t ON t.id = tae.taxpayer_id
        JOIN pages p ON p.id = tae.page_id
        JOIN source_items si ON si.id = p.source_item_id
        JOIN sources s ON s.id = si.source_id
        JOIN repositories r ON r.id = s.repository_id
        JOIN counties c ON c.id = tae.county_id
        LEFT JOIN districts d ON d.id = tae.district_id
        WHERE tae.id = $1
          AND ed.status = 'approved'
        LIMIT 1
        "#,
    )
    .bind(entry_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
