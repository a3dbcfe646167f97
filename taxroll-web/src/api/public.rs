//! Public search API
//!
//! Open endpoints over approved entries only: the filter lookups, the
//! ranked search, and the single-entry detail.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::services::search::{self, SearchHit, SearchMode, SearchRequest, DEFAULT_LIMIT, DEFAULT_YEAR};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct FiltersQuery {
    pub county_id: Option<i64>,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct CountyOption {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct DistrictOption {
    pub id: i64,
    pub county_id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct FiltersResponse {
    pub counties: Vec<CountyOption>,
    pub districts: Vec<DistrictOption>,
}

/// GET /api/public/filters[?county_id=]
///
/// Enabled counties and (optionally county-scoped) districts for the
/// search form.
pub async fn filters(
    State(state): State<AppState>,
    Query(query): Query<FiltersQuery>,
) -> ApiResult<Json<FiltersResponse>> {
    let counties = sqlx::query_as::<_, CountyOption>(
        "SELECT id, name FROM counties WHERE enabled = TRUE ORDER BY name ASC",
    )
    .fetch_all(&state.db)
    .await?;

    let districts = sqlx::query_as::<_, DistrictOption>(
        r#"
        SELECT id, county_id, name
        FROM districts
        WHERE enabled = TRUE
          AND ($1::BIGINT IS NULL OR county_id = $1)
        ORDER BY name ASC
        "#,
    )
    .bind(query.county_id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(FiltersResponse {
        counties,
        districts,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub name: Option<String>,
    pub county_id: Option<i64>,
    pub district_id: Option<i64>,
    pub year: Option<i32>,
    pub taxpayer_name: Option<String>,
    pub match_mode: Option<SearchMode>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub count: usize,
    pub entries: Vec<SearchHit>,
}

/// GET /api/public/search?name=...
pub async fn search_entries(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<SearchResponse>> {
    let mut request = SearchRequest::new(query.name.as_deref().unwrap_or(""))?;
    request.county_id = query.county_id;
    request.district_id = query.district_id;
    request.year = Some(query.year.unwrap_or(DEFAULT_YEAR));
    request.taxpayer = query.taxpayer_name;
    request.mode = query.match_mode.unwrap_or_default();
    request.limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    request.offset = query.offset.unwrap_or(0);

    let entries = search::search(&state.db, &request).await?;

    Ok(Json(SearchResponse {
        count: entries.len(),
        entries,
    }))
}

/// GET /api/public/entries/:id
///
/// Detail of one approved entry; pending/rejected entries answer 404
/// exactly like missing ones.
pub async fn entry_detail(
    State(state): State<AppState>,
    Path(entry_id): Path<i64>,
) -> ApiResult<Json<Value>> {
    let detail = search::detail(&state.db, entry_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("entry {} not found", entry_id)))?;

    Ok(Json(json!({ "entry": detail })))
}

/// Build public routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/filters", get(filters))
        .route("/search", get(search_entries))
        .route("/entries/:id", get(entry_detail))
}
