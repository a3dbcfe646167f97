//! Admin table API
//!
//! Generic CRUD over the reference tables behind the citation chain. The
//! dispatch is a closed set: `AdminTable` enumerates every editable table
//! and carries its static column spec, so an unknown table or column can
//! never reach SQL. Gated to the admin role by the router.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query as SqlxQuery;
use sqlx::{Column, Postgres, Row, TypeInfo, ValueRef};

use taxroll_common::audit::{self, AuditRecord};
use taxroll_common::db::models::AuditLogEntry;

use crate::auth::RequestUser;
use crate::error::{ApiError, ApiResult};
use crate::pagination::{calculate_pagination, PAGE_SIZE};
use crate::AppState;

/// Field type of an editable column; drives JSON-to-SQL binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    BigInt,
    Integer,
    Boolean,
    Timestamp,
}

/// One editable column of an admin table
#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl ColumnSpec {
    const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// The closed set of admin-editable tables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminTable {
    Counties,
    Districts,
    Repositories,
    Sources,
    SourceItems,
    Pages,
}

const COUNTY_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("name", FieldKind::Text),
    ColumnSpec::new("state", FieldKind::Text),
    ColumnSpec::new("notes", FieldKind::Text),
    ColumnSpec::new("enabled", FieldKind::Boolean),
];

const DISTRICT_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("county_id", FieldKind::BigInt),
    ColumnSpec::new("name", FieldKind::Text),
    ColumnSpec::new("type", FieldKind::Text),
    ColumnSpec::new("notes", FieldKind::Text),
    ColumnSpec::new("enabled", FieldKind::Boolean),
];

const REPOSITORY_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("name", FieldKind::Text),
    ColumnSpec::new("location", FieldKind::Text),
    ColumnSpec::new("url", FieldKind::Text),
    ColumnSpec::new("notes", FieldKind::Text),
];

const SOURCE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("repository_id", FieldKind::BigInt),
    ColumnSpec::new("title", FieldKind::Text),
    ColumnSpec::new("county_id", FieldKind::BigInt),
    ColumnSpec::new("year", FieldKind::Integer),
    ColumnSpec::new("format", FieldKind::Text),
    ColumnSpec::new("call_number", FieldKind::Text),
    ColumnSpec::new("microfilm_roll", FieldKind::Text),
    ColumnSpec::new("citation_preferred", FieldKind::Text),
    ColumnSpec::new("rights", FieldKind::Text),
    ColumnSpec::new("notes", FieldKind::Text),
];

const SOURCE_ITEM_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("source_id", FieldKind::BigInt),
    ColumnSpec::new("label", FieldKind::Text),
    ColumnSpec::new("date_range", FieldKind::Text),
    ColumnSpec::new("notes", FieldKind::Text),
];

const PAGE_COLUMNS: &[ColumnSpec] = &[
    ColumnSpec::new("source_item_id", FieldKind::BigInt),
    ColumnSpec::new("county_id", FieldKind::BigInt),
    ColumnSpec::new("district_id", FieldKind::BigInt),
    ColumnSpec::new("page_number_label", FieldKind::Text),
    ColumnSpec::new("image_url", FieldKind::Text),
    ColumnSpec::new("image_thumbnail_url", FieldKind::Text),
    ColumnSpec::new("captured_at", FieldKind::Timestamp),
    ColumnSpec::new("needs_review", FieldKind::Boolean),
    ColumnSpec::new("notes", FieldKind::Text),
];

impl AdminTable {
    pub fn from_path(name: &str) -> Option<AdminTable> {
        match name {
            "counties" => Some(AdminTable::Counties),
            "districts" => Some(AdminTable::Districts),
            "repositories" => Some(AdminTable::Repositories),
            "sources" => Some(AdminTable::Sources),
            "source_items" => Some(AdminTable::SourceItems),
            "pages" => Some(AdminTable::Pages),
            _ => None,
        }
    }

    pub const fn table_name(self) -> &'static str {
        match self {
            AdminTable::Counties => "counties",
            AdminTable::Districts => "districts",
            AdminTable::Repositories => "repositories",
            AdminTable::Sources => "sources",
            AdminTable::SourceItems => "source_items",
            AdminTable::Pages => "pages",
        }
    }

    pub const fn columns(self) -> &'static [ColumnSpec] {
        match self {
            AdminTable::Counties => COUNTY_COLUMNS,
            AdminTable::Districts => DISTRICT_COLUMNS,
            AdminTable::Repositories => REPOSITORY_COLUMNS,
            AdminTable::Sources => SOURCE_COLUMNS,
            AdminTable::SourceItems => SOURCE_ITEM_COLUMNS,
            AdminTable::Pages => PAGE_COLUMNS,
        }
    }
}

fn parse_table(name: &str) -> ApiResult<AdminTable> {
    AdminTable::from_path(name)
        .ok_or_else(|| ApiError::NotFound(format!("unknown table: {}", name)))
}

/// Columns of the payload that exist in the table's spec, in spec order.
/// JSON null counts as provided (an explicit clear).
fn provided_columns<'a>(
    table: AdminTable,
    payload: &'a Value,
) -> ApiResult<Vec<(&'static ColumnSpec, &'a Value)>> {
    let object = payload
        .as_object()
        .ok_or_else(|| ApiError::BadRequest("payload must be a JSON object".to_string()))?;

    let selected: Vec<(&'static ColumnSpec, &'a Value)> = table
        .columns()
        .iter()
        .filter_map(|spec| object.get(spec.name).map(|value| (spec, value)))
        .collect();

    if selected.is_empty() {
        return Err(ApiError::BadRequest("no fields provided".to_string()));
    }

    Ok(selected)
}

/// Bind one JSON value according to the column's declared kind.
fn bind_value<'q>(
    query: SqlxQuery<'q, Postgres, PgArguments>,
    spec: &ColumnSpec,
    value: &Value,
) -> ApiResult<SqlxQuery<'q, Postgres, PgArguments>> {
    if value.is_null() {
        return Ok(match spec.kind {
            FieldKind::Text => query.bind(None::<String>),
            FieldKind::BigInt => query.bind(None::<i64>),
            FieldKind::Integer => query.bind(None::<i32>),
            FieldKind::Boolean => query.bind(None::<bool>),
            FieldKind::Timestamp => query.bind(None::<DateTime<Utc>>),
        });
    }

    let mismatch = || ApiError::BadRequest(format!("invalid value for field {}", spec.name));

    Ok(match spec.kind {
        FieldKind::Text => query.bind(value.as_str().ok_or_else(mismatch)?.to_string()),
        FieldKind::BigInt => query.bind(value.as_i64().ok_or_else(mismatch)?),
        FieldKind::Integer => {
            let v = value.as_i64().ok_or_else(mismatch)?;
            query.bind(i32::try_from(v).map_err(|_| mismatch())?)
        }
        FieldKind::Boolean => query.bind(value.as_bool().ok_or_else(mismatch)?),
        FieldKind::Timestamp => {
            let raw = value.as_str().ok_or_else(mismatch)?;
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|_| mismatch())?
                .with_timezone(&Utc);
            query.bind(parsed)
        }
    })
}

/// Render one row of an admin table as a JSON object, keyed by column name.
fn row_to_json(row: &PgRow) -> Value {
    let mut object = serde_json::Map::new();

    for (index, column) in row.columns().iter().enumerate() {
        let is_null = row
            .try_get_raw(index)
            .map(|raw| raw.is_null())
            .unwrap_or(true);

        let value = if is_null {
            Value::Null
        } else {
            match column.type_info().name() {
                "BOOL" => row.try_get::<bool, _>(index).map(Value::Bool).unwrap_or(Value::Null),
                "INT8" => row.try_get::<i64, _>(index).map(|v| json!(v)).unwrap_or(Value::Null),
                "INT4" => row.try_get::<i32, _>(index).map(|v| json!(v)).unwrap_or(Value::Null),
                "FLOAT8" => row.try_get::<f64, _>(index).map(|v| json!(v)).unwrap_or(Value::Null),
                "TIMESTAMPTZ" => row
                    .try_get::<DateTime<Utc>, _>(index)
                    .map(|v| json!(v))
                    .unwrap_or(Value::Null),
                "JSON" | "JSONB" => row.try_get::<Value, _>(index).unwrap_or(Value::Null),
                _ => row
                    .try_get::<String, _>(index)
                    .map(Value::String)
                    .unwrap_or(Value::Null),
            }
        };

        object.insert(column.name().to_string(), value);
    }

    Value::Object(object)
}

/// GET /api/admin/:table
///
/// Latest 200 rows, newest first.
pub async fn list_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
) -> ApiResult<Json<Vec<Value>>> {
    let table = parse_table(&table)?;

    let sql = format!(
        "SELECT * FROM {} ORDER BY id DESC LIMIT 200",
        table.table_name()
    );
    let rows = sqlx::query(&sql).fetch_all(&state.db).await?;

    Ok(Json(rows.iter().map(row_to_json).collect()))
}

/// POST /api/admin/:table
pub async fn create_row(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Path(table): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let table = parse_table(&table)?;
    let selected = provided_columns(table, &payload)?;

    let names: Vec<&str> = selected.iter().map(|(spec, _)| spec.name).collect();
    let placeholders: Vec<String> = (1..=selected.len()).map(|i| format!("${}", i)).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        table.table_name(),
        names.join(", "),
        placeholders.join(", ")
    );

    let mut query = sqlx::query(&sql);
    for (spec, value) in &selected {
        query = bind_value(query, spec, value)?;
    }

    let mut tx = state.db.begin().await?;

    let row = query.fetch_one(&mut *tx).await?;
    let created = row_to_json(&row);
    let record_id = created.get("id").and_then(Value::as_i64);

    let mut record = AuditRecord::new("create", table.table_name())
        .actor(user.id)
        .new_data(created.clone())
        .request_meta(user.audit_meta());
    if let Some(id) = record_id {
        record = record.record_id(id);
    }
    audit::record(&mut *tx, record).await?;

    tx.commit().await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn fetch_row(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    table: AdminTable,
    id: i64,
) -> ApiResult<Option<Value>> {
    let sql = format!("SELECT * FROM {} WHERE id = $1", table.table_name());
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut **tx).await?;
    Ok(row.as_ref().map(row_to_json))
}

/// PUT /api/admin/:table/:id
pub async fn update_row(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Path((table, id)): Path<(String, i64)>,
    Json(payload): Json<Value>,
) -> ApiResult<Json<Value>> {
    let table = parse_table(&table)?;
    let selected = provided_columns(table, &payload)?;

    let mut tx = state.db.begin().await?;

    let existing = fetch_row(&mut tx, table, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} {} not found", table.table_name(), id)))?;

    let assignments: Vec<String> = selected
        .iter()
        .enumerate()
        .map(|(i, (spec, _))| format!("{} = ${}", spec.name, i + 1))
        .collect();
    let sql = format!(
        "UPDATE {} SET {}, updated_at = NOW() WHERE id = ${} RETURNING *",
        table.table_name(),
        assignments.join(", "),
        selected.len() + 1
    );

    let mut query = sqlx::query(&sql);
    for (spec, value) in &selected {
        query = bind_value(query, spec, value)?;
    }
    query = query.bind(id);

    let row = query.fetch_one(&mut *tx).await?;
    let updated = row_to_json(&row);

    audit::record(
        &mut *tx,
        AuditRecord::new("update", table.table_name())
            .actor(user.id)
            .record_id(id)
            .old_data(existing)
            .new_data(updated.clone())
            .request_meta(user.audit_meta()),
    )
    .await?;

    tx.commit().await?;
    Ok(Json(updated))
}

/// DELETE /api/admin/:table/:id
pub async fn delete_row(
    State(state): State<AppState>,
    Extension(user): Extension<RequestUser>,
    Path((table, id)): Path<(String, i64)>,
) -> ApiResult<StatusCode> {
    let table = parse_table(&table)?;

    let mut tx = state.db.begin().await?;

    let existing = fetch_row(&mut tx, table, id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("{} {} not found", table.table_name(), id)))?;

    let sql = format!("DELETE FROM {} WHERE id = $1", table.table_name());
    sqlx::query(&sql).bind(id).execute(&mut *tx).await?;

    audit::record(
        &mut *tx,
        AuditRecord::new("delete", table.table_name())
            .actor(user.id)
            .record_id(id)
            .old_data(existing)
            .request_meta(user.audit_meta()),
    )
    .await?;

    tx.commit().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct LookupRow {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, sqlx::FromRow, Serialize)]
pub struct DistrictLookupRow {
    pub id: i64,
    pub county_id: Option<i64>,
    pub name: String,
}

/// GET /api/admin/lookup/counties
pub async fn lookup_counties(State(state): State<AppState>) -> ApiResult<Json<Vec<LookupRow>>> {
    let rows = sqlx::query_as::<_, LookupRow>("SELECT id, name FROM counties ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct DistrictLookupQuery {
    pub county_id: Option<i64>,
}

/// GET /api/admin/lookup/districts[?county_id=]
pub async fn lookup_districts(
    State(state): State<AppState>,
    Query(query): Query<DistrictLookupQuery>,
) -> ApiResult<Json<Vec<DistrictLookupRow>>> {
    let rows = sqlx::query_as::<_, DistrictLookupRow>(
        r#"
        SELECT id, county_id, name
        FROM districts
        WHERE ($1::BIGINT IS NULL OR county_id = $1)
        ORDER BY name
        "#,
    )
    .bind(query.county_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub total_rows: i64,
    pub page: i64,
    pub page_size: i64,
    pub total_pages: i64,
    pub rows: Vec<AuditLogEntry>,
}

/// GET /api/admin/audit-log?page=N
///
/// Paginated audit trail, newest first.
pub async fn audit_log(
    State(state): State<AppState>,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<Json<AuditLogResponse>> {
    let total_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM audit_log")
        .fetch_one(&state.db)
        .await?;

    let pagination = calculate_pagination(total_rows, query.page.unwrap_or(1));

    let rows = sqlx::query_as::<_, AuditLogEntry>(
        "SELECT * FROM audit_log ORDER BY id DESC LIMIT $1 OFFSET $2",
    )
    .bind(PAGE_SIZE)
    .bind(pagination.offset)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(AuditLogResponse {
        total_rows,
        page: pagination.page,
        page_size: PAGE_SIZE,
        total_pages: pagination.total_pages,
        rows,
    }))
}

/// Build admin routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/lookup/counties", get(lookup_counties))
        .route("/lookup/districts", get(lookup_districts))
        .route("/audit-log", get(audit_log))
        .route("/:table", get(list_rows).post(create_row))
        .route("/:table/:id", put(update_row).delete(delete_row))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_dispatch_is_closed() {
        assert_eq!(AdminTable::from_path("counties"), Some(AdminTable::Counties));
        assert_eq!(AdminTable::from_path("pages"), Some(AdminTable::Pages));
        assert_eq!(AdminTable::from_path("audit_log"), None);
        assert_eq!(AdminTable::from_path("enslaved_people"), None);
        assert_eq!(AdminTable::from_path("taxpayers; DROP TABLE pages"), None);
    }

    #[test]
    fn test_column_specs_cover_expected_fields() {
        let page_columns: Vec<&str> = AdminTable::Pages
            .columns()
            .iter()
            .map(|spec| spec.name)
            .collect();
        assert!(page_columns.contains(&"source_item_id"));
        assert!(page_columns.contains(&"captured_at"));
        assert!(!page_columns.contains(&"id"));
        assert!(!page_columns.contains(&"created_at"));
    }

    #[test]
    fn test_provided_columns_ignores_unknown_keys() {
        let payload = json!({
            "name": "Culpeper",
            "state": "VA",
            "id": 99,
            "bogus": true
        });
        let selected = provided_columns(AdminTable::Counties, &payload).unwrap();
        let names: Vec<&str> = selected.iter().map(|(spec, _)| spec.name).collect();
        assert_eq!(names, vec!["name", "state"]);
    }

    #[test]
    fn test_provided_columns_requires_fields() {
        let err = provided_columns(AdminTable::Counties, &json!({"bogus": 1})).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));

        let err = provided_columns(AdminTable::Counties, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_null_counts_as_provided() {
        let payload = json!({"notes": null});
        let selected = provided_columns(AdminTable::Counties, &payload).unwrap();
        assert_eq!(selected.len(), 1);
        assert!(selected[0].1.is_null());
    }
}
