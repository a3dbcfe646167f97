//! Bulk transcription import
//!
//! Parses a CSV or JSON byte buffer into entry payloads and inserts them
//! through the resolver. The whole batch shares one transaction; each row
//! additionally runs in a savepoint so a bad row rolls back alone and
//! becomes a warning while its siblings land. Only a store-fatal error
//! aborts the batch.

use serde::Serialize;
use serde_json::json;
use sqlx::{Acquire, PgPool, Postgres, Transaction};

use taxroll_common::audit::{self, AuditRecord};
use taxroll_common::normalize;

use crate::auth::RequestUser;
use crate::error::{ApiError, ApiResult};
use crate::services::resolver::{self, EntryPayload};
use crate::ImportPolicy;

/// Declared format of the uploaded buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportFormat {
    #[default]
    Csv,
    Json,
}

impl ImportFormat {
    pub fn parse(value: &str) -> Option<ImportFormat> {
        match value {
            "csv" => Some(ImportFormat::Csv),
            "json" => Some(ImportFormat::Json),
            _ => None,
        }
    }
}

/// Why a row was skipped
#[derive(Debug, Clone, Serialize)]
pub struct ImportWarning {
    /// 1-indexed row number in the uploaded file
    pub row: usize,
    pub warning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub existing_entry_id: Option<i64>,
}

/// Bulk import result
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub imported: usize,
    pub total: usize,
    pub dedupe_warnings: Vec<ImportWarning>,
}

/// Parse the buffer into per-row results. A malformed row is carried as an
/// error string so it can degrade to a warning instead of failing the
/// request.
pub fn parse_rows(
    format: ImportFormat,
    bytes: &[u8],
) -> ApiResult<Vec<Result<EntryPayload, String>>> {
    match format {
        ImportFormat::Json => {
            let values: Vec<serde_json::Value> = serde_json::from_slice(bytes)
                .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?;
            Ok(values
                .into_iter()
                .map(|value| {
                    serde_json::from_value::<EntryPayload>(value).map_err(|e| e.to_string())
                })
                .collect())
        }
        ImportFormat::Csv => {
            let mut reader = csv::ReaderBuilder::new()
                .trim(csv::Trim::All)
                .from_reader(bytes);
            // An unreadable header row means the file itself is malformed.
            reader
                .headers()
                .map_err(|e| ApiError::BadRequest(format!("invalid CSV header: {}", e)))?;
            Ok(reader
                .deserialize::<EntryPayload>()
                .map(|row| row.map_err(|e| e.to_string()))
                .collect())
        }
    }
}

/// Look for an already-imported entry matching this row's dedupe key.
async fn find_duplicate(
    tx: &mut Transaction<'_, Postgres>,
    payload: &EntryPayload,
    policy: ImportPolicy,
) -> ApiResult<Option<i64>> {
    let (Some(page_id), Some(enslaved_name)) =
        (payload.page_id, payload.enslaved_name_original.as_deref())
    else {
        // Rows without the key fields fall through to validation.
        return Ok(None);
    };

    let enslaved_normalized = payload
        .enslaved_name_normalized
        .clone()
        .unwrap_or_else(|| normalize(enslaved_name));

    let existing: Option<i64> = if policy.dedupe_on_taxpayer {
        let taxpayer_normalized = payload
            .taxpayer_name_normalized
            .clone()
            .or_else(|| payload.taxpayer_name_original.as_deref().map(normalize));
        sqlx::query_scalar(
            r#"
            SELECT tae.id
            FROM tax_assessment_entries tae
            JOIN enslaved_people ep ON ep.id = tae.enslaved_person_id
            JOIN taxpayers t ON t.id = tae.taxpayer_id
            WHERE tae.page_id = $1
              AND COALESCE(tae.sequence_on_page, -1) = COALESCE($2, -1)
              AND ep.name_normalized = $3
              AND t.name_normalized = $4
            LIMIT 1
            "#,
        )
        .bind(page_id)
        .bind(payload.sequence_on_page)
        .bind(&enslaved_normalized)
        .bind(taxpayer_normalized.unwrap_or_default())
        .fetch_optional(&mut **tx)
        .await?
    } else {
        sqlx::query_scalar(
            r#"
            SELECT tae.id
            FROM tax_assessment_entries tae
            JOIN enslaved_people ep ON ep.id = tae.enslaved_person_id
            WHERE tae.page_id = $1
              AND COALESCE(tae.sequence_on_page, -1) = COALESCE($2, -1)
              AND ep.name_normalized = $3
            LIMIT 1
            "#,
        )
        .bind(page_id)
        .bind(payload.sequence_on_page)
        .bind(&enslaved_normalized)
        .fetch_optional(&mut **tx)
        .await?
    };

    Ok(existing)
}

/// Import a parsed batch: one outer transaction, one savepoint per row,
/// one audit row for the whole request.
pub async fn bulk_import(
    pool: &PgPool,
    policy: ImportPolicy,
    user: &RequestUser,
    format: ImportFormat,
    bytes: &[u8],
) -> ApiResult<ImportOutcome> {
    let rows = parse_rows(format, bytes)?;
    let total = rows.len();

    let mut imported = 0usize;
    let mut warnings: Vec<ImportWarning> = Vec::new();

    let mut tx = pool.begin().await?;

    for (index, row) in rows.into_iter().enumerate() {
        let row_number = index + 1;

        let payload = match row {
            Ok(payload) => payload,
            Err(reason) => {
                warnings.push(ImportWarning {
                    row: row_number,
                    warning: format!("malformed_row: {}", reason),
                    existing_entry_id: None,
                });
                continue;
            }
        };

        if let Some(existing_entry_id) = find_duplicate(&mut tx, &payload, policy).await? {
            warnings.push(ImportWarning {
                row: row_number,
                warning: "possible_duplicate".to_string(),
                existing_entry_id: Some(existing_entry_id),
            });
            continue;
        }

        let mut savepoint = tx.begin().await?;
        match resolver::insert_entry(&mut savepoint, user, &payload).await {
            Ok(_) => {
                savepoint.commit().await?;
                imported += 1;
            }
            Err(err) if err.is_recoverable_row_error() => {
                savepoint.rollback().await?;
                warnings.push(ImportWarning {
                    row: row_number,
                    warning: err.to_string(),
                    existing_entry_id: None,
                });
            }
            // Store-fatal: dropping the outer transaction rolls back the
            // whole batch.
            Err(err) => return Err(err),
        }
    }

    audit::record(
        &mut *tx,
        AuditRecord::new("bulk_import", "tax_assessment_entries")
            .actor(user.id)
            .new_data(json!({
                "imported": imported,
                "rows": total,
                "dedupe_warnings": warnings.len(),
            }))
            .request_meta(user.audit_meta()),
    )
    .await?;

    tx.commit().await?;

    Ok(ImportOutcome {
        imported,
        total,
        dedupe_warnings: warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parse() {
        assert_eq!(ImportFormat::parse("csv"), Some(ImportFormat::Csv));
        assert_eq!(ImportFormat::parse("json"), Some(ImportFormat::Json));
        assert_eq!(ImportFormat::parse("xlsx"), None);
    }

    #[test]
    fn test_parse_csv_rows() {
        let data = b"page_id,taxpayer_name_original,enslaved_name_original,sequence_on_page\n\
            1,John Doe,Mary,3\n\
            1,Jane Roe,Isaac,\n";
        let rows = parse_rows(ImportFormat::Csv, data).unwrap();
        assert_eq!(rows.len(), 2);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.page_id, Some(1));
        assert_eq!(first.taxpayer_name_original.as_deref(), Some("John Doe"));
        assert_eq!(first.sequence_on_page, Some(3));

        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.sequence_on_page, None);
    }

    #[test]
    fn test_parse_csv_malformed_row_degrades() {
        let data = b"page_id,enslaved_name_original\n\
            not-a-number,Mary\n\
            2,Isaac\n";
        let rows = parse_rows(ImportFormat::Csv, data).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].is_err());
        assert_eq!(rows[1].as_ref().unwrap().page_id, Some(2));
    }

    #[test]
    fn test_parse_json_rows() {
        let data = br#"[
            {"page_id": 4, "taxpayer_name_original": "John Doe", "enslaved_name_original": "Mary"},
            {"page_id": "oops"}
        ]"#;
        let rows = parse_rows(ImportFormat::Json, data).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].as_ref().unwrap().page_id, Some(4));
        assert!(rows[1].is_err());
    }

    #[test]
    fn test_parse_json_non_array_rejected() {
        let err = parse_rows(ImportFormat::Json, b"{\"page_id\": 1}").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
    }
}
