//! Append-only audit log writer
//!
//! Every mutating operation records one row. Callers pass the executor for
//! the transaction the mutation runs in, so the audit row commits or rolls
//! back together with the change it describes. A failed audit write
//! propagates and aborts the enclosing transaction.

use serde_json::Value;

use crate::Result;

/// One audit row to append. `old_data`/`new_data`/`request_meta` are opaque
/// snapshots; `None` where not applicable (create has no old state, delete
/// has no new state).
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub actor_user_id: Option<i64>,
    pub action: String,
    pub table_name: String,
    pub record_id: Option<i64>,
    pub old_data: Option<Value>,
    pub new_data: Option<Value>,
    pub request_meta: Option<Value>,
}

impl AuditRecord {
    pub fn new(action: &str, table_name: &str) -> Self {
        Self {
            actor_user_id: None,
            action: action.to_string(),
            table_name: table_name.to_string(),
            record_id: None,
            old_data: None,
            new_data: None,
            request_meta: None,
        }
    }

    pub fn actor(mut self, actor_user_id: Option<i64>) -> Self {
        self.actor_user_id = actor_user_id;
        self
    }

    pub fn record_id(mut self, record_id: i64) -> Self {
        self.record_id = Some(record_id);
        self
    }

    pub fn old_data(mut self, old_data: Value) -> Self {
        self.old_data = Some(old_data);
        self
    }

    pub fn new_data(mut self, new_data: Value) -> Self {
        self.new_data = Some(new_data);
        self
    }

    pub fn request_meta(mut self, request_meta: Option<Value>) -> Self {
        self.request_meta = request_meta;
        self
    }
}

/// Serialize a before/after snapshot; unserializable values degrade to
/// null.
pub fn snapshot<T: serde::Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Append one audit row using the caller's executor (pool or open
/// transaction).
pub async fn record<'e, E>(executor: E, rec: AuditRecord) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_log (
            actor_user_id,
            action,
            table_name,
            record_id,
            old_data,
            new_data,
            request_meta
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(rec.actor_user_id)
    .bind(&rec.action)
    .bind(&rec.table_name)
    .bind(rec.record_id)
    .bind(rec.old_data)
    .bind(rec.new_data)
    .bind(rec.request_meta)
    .execute(executor)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_defaults_to_nulls() {
        let rec = AuditRecord::new("create", "counties");
        assert_eq!(rec.action, "create");
        assert_eq!(rec.table_name, "counties");
        assert!(rec.actor_user_id.is_none());
        assert!(rec.record_id.is_none());
        assert!(rec.old_data.is_none());
        assert!(rec.new_data.is_none());
        assert!(rec.request_meta.is_none());
    }

    #[test]
    fn test_builder_sets_snapshots() {
        let rec = AuditRecord::new("update", "pages")
            .actor(Some(7))
            .record_id(42)
            .old_data(json!({"notes": null}))
            .new_data(json!({"notes": "rebound volume"}))
            .request_meta(Some(json!({"request_id": "abc"})));

        assert_eq!(rec.actor_user_id, Some(7));
        assert_eq!(rec.record_id, Some(42));
        assert_eq!(rec.old_data.unwrap()["notes"], Value::Null);
        assert_eq!(rec.new_data.unwrap()["notes"], "rebound volume");
    }
}
