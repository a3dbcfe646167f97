//! Row models shared across the taxroll services

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Application roles, least to most privileged ordering is not implied;
/// access is always an explicit allow-list per route group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Transcriber,
    Reviewer,
    Public,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Transcriber => "transcriber",
            Role::Reviewer => "reviewer",
            Role::Public => "public",
        }
    }

    /// Unknown or missing role strings degrade to `public`.
    pub fn parse(value: &str) -> Role {
        match value {
            "admin" => Role::Admin,
            "transcriber" => Role::Transcriber,
            "reviewer" => Role::Reviewer,
            _ => Role::Public,
        }
    }
}

/// Review-workflow status of an entry's details row.
///
/// Stored as TEXT with a CHECK constraint; this enum is the single place
/// the transition policy lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Draft,
    PendingReview,
    Approved,
    Rejected,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::PendingReview => "pending_review",
            EntryStatus::Approved => "approved",
            EntryStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<EntryStatus> {
        match value {
            "draft" => Some(EntryStatus::Draft),
            "pending_review" => Some(EntryStatus::PendingReview),
            "approved" => Some(EntryStatus::Approved),
            "rejected" => Some(EntryStatus::Rejected),
            _ => None,
        }
    }

    /// Submission transition table. Terminal states intentionally allow
    /// resubmission; tighten the terminal arms if that policy changes.
    pub fn may_submit(self) -> bool {
        match self {
            EntryStatus::Draft | EntryStatus::PendingReview => true,
            EntryStatus::Approved | EntryStatus::Rejected => true,
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct County {
    pub id: i64,
    pub name: String,
    pub state: Option<String>,
    pub notes: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct District {
    pub id: i64,
    pub county_id: Option<i64>,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub notes: Option<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Page {
    pub id: i64,
    pub source_item_id: i64,
    pub county_id: i64,
    pub district_id: Option<i64>,
    pub page_number_label: Option<String>,
    pub image_url: Option<String>,
    pub image_thumbnail_url: Option<String>,
    pub captured_at: Option<DateTime<Utc>>,
    pub needs_review: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Taxpayer {
    pub id: i64,
    pub county_id: i64,
    pub district_id: Option<i64>,
    pub name_original: String,
    pub name_normalized: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EnslavedPerson {
    pub id: i64,
    pub name_original: String,
    pub name_normalized: String,
    pub gender: Option<String>,
    pub approx_birth_year: Option<i32>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One transcribed line of a tax roll
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TaxAssessmentEntry {
    pub id: i64,
    pub page_id: i64,
    pub county_id: i64,
    pub district_id: Option<i64>,
    pub taxpayer_id: i64,
    pub enslaved_person_id: i64,
    pub line_number: Option<i32>,
    pub sequence_on_page: Option<i32>,
    pub year: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 1:1 extension of an entry carrying the transcribed descriptive fields
/// and the review-workflow status.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EnslavementDetails {
    pub entry_id: i64,
    pub category_original: Option<String>,
    pub age_original: Option<String>,
    pub age_years: Option<i32>,
    pub value_original: Option<String>,
    pub value_cents: Option<i64>,
    pub quantity_original: Option<String>,
    pub remarks_original: Option<String>,
    pub transcription_confidence: Option<String>,
    pub transcriber_user_id: Option<i64>,
    pub reviewed_by_user_id: Option<i64>,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub actor_user_id: Option<i64>,
    pub action: String,
    pub table_name: String,
    pub record_id: Option<i64>,
    pub old_data: Option<serde_json::Value>,
    pub new_data: Option<serde_json::Value>,
    pub request_meta: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AppUser {
    pub id: i64,
    pub email: String,
    pub role: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_defaults_to_public() {
        assert_eq!(Role::parse("admin"), Role::Admin);
        assert_eq!(Role::parse("reviewer"), Role::Reviewer);
        assert_eq!(Role::parse("transcriber"), Role::Transcriber);
        assert_eq!(Role::parse("root"), Role::Public);
        assert_eq!(Role::parse(""), Role::Public);
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            EntryStatus::Draft,
            EntryStatus::PendingReview,
            EntryStatus::Approved,
            EntryStatus::Rejected,
        ] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::parse("archived"), None);
    }

    #[test]
    fn test_submission_allowed_from_every_state() {
        for status in [
            EntryStatus::Draft,
            EntryStatus::PendingReview,
            EntryStatus::Approved,
            EntryStatus::Rejected,
        ] {
            assert!(status.may_submit());
        }
    }
}
