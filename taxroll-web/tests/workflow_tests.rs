//! Database-backed workflow tests
//!
//! These exercise the resolver, search, review, import, and audit paths
//! against a real PostgreSQL instance. Set TAXROLL_TEST_DATABASE_URL to a
//! disposable database to run them; they skip silently otherwise (CI
//! without PostgreSQL).
//!
//! Each test builds its own citation chain so tests stay independent of
//! one another's rows.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use sqlx::PgPool;
use tower::util::ServiceExt;
use uuid::Uuid;

use taxroll_common::db;
use taxroll_web::auth::RequestUser;
use taxroll_web::services::import::{self, ImportFormat};
use taxroll_web::services::resolver::{self, EntryPayload};
use taxroll_web::services::search::{self, SearchRequest};
use taxroll_web::{build_router, ApiError, AppState, ImportPolicy};

/// Connect to the test database, or None when the env var is unset.
async fn setup_test_db() -> Option<PgPool> {
    let url = match std::env::var("TAXROLL_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping test: TAXROLL_TEST_DATABASE_URL not set");
            return None;
        }
    };

    let pool = db::init_database(&url)
        .await
        .expect("should connect and initialize schema");
    Some(pool)
}

fn test_user() -> RequestUser {
    let mut headers = axum::http::HeaderMap::new();
    headers.insert("x-user-role", "transcriber".parse().unwrap());
    RequestUser::from_headers(&headers)
}

/// Insert a county -> repository -> source -> source item -> page chain and
/// return (county_id, page_id). A unique marker keeps rows disjoint across
/// tests sharing the database.
async fn seed_page(pool: &PgPool, district_id: Option<i64>) -> (i64, i64) {
    let marker = Uuid::new_v4().to_string();

    let county_id: i64 = sqlx::query_scalar(
        "INSERT INTO counties (name, state) VALUES ($1, 'VA') RETURNING id",
    )
    .bind(format!("County {}", marker))
    .fetch_one(pool)
    .await
    .unwrap();

    let repository_id: i64 = sqlx::query_scalar(
        "INSERT INTO repositories (name) VALUES ($1) RETURNING id",
    )
    .bind(format!("Repository {}", marker))
    .fetch_one(pool)
    .await
    .unwrap();

    let source_id: i64 = sqlx::query_scalar(
        "INSERT INTO sources (repository_id, title, year) VALUES ($1, $2, 1863) RETURNING id",
    )
    .bind(repository_id)
    .bind(format!("Source {}", marker))
    .fetch_one(pool)
    .await
    .unwrap();

    let source_item_id: i64 = sqlx::query_scalar(
        "INSERT INTO source_items (source_id, label) VALUES ($1, 'Roll 1') RETURNING id",
    )
    .bind(source_id)
    .fetch_one(pool)
    .await
    .unwrap();

    let page_id: i64 = sqlx::query_scalar(
        "INSERT INTO pages (source_item_id, county_id, district_id, page_number_label)
         VALUES ($1, $2, $3, 'p. 1') RETURNING id",
    )
    .bind(source_item_id)
    .bind(county_id)
    .bind(district_id)
    .fetch_one(pool)
    .await
    .unwrap();

    (county_id, page_id)
}

fn payload(page_id: i64, taxpayer: &str, enslaved: &str) -> EntryPayload {
    EntryPayload {
        page_id: Some(page_id),
        taxpayer_name_original: Some(taxpayer.to_string()),
        enslaved_name_original: Some(enslaved.to_string()),
        ..Default::default()
    }
}

async fn audit_rows(pool: &PgPool, action: &str, record_id: i64) -> i64 {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log WHERE action = $1 AND record_id = $2",
    )
    .bind(action)
    .bind(record_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

#[tokio::test]
async fn test_create_defaults_county_from_page() {
    let Some(pool) = setup_test_db().await else { return };
    let (county_id, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4();
    let created = resolver::create_entry(
        &pool,
        &user,
        &payload(page_id, &format!("John Doe {}", marker), &format!("Mary {}", marker)),
    )
    .await
    .unwrap();

    assert_eq!(created.entry.county_id, county_id);
    assert_eq!(created.entry.district_id, None);
    assert_eq!(created.entry.year, 1863);
    assert_eq!(created.details.status, "draft");

    // Exactly one audit row for the create.
    assert_eq!(audit_rows(&pool, "create", created.entry.id).await, 1);
}

#[tokio::test]
async fn test_create_rejects_mismatched_county() {
    let Some(pool) = setup_test_db().await else { return };
    let (county_id, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4();
    let mut bad = payload(page_id, &format!("John {}", marker), &format!("Mary {}", marker));
    bad.county_id = Some(county_id + 1_000_000);

    let err = resolver::create_entry(&pool, &user, &bad).await.unwrap_err();
    match err {
        ApiError::CountyMismatch(page_county) => assert_eq!(page_county, county_id),
        other => panic!("expected CountyMismatch, got {:?}", other),
    }

    // Nothing persisted for the failed create.
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tax_assessment_entries WHERE page_id = $1",
    )
    .bind(page_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_find_or_create_is_idempotent() {
    let Some(pool) = setup_test_db().await else { return };
    let (_, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4();
    let taxpayer = format!("Richard Roe {}", marker);
    let enslaved_a = format!("Isaac {}", marker);
    let enslaved_b = format!("Phillis {}", marker);

    let first = resolver::create_entry(&pool, &user, &payload(page_id, &taxpayer, &enslaved_a))
        .await
        .unwrap();
    let second = resolver::create_entry(&pool, &user, &payload(page_id, &taxpayer, &enslaved_b))
        .await
        .unwrap();

    // Same normalized taxpayer in the same scope resolves to the same row.
    assert_eq!(first.entry.taxpayer_id, second.entry.taxpayer_id);
    assert_ne!(first.entry.enslaved_person_id, second.entry.enslaved_person_id);
}

#[tokio::test]
async fn test_submit_and_decide_flow() {
    let Some(pool) = setup_test_db().await else { return };
    let (_, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4();
    let created = resolver::create_entry(
        &pool,
        &user,
        &payload(page_id, &format!("J Smith {}", marker), &format!("Hannah {}", marker)),
    )
    .await
    .unwrap();
    let entry_id = created.entry.id;

    let submitted = resolver::submit_entry(&pool, &user, entry_id).await.unwrap();
    assert_eq!(submitted.status, "pending_review");
    assert_eq!(audit_rows(&pool, "submit_for_review", entry_id).await, 1);

    // Resubmission from pending is allowed.
    let resubmitted = resolver::submit_entry(&pool, &user, entry_id).await.unwrap();
    assert_eq!(resubmitted.status, "pending_review");
}

#[tokio::test]
async fn test_submit_missing_entry_is_not_found() {
    let Some(pool) = setup_test_db().await else { return };
    let user = test_user();

    let err = resolver::submit_entry(&pool, &user, i64::MAX - 7)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
}

#[tokio::test]
async fn test_search_sees_only_approved_entries() {
    let Some(pool) = setup_test_db().await else { return };
    let (county_id, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4().simple().to_string();
    let enslaved = format!("Searchable {}", marker);
    let created = resolver::create_entry(
        &pool,
        &user,
        &payload(page_id, &format!("Owner {}", marker), &enslaved),
    )
    .await
    .unwrap();
    let entry_id = created.entry.id;

    let mut request = SearchRequest::new(&enslaved).unwrap();
    request.county_id = Some(county_id);

    // Draft: invisible to search and detail.
    let hits = search::search(&pool, &request).await.unwrap();
    assert!(hits.iter().all(|hit| hit.id != entry_id));
    assert!(search::detail(&pool, entry_id).await.unwrap().is_none());

    // Approve it.
    sqlx::query("UPDATE enslavement_details SET status = 'approved' WHERE entry_id = $1")
        .bind(entry_id)
        .execute(&pool)
        .await
        .unwrap();

    let hits = search::search(&pool, &request).await.unwrap();
    assert!(hits.iter().any(|hit| hit.id == entry_id));

    let detail = search::detail(&pool, entry_id).await.unwrap().unwrap();
    assert_eq!(detail.id, entry_id);
    assert_eq!(detail.county_id, county_id);
    // Citation chain is denormalized onto the row.
    assert!(detail.repository_name.starts_with("Repository"));
    assert!(detail.source_title.starts_with("Source"));
}

#[tokio::test]
async fn test_search_ranks_exact_name_first() {
    let Some(pool) = setup_test_db().await else { return };
    let (county_id, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4().simple().to_string();
    let exact = format!("phillis {}", marker);
    let near = format!("phyllis {}", marker);

    for name in [&exact, &near] {
        let created = resolver::create_entry(
            &pool,
            &user,
            &payload(page_id, &format!("Owner {}", marker), name),
        )
        .await
        .unwrap();
        sqlx::query("UPDATE enslavement_details SET status = 'approved' WHERE entry_id = $1")
            .bind(created.entry.id)
            .execute(&pool)
            .await
            .unwrap();
    }

    let mut request = SearchRequest::new(&exact).unwrap();
    request.county_id = Some(county_id);

    let hits = search::search(&pool, &request).await.unwrap();
    assert!(hits.len() >= 2, "expected both entries, got {}", hits.len());
    assert_eq!(hits[0].enslaved_name_original, exact);
    assert!(hits[0].rank_score > hits[1].rank_score);
}

#[tokio::test]
async fn test_bulk_import_skips_duplicates_and_bad_rows() {
    let Some(pool) = setup_test_db().await else { return };
    let (_, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4().simple().to_string();
    let csv = format!(
        "page_id,taxpayer_name_original,enslaved_name_original,sequence_on_page\n\
         {page},Alpha {m},Bette {m},1\n\
         {page},Alpha {m},Bette {m},1\n\
         {page},Gamma {m},,2\n\
         {page},Delta {m},Esther {m},3\n",
        page = page_id,
        m = marker
    );

    let outcome = import::bulk_import(
        &pool,
        ImportPolicy::default(),
        &user,
        ImportFormat::Csv,
        csv.as_bytes(),
    )
    .await
    .unwrap();

    assert_eq!(outcome.total, 4);
    assert_eq!(outcome.imported, 2);
    assert_eq!(outcome.dedupe_warnings.len(), 2);

    let duplicate = outcome
        .dedupe_warnings
        .iter()
        .find(|w| w.warning == "possible_duplicate")
        .expect("row 2 should be flagged as a duplicate");
    assert_eq!(duplicate.row, 2);
    assert!(duplicate.existing_entry_id.is_some());

    // The missing-name row became a warning, not a batch failure.
    assert!(outcome
        .dedupe_warnings
        .iter()
        .any(|w| w.row == 3 && w.warning.contains("enslaved_name_original")));

    // Exactly one audit row for the whole import.
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM audit_log
         WHERE action = 'bulk_import' AND new_data->>'imported' = '2'
           AND request_meta->>'request_id' = $1",
    )
    .bind(user.request_id.to_string())
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_decision_applies_and_audits_through_router() {
    let Some(pool) = setup_test_db().await else { return };
    let (_, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4();
    let created = resolver::create_entry(
        &pool,
        &user,
        &payload(page_id, &format!("Owner {}", marker), &format!("Dinah {}", marker)),
    )
    .await
    .unwrap();
    let entry_id = created.entry.id;
    resolver::submit_entry(&pool, &user, entry_id).await.unwrap();

    let reviewer_id: i64 = sqlx::query_scalar(
        "INSERT INTO app_users (email, role) VALUES ($1, 'reviewer') RETURNING id",
    )
    .bind(format!("reviewer-{}@example.org", marker))
    .fetch_one(&pool)
    .await
    .unwrap();

    let app = build_router(AppState::new(pool.clone(), ImportPolicy::default()));
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/review/entries/{}/decision", entry_id))
        .header("content-type", "application/json")
        .header("x-user-role", "reviewer")
        .header("x-user-id", reviewer_id.to_string())
        .body(Body::from(
            r#"{"decision": "approved", "notes": "checked against scan"}"#,
        ))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, remarks): (String, Option<String>) = sqlx::query_as(
        "SELECT status, remarks_original FROM enslavement_details WHERE entry_id = $1",
    )
    .bind(entry_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(status, "approved");
    // The note is appended on its own annotated line.
    assert!(remarks.unwrap().contains("[Review Note] checked against scan"));

    assert_eq!(audit_rows(&pool, "review_approved", entry_id).await, 1);
}

#[tokio::test]
async fn test_update_is_partial() {
    let Some(pool) = setup_test_db().await else { return };
    let (_, page_id) = seed_page(&pool, None).await;
    let user = test_user();

    let marker = Uuid::new_v4();
    let mut create = payload(page_id, &format!("Owner {}", marker), &format!("Silvia {}", marker));
    create.line_number = Some(4);
    create.remarks_original = Some("original remark".to_string());
    let created = resolver::create_entry(&pool, &user, &create).await.unwrap();

    let update = EntryPayload {
        line_number: Some(9),
        ..Default::default()
    };
    let updated = resolver::update_entry(&pool, &user, created.entry.id, &update)
        .await
        .unwrap();

    assert_eq!(updated.entry.line_number, Some(9));
    // Untouched fields survive the partial update.
    assert_eq!(updated.entry.taxpayer_id, created.entry.taxpayer_id);
    assert_eq!(
        updated.details.remarks_original.as_deref(),
        Some("original remark")
    );
    assert_eq!(audit_rows(&pool, "update", created.entry.id).await, 1);
}
