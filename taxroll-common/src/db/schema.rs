//! Idempotent schema initialization
//!
//! Every table is created with CREATE TABLE IF NOT EXISTS so startup is
//! safe against an already-initialized database. The unique indexes on the
//! normalization keys are load-bearing: the resolver's find-or-create
//! relies on them to settle concurrent inserts (ON CONFLICT + re-fetch).

use sqlx::PgPool;

use crate::Result;

/// Create extensions, tables, and indexes if needed.
pub async fn initialize_schema(pool: &PgPool) -> Result<()> {
    // similarity() for fuzzy search ranking
    sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
        .execute(pool)
        .await?;

    create_app_users_table(pool).await?;
    create_counties_table(pool).await?;
    create_districts_table(pool).await?;
    create_repositories_table(pool).await?;
    create_sources_table(pool).await?;
    create_source_items_table(pool).await?;
    create_pages_table(pool).await?;
    create_taxpayers_table(pool).await?;
    create_enslaved_people_table(pool).await?;
    create_entries_table(pool).await?;
    create_details_table(pool).await?;
    create_audit_log_table(pool).await?;

    Ok(())
}

async fn create_app_users_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS app_users (
            id BIGSERIAL PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL DEFAULT 'public'
                CHECK (role IN ('admin', 'transcriber', 'reviewer', 'public')),
            display_name TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_counties_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS counties (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            state TEXT,
            notes TEXT,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_counties_name ON counties(name)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_districts_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS districts (
            id BIGSERIAL PRIMARY KEY,
            county_id BIGINT REFERENCES counties(id),
            name TEXT NOT NULL,
            type TEXT,
            notes TEXT,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_districts_county ON districts(county_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_repositories_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            id BIGSERIAL PRIMARY KEY,
            name TEXT NOT NULL,
            location TEXT,
            url TEXT,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sources_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sources (
            id BIGSERIAL PRIMARY KEY,
            repository_id BIGINT NOT NULL REFERENCES repositories(id),
            title TEXT NOT NULL,
            county_id BIGINT REFERENCES counties(id),
            year INTEGER,
            format TEXT,
            call_number TEXT,
            microfilm_roll TEXT,
            citation_preferred TEXT,
            rights TEXT,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sources_repository ON sources(repository_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_source_items_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_items (
            id BIGSERIAL PRIMARY KEY,
            source_id BIGINT NOT NULL REFERENCES sources(id),
            label TEXT,
            date_range TEXT,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_source_items_source ON source_items(source_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_pages_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id BIGSERIAL PRIMARY KEY,
            source_item_id BIGINT NOT NULL REFERENCES source_items(id),
            county_id BIGINT NOT NULL REFERENCES counties(id),
            district_id BIGINT REFERENCES districts(id),
            page_number_label TEXT,
            image_url TEXT,
            image_thumbnail_url TEXT,
            captured_at TIMESTAMPTZ,
            needs_review BOOLEAN NOT NULL DEFAULT FALSE,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_source_item ON pages(source_item_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_county ON pages(county_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_taxpayers_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS taxpayers (
            id BIGSERIAL PRIMARY KEY,
            county_id BIGINT NOT NULL REFERENCES counties(id),
            district_id BIGINT REFERENCES districts(id),
            name_original TEXT NOT NULL,
            name_normalized TEXT NOT NULL,
            notes TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One canonical row per (county, district-or-sentinel, normalized name).
    // The COALESCE sentinel makes the null-district scope participate in
    // uniqueness; NULLs would otherwise never conflict.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_taxpayers_identity
        ON taxpayers (county_id, COALESCE(district_id, -1), name_normalized)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_enslaved_people_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enslaved_people (
            id BIGSERIAL PRIMARY KEY,
            name_original TEXT NOT NULL,
            name_normalized TEXT NOT NULL,
            gender TEXT,
            approx_birth_year INTEGER,
            notes TEXT,
            name_tokens TSVECTOR GENERATED ALWAYS AS (
                to_tsvector('simple',
                    COALESCE(name_original, '') || ' ' || COALESCE(name_normalized, ''))
            ) STORED,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One canonical row per normalized name (global scope)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_enslaved_people_name
        ON enslaved_people (name_normalized)
        "#,
    )
    .execute(pool)
    .await?;

    // Search accelerators: full-text and trigram
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_enslaved_people_tokens ON enslaved_people USING GIN (name_tokens)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_enslaved_people_trgm ON enslaved_people USING GIN (name_normalized gin_trgm_ops)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_entries_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tax_assessment_entries (
            id BIGSERIAL PRIMARY KEY,
            page_id BIGINT NOT NULL REFERENCES pages(id),
            county_id BIGINT NOT NULL REFERENCES counties(id),
            district_id BIGINT REFERENCES districts(id),
            taxpayer_id BIGINT NOT NULL REFERENCES taxpayers(id),
            enslaved_person_id BIGINT NOT NULL REFERENCES enslaved_people(id),
            line_number INTEGER,
            sequence_on_page INTEGER,
            year INTEGER NOT NULL DEFAULT 1863,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_page ON tax_assessment_entries(page_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_enslaved ON tax_assessment_entries(enslaved_person_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_taxpayer ON tax_assessment_entries(taxpayer_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_details_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS enslavement_details (
            entry_id BIGINT PRIMARY KEY
                REFERENCES tax_assessment_entries(id) ON DELETE CASCADE,
            category_original TEXT,
            age_original TEXT,
            age_years INTEGER,
            value_original TEXT,
            value_cents BIGINT,
            quantity_original TEXT,
            remarks_original TEXT,
            transcription_confidence TEXT,
            transcriber_user_id BIGINT REFERENCES app_users(id),
            reviewed_by_user_id BIGINT REFERENCES app_users(id),
            status TEXT NOT NULL DEFAULT 'draft'
                CHECK (status IN ('draft', 'pending_review', 'approved', 'rejected')),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_details_status ON enslavement_details(status)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_audit_log_table(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id BIGSERIAL PRIMARY KEY,
            actor_user_id BIGINT,
            action TEXT NOT NULL,
            table_name TEXT NOT NULL,
            record_id BIGINT,
            old_data JSONB,
            new_data JSONB,
            request_meta JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_record ON audit_log(table_name, record_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_audit_log_created ON audit_log(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
