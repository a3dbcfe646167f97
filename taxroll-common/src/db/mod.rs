//! Database access layer
//!
//! Pool initialization and idempotent schema creation. Connections come
//! from a shared pool and are acquired per operation/transaction; nothing
//! holds a process-wide session.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::Result;

pub mod models;
pub mod schema;

pub use schema::initialize_schema;

/// Initialize the connection pool and make sure the schema exists.
pub async fn init_database(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .connect(database_url)
        .await?;

    info!("Database connection pool established");

    schema::initialize_schema(&pool).await?;

    Ok(pool)
}

/// Cheap connectivity check used by the health endpoint.
pub async fn ping(pool: &PgPool) -> Result<()> {
    sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(pool).await?;
    Ok(())
}
