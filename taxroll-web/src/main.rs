//! taxroll-web - Genealogical tax-roll archive server
//!
//! Public search over transcribed 1863 tax-assessment records plus the
//! internal transcription/review/admin API.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use taxroll_common::config::Settings;
use taxroll_web::{build_router, AppState, ImportPolicy};

#[derive(Debug, Parser)]
#[command(name = "taxroll-web", about = "Tax-roll archive API server")]
struct Args {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Listen address, e.g. 127.0.0.1:8463
    #[arg(long, env = "TAXROLL_BIND")]
    bind: Option<String>,

    /// Optional TOML config file
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting taxroll-web v{}", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();
    let settings = Settings::resolve(args.database_url, args.bind, args.config.as_deref())?;

    let pool = taxroll_common::db::init_database(&settings.database_url).await?;
    info!("Database schema initialized");

    let state = AppState::new(
        pool,
        ImportPolicy {
            dedupe_on_taxpayer: settings.dedupe_on_taxpayer,
        },
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&settings.bind).await?;
    info!("taxroll-web listening on http://{}", settings.bind);
    info!("Health check: http://{}/health", settings.bind);

    axum::serve(listener, app).await?;

    Ok(())
}
