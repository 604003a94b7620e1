//! Example consumer: a separate Rust project that serves gridstore-sdk record routes over PostgreSQL.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Or from this directory: `cargo run`

use gridstore_sdk::{app, ensure_database_exists, load_from_path, HeaderIdentity, PgRecordStore, Settings};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("gridstore_sdk=info")),
        )
        .init();

    let registry = Arc::new(load_from_path(&settings.schema_path).await?);
    tracing::info!(
        schema = %settings.schema_path.display(),
        record_types = registry.types().len(),
        "schema loaded"
    );

    ensure_database_exists(&settings.database_url).await?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(&settings.database_url)
        .await?;

    let store = Arc::new(PgRecordStore::new(pool, registry.clone()));
    let identity = Arc::new(HeaderIdentity::new(&settings.user_header)?);
    let router = app(store, registry, identity, &settings.app_options())?;

    let listener = TcpListener::bind(settings.bind).await?;
    tracing::info!("Example consumer listening on http://{}{}", listener.local_addr()?, settings.mount);
    axum::serve(listener, router).await?;
    Ok(())
}
