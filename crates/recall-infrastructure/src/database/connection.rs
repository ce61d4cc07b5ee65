//! Database connection pool

use recall_shared::config::DatabaseSettings;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::info;

/// Fixed `pool_size` connections plus up to `max_overflow` more; each
/// connection is validated before it is handed out.
pub async fn create_pool(settings: &DatabaseSettings) -> Result<PgPool, sqlx::Error> {
    info!(
        "Connecting to PostgreSQL at {}:{}/{} (pool {}+{})",
        settings.host, settings.port, settings.name, settings.pool_size, settings.max_overflow
    );

    let pool = PgPoolOptions::new()
        .min_connections(settings.pool_size)
        .max_connections(settings.max_connections())
        .acquire_timeout(Duration::from_secs(settings.connect_timeout_secs))
        .idle_timeout(Duration::from_secs(600))
        .test_before_acquire(true)
        .connect(&settings.connection_url())
        .await?;

    check_connection(&pool).await?;
    info!("PostgreSQL connection pool ready");
    Ok(pool)
}

pub async fn check_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
