//! Database pool construction

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

/// Create the application connection pool.
///
/// Sized for request-per-call handlers; statement-level timeouts are left to
/// the database so PgBouncer-style poolers keep working.
pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .idle_timeout(Duration::from_secs(300))
        .connect(database_url)
        .await?;

    tracing::info!("Database pool created");
    Ok(pool)
}
