use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::{QueueError, Result};

/// Build the shared connection pool and verify the database answers.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.url)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("failed to connect: {e}")))?;

    health_check(&pool).await?;
    info!(max_connections = config.max_connections, "database connection established");

    Ok(pool)
}

pub async fn health_check(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("health check failed: {e}")))?;
    Ok(())
}
