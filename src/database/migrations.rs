//! Schema migrations.
//!
//! Migrations are plain SQL files under `migrations/`, named
//! `<version>_<description>.sql` with a sortable numeric version prefix.
//! Applied versions are tracked in a `schema_migrations` table so reruns
//! are no-ops.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sqlx::{PgPool, Row};
use tracing::info;

use crate::error::{QueueError, Result};

#[derive(Debug, Clone)]
struct Migration {
    version: String,
    name: String,
    path: PathBuf,
}

/// Apply all pending migrations from `dir`, in version order.
pub async fn run_migrations(pool: &PgPool, dir: impl AsRef<Path>) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
             version TEXT PRIMARY KEY,
             applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| QueueError::DatabaseError(format!("failed to create migrations table: {e}")))?;

    let applied: Vec<String> = sqlx::query("SELECT version FROM schema_migrations")
        .fetch_all(pool)
        .await
        .map_err(|e| QueueError::DatabaseError(format!("failed to read applied versions: {e}")))?
        .into_iter()
        .map(|row| row.get::<String, _>("version"))
        .collect();

    for migration in discover_migrations(dir.as_ref())?.into_values() {
        let version = &migration.version;
        if applied.contains(version) {
            continue;
        }

        let sql = std::fs::read_to_string(&migration.path).map_err(|e| {
            QueueError::DatabaseError(format!(
                "failed to read migration {}: {e}",
                migration.path.display()
            ))
        })?;

        let mut tx = pool
            .begin()
            .await
            .map_err(|e| QueueError::DatabaseError(format!("failed to begin migration: {e}")))?;

        sqlx::raw_sql(&sql)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                QueueError::DatabaseError(format!("migration {version} failed: {e}"))
            })?;

        sqlx::query("INSERT INTO schema_migrations (version) VALUES ($1)")
            .bind(version)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                QueueError::DatabaseError(format!("failed to record migration {version}: {e}"))
            })?;

        tx.commit()
            .await
            .map_err(|e| QueueError::DatabaseError(format!("failed to commit migration: {e}")))?;

        info!(version = %version, name = %migration.name, "applied migration");
    }

    Ok(())
}

fn discover_migrations(dir: &Path) -> Result<BTreeMap<String, Migration>> {
    let mut migrations = BTreeMap::new();

    let entries = std::fs::read_dir(dir).map_err(|e| {
        QueueError::DatabaseError(format!(
            "failed to read migrations directory {}: {e}",
            dir.display()
        ))
    })?;

    for entry in entries {
        let entry = entry
            .map_err(|e| QueueError::DatabaseError(format!("failed to list migration: {e}")))?;
        let path = entry.path();

        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !file_name.ends_with(".sql") {
            continue;
        }

        let stem = file_name.trim_end_matches(".sql");
        let Some((version, name)) = stem.split_once('_') else {
            continue;
        };

        migrations.insert(
            version.to_string(),
            Migration {
                version: version.to_string(),
                name: name.to_string(),
                path,
            },
        );
    }

    Ok(migrations)
}
