//! Embedded schema migrations

use anyhow::{Context, Result};
use sqlx::PgPool;
use taskaudit_config::DatabaseConfig;

use crate::error::{DatabaseError, DatabaseResult};

/// Run all pending migrations from `./migrations`
///
/// # Errors
///
/// Returns `DatabaseError::MigrationFailed` if a migration cannot be applied
pub async fn run_migrations(pool: &PgPool) -> DatabaseResult<()> {
    tracing::info!("Running database migrations");

    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|source| DatabaseError::MigrationFailed {
            message: source.to_string(),
            source,
        })?;

    tracing::info!("Database migrations completed");
    Ok(())
}

/// Create a pool and run migrations
///
/// # Errors
///
/// Returns an error if:
/// - Pool creation fails
/// - Database migrations fail to run
pub async fn initialize_database(config: &DatabaseConfig) -> Result<PgPool> {
    let pool = config
        .create_pool()
        .await
        .context("Failed to create database pool")?;

    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    Ok(pool)
}
