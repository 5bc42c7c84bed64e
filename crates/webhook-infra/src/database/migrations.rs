//! Thin wrapper around `sqlx::migrate::Migrator` so the binary crate does not
//! need to depend on `sqlx::migrate` directly. The actual migration set is
//! embedded by `webhook-store` via `sqlx::migrate!`, since the macro resolves
//! its path relative to the crate that invokes it.

use crate::InfraError;
use sqlx::migrate::Migrator;
use sqlx::PgPool;
use tracing::info;

pub async fn run_migrations(migrator: &Migrator, pool: &PgPool) -> Result<(), InfraError> {
    info!("running database migrations");
    migrator
        .run(pool)
        .await
        .map_err(|e| InfraError::Migration(e.to_string()))
}
