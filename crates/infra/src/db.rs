//! Connection pool setup and shared sqlx error mapping.

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use cascade_ledger::StoreError;

/// Open a connection pool against `DATABASE_URL`.
pub async fn connect(database_url: &str) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
        .map_err(|e| StoreError::Database(format!("failed to connect: {e}")))?;
    info!("database pool established");
    Ok(pool)
}

/// Apply embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
    info!("migrations applied");
    Ok(())
}

/// PostgreSQL unique-violation class (duplicate key).
pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
    )
}

pub(crate) fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    if is_unique_violation(&e) {
        return StoreError::Conflict(format!("{operation}: duplicate key"));
    }
    StoreError::Database(format!("{operation}: {e}"))
}
