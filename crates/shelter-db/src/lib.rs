//! Shelter DB Library
//!
//! Persistence for the two collaborators the backup engine talks to: the
//! key/value settings table and the append-only backup log. Both live in the
//! host application's SQLite database. In-memory implementations are provided
//! for tests and for embedding without a database.

pub mod backup_log;
pub mod memory;
pub mod settings;

pub use backup_log::BackupLogRepository;
pub use memory::{InMemoryBackupLog, InMemorySettings};
pub use settings::SettingsRepository;

use shelter_core::BackupError;
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

const MAX_CONNECTIONS: u32 = 5;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open a pool on the given `sqlite://` URL, creating the file if needed.
pub async fn connect(database_url: &str) -> Result<SqlitePool, BackupError> {
    let options = SqliteConnectOptions::from_str(database_url)
        .map_err(db_error)?
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect_with(options)
        .await
        .map_err(db_error)?;

    tracing::info!(database_url = %database_url, "Connected to settings database");
    Ok(pool)
}

/// Apply pending migrations from `migrations/`.
///
/// The settings table may predate these migrations, so they only create
/// what is missing.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<(), BackupError> {
    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| BackupError::Settings(format!("Failed to run migrations: {}", e)))?;
    tracing::debug!("Settings database migrations applied");
    Ok(())
}

pub(crate) fn db_error(e: sqlx::Error) -> BackupError {
    BackupError::Settings(e.to_string())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // A single connection: every in-memory connection is its own database.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    ensure_schema(&pool).await.unwrap();
    pool
}
