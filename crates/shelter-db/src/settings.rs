use async_trait::async_trait;
use shelter_core::{BackupResult, SettingsStore};
use sqlx::{Sqlite, SqlitePool};

use crate::db_error;

/// Settings store backed by the `settings` table
#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for SettingsRepository {
    #[tracing::instrument(skip(self), fields(db.table = "settings", db.operation = "select"))]
    async fn get(&self, key: &str) -> BackupResult<Option<String>> {
        let value = sqlx::query_scalar::<Sqlite, String>("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(value)
    }

    #[tracing::instrument(
        skip(self, value),
        fields(db.table = "settings", db.operation = "upsert")
    )]
    async fn set(&self, key: &str, value: &str) -> BackupResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }
}
