use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shelter_core::models::BackupLogEntry;
use shelter_core::{BackupError, BackupLogSink, BackupResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::db_error;

/// Append-only audit log of backup runs, backed by the `backup_logs` table
#[derive(Clone)]
pub struct BackupLogRepository {
    pool: SqlitePool,
}

impl BackupLogRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn entry_from_row(row: &SqliteRow) -> BackupResult<BackupLogEntry> {
    let id: String = row.try_get("id").map_err(db_error)?;
    let status: String = row.try_get("status").map_err(db_error)?;
    let storage_class: String = row.try_get("storage_class").map_err(db_error)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(db_error)?;

    Ok(BackupLogEntry {
        id: Uuid::parse_str(&id)
            .map_err(|e| BackupError::Settings(format!("Invalid backup log id {}: {}", id, e)))?,
        run_name: row.try_get("run_name").map_err(db_error)?,
        status: status
            .parse()
            .map_err(|e: anyhow::Error| BackupError::Settings(e.to_string()))?,
        storage_class: storage_class
            .parse()
            .map_err(|e: anyhow::Error| BackupError::Settings(e.to_string()))?,
        log_text: row.try_get("log_text").map_err(db_error)?,
        destination: row.try_get("destination").map_err(db_error)?,
        created_at,
    })
}

#[async_trait]
impl BackupLogSink for BackupLogRepository {
    #[tracing::instrument(
        skip(self, entry),
        fields(
            db.table = "backup_logs",
            db.operation = "insert",
            run_name = %entry.run_name
        )
    )]
    async fn record(&self, entry: &BackupLogEntry) -> BackupResult<()> {
        sqlx::query(
            r#"
            INSERT INTO backup_logs
                (id, run_name, status, storage_class, log_text, destination, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.id.to_string())
        .bind(&entry.run_name)
        .bind(entry.status.to_string())
        .bind(entry.storage_class.to_string())
        .bind(&entry.log_text)
        .bind(entry.destination.as_deref())
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(db.table = "backup_logs", db.operation = "select"))]
    async fn recent(&self, limit: i64) -> BackupResult<Vec<BackupLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_name, status, storage_class, log_text, destination, created_at
            FROM backup_logs
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(entry_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_pool;
    use chrono::Duration;
    use shelter_core::models::{RunStatus, StorageClass};

    fn entry(name: &str, status: RunStatus, age_minutes: i64) -> BackupLogEntry {
        BackupLogEntry {
            id: Uuid::new_v4(),
            run_name: name.to_string(),
            status,
            storage_class: StorageClass::Local,
            log_text: format!("[00:00:00] {}", name),
            destination: None,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[tokio::test]
    async fn test_record_and_list_recent() {
        let repo = BackupLogRepository::new(test_pool().await);

        let older = entry("backup_a", RunStatus::Success, 10);
        let mut newer = entry("backup_b", RunStatus::PartialFail, 1);
        newer.storage_class = StorageClass::Cloud;
        newer.destination = Some("onedrive:/Backups/backup_b.zip".to_string());

        repo.record(&older).await.unwrap();
        repo.record(&newer).await.unwrap();

        let recent = repo.recent(10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].run_name, "backup_b");
        assert_eq!(recent[0].status, RunStatus::PartialFail);
        assert_eq!(recent[0].storage_class, StorageClass::Cloud);
        assert_eq!(recent[0].destination, newer.destination);
        assert_eq!(recent[0].id, newer.id);
        assert_eq!(recent[1].run_name, "backup_a");

        assert_eq!(repo.recent(1).await.unwrap().len(), 1);
    }
}
