//! Collaborator contracts: the key/value settings store, the audit log sink
//! and the notification dispatcher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::BackupLogEntry;
use crate::BackupResult;

/// Well-known settings keys
pub mod keys {
    pub const BACKUP_PATH: &str = "backup_path";
    pub const BACKUP_FREQUENCY: &str = "backup_frequency";
    pub const NOTIFICATION_EMAIL: &str = "notification_email";
    pub const SMTP_USER: &str = "smtp_user";
    pub const COMPANY_NAME: &str = "company_name";
}

/// Parse a boolean setting. Accepts `true`, `1`, `yes` and `on` (any case).
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Key/value configuration source shared with the host application
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self, key: &str) -> BackupResult<Option<String>>;

    /// Insert or replace a value. Last write wins.
    async fn set(&self, key: &str, value: &str) -> BackupResult<()>;

    /// Get a value, treating blank strings as absent
    async fn get_non_empty(&self, key: &str) -> BackupResult<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty()))
    }

    async fn get_bool(&self, key: &str) -> BackupResult<bool> {
        let value = self.get(key).await?;
        Ok(value.map(|v| parse_bool(&v)).unwrap_or(false))
    }
}

/// Append-only sink for run audit records
#[async_trait]
pub trait BackupLogSink: Send + Sync {
    async fn record(&self, entry: &BackupLogEntry) -> BackupResult<()>;

    /// Most recent records first
    async fn recent(&self, limit: i64) -> BackupResult<Vec<BackupLogEntry>>;
}

/// Payload handed to the notification collaborator at the end of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupNotification {
    pub success: bool,
    pub location: String,
    pub timestamp: DateTime<Utc>,
    pub backup_name: String,
    pub details: String,
}

#[async_trait]
pub trait BackupNotifier: Send + Sync {
    async fn notify(&self, notification: &BackupNotification) -> BackupResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool(" TRUE "));
        assert!(parse_bool("1"));
        assert!(parse_bool("on"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool(""));
        assert!(!parse_bool("0"));
    }
}
