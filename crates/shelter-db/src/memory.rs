//! In-memory collaborators for tests and database-less embedding

use async_trait::async_trait;
use shelter_core::models::BackupLogEntry;
use shelter_core::{BackupError, BackupLogSink, BackupResult, SettingsStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

fn poisoned<T>(_: PoisonError<T>) -> BackupError {
    BackupError::Settings("In-memory store lock poisoned".to_string())
}

/// Settings store held in a shared map
#[derive(Clone, Default)]
pub struct InMemorySettings {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values<I, K, V>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = values
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            values: Arc::new(Mutex::new(map)),
        }
    }

    /// Synchronous read for assertions
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.lock().map(|m| m.clone()).unwrap_or_default()
    }

    pub fn remove(&self, key: &str) {
        if let Ok(mut map) = self.values.lock() {
            map.remove(key);
        }
    }
}

#[async_trait]
impl SettingsStore for InMemorySettings {
    async fn get(&self, key: &str) -> BackupResult<Option<String>> {
        let map = self.values.lock().map_err(poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> BackupResult<()> {
        let mut map = self.values.lock().map_err(poisoned)?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Audit log kept in insertion order
#[derive(Clone, Default)]
pub struct InMemoryBackupLog {
    entries: Arc<Mutex<Vec<BackupLogEntry>>>,
}

impl InMemoryBackupLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<BackupLogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl BackupLogSink for InMemoryBackupLog {
    async fn record(&self, entry: &BackupLogEntry) -> BackupResult<()> {
        let mut entries = self.entries.lock().map_err(poisoned)?;
        entries.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: i64) -> BackupResult<Vec<BackupLogEntry>> {
        let entries = self.entries.lock().map_err(poisoned)?;
        Ok(entries
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
