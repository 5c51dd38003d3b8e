use crate::error::{BackupError, ErrorMetadata, LogLevel};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of run names produced by this engine
pub const RUN_PREFIX: &str = "backup";

/// Prefix used by artifacts written before the current naming scheme
pub const LEGACY_RUN_PREFIX: &str = "full_backup";

/// Terminal status of a backup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Success,
    PartialFail,
    Failed,
}

impl Display for RunStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            RunStatus::Success => write!(f, "SUCCESS"),
            RunStatus::PartialFail => write!(f, "PARTIAL_FAIL"),
            RunStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Ok(RunStatus::Success),
            "PARTIAL_FAIL" => Ok(RunStatus::PartialFail),
            "FAILED" => Ok(RunStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid run status: {}", s)),
        }
    }
}

/// Durability tier reached by a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageClass {
    Local,
    Hybrid,
    Cloud,
}

impl Display for StorageClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            StorageClass::Local => write!(f, "LOCAL"),
            StorageClass::Hybrid => write!(f, "HYBRID"),
            StorageClass::Cloud => write!(f, "CLOUD"),
        }
    }
}

impl FromStr for StorageClass {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LOCAL" => Ok(StorageClass::Local),
            "HYBRID" => Ok(StorageClass::Hybrid),
            "CLOUD" => Ok(StorageClass::Cloud),
            _ => Err(anyhow::anyhow!("Invalid storage class: {}", s)),
        }
    }
}

/// Position of a run in the orchestration state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunPhase {
    Started,
    DbCopied,
    Archived,
    ExternalCopied,
    ExternalSkipped,
    CloudUploaded,
    CloudSkipped,
    CloudFailed,
    Rotated,
    Logged,
    Done,
    Failed,
}

/// Result of one provider upload within a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOutcome {
    pub provider: String,
    pub success: bool,
    pub detail: String,
}

/// One execution of the backup pipeline.
///
/// Only the orchestrator mutates a run. The persisted [`BackupLogEntry`] is
/// an immutable snapshot taken once the run reaches `LOGGED`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRun {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: RunPhase,
    pub phases: Vec<RunPhase>,
    pub status: RunStatus,
    pub storage_class: StorageClass,
    pub destination: Option<String>,
    pub log: Vec<String>,
    pub providers: Vec<ProviderOutcome>,
}

impl BackupRun {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            started_at: Utc::now(),
            finished_at: None,
            phase: RunPhase::Started,
            phases: vec![RunPhase::Started],
            status: RunStatus::Success,
            storage_class: StorageClass::Local,
            destination: None,
            log: Vec::new(),
            providers: Vec::new(),
        }
    }

    /// Run name for a run starting at `at`: `backup_YYYY-MM-DD_HH-MM-SS`
    pub fn generate_name(at: DateTime<Local>) -> String {
        format!("{}_{}", RUN_PREFIX, at.format("%Y-%m-%d_%H-%M-%S"))
    }

    /// Append a timestamped line to the run log
    pub fn log(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(run_name = %self.name, "{}", message);
        self.push_line("", &message);
    }

    /// Append a timestamped warning line to the run log
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(run_name = %self.name, "{}", message);
        self.push_line("WARNING: ", &message);
    }

    /// Record a stage failure.
    ///
    /// Errors that are fatal to a run fail it. Anything else is logged at the
    /// error's own level and downgrades the run to partial failure.
    pub fn absorb(&mut self, error: &BackupError) {
        let message = format!("[{}] {}", error.error_code(), error);
        if error.is_fatal_to_run() {
            self.fail(message);
            return;
        }

        match error.log_level() {
            LogLevel::Error => tracing::error!(run_name = %self.name, "{}", message),
            LogLevel::Warn => tracing::warn!(run_name = %self.name, "{}", message),
            LogLevel::Debug => tracing::debug!(run_name = %self.name, "{}", message),
        }
        self.push_line("WARNING: ", &message);
        self.degrade();
    }

    pub fn advance(&mut self, phase: RunPhase) {
        tracing::debug!(run_name = %self.name, phase = ?phase, "Run phase changed");
        self.phase = phase;
        self.phases.push(phase);
    }

    /// Mark the run as failed. A failed run never recovers.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(run_name = %self.name, "{}", message);
        self.push_line("ERROR: ", &message);
        self.status = RunStatus::Failed;
        self.advance(RunPhase::Failed);
    }

    /// Downgrade a successful run to partial failure
    pub fn degrade(&mut self) {
        if self.status == RunStatus::Success {
            self.status = RunStatus::PartialFail;
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }

    pub fn log_text(&self) -> String {
        self.log.join("\n")
    }

    fn push_line(&mut self, tag: &str, message: &str) {
        let stamp = Local::now().format("%H:%M:%S");
        self.log.push(format!("[{}] {}{}", stamp, tag, message));
    }
}

/// Line-oriented log that pipeline steps write into.
///
/// [`BackupRun`] implements it so rotation and restore output lands in the
/// run's audit text; [`TracingLog`] sends lines to `tracing` only.
pub trait RunLogger: Send {
    fn info(&mut self, message: &str);
    fn warn(&mut self, message: &str);
}

impl RunLogger for BackupRun {
    fn info(&mut self, message: &str) {
        self.log(message);
    }

    fn warn(&mut self, message: &str) {
        BackupRun::warn(self, message);
    }
}

/// Logger for standalone invocations (CLI rotate/restore)
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl RunLogger for TracingLog {
    fn info(&mut self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&mut self, message: &str) {
        tracing::warn!("{}", message);
    }
}

/// Persisted audit record of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupLogEntry {
    pub id: Uuid,
    pub run_name: String,
    pub status: RunStatus,
    pub storage_class: StorageClass,
    pub log_text: String,
    pub destination: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&BackupRun> for BackupLogEntry {
    fn from(run: &BackupRun) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_name: run.name.clone(),
            status: run.status,
            storage_class: run.storage_class,
            log_text: run.log_text(),
            destination: run.destination.clone(),
            created_at: run.finished_at.unwrap_or_else(Utc::now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generate_name_is_sortable() {
        let at = Local.with_ymd_and_hms(2026, 3, 7, 4, 5, 6).unwrap();
        assert_eq!(BackupRun::generate_name(at), "backup_2026-03-07_04-05-06");

        let later = Local.with_ymd_and_hms(2026, 11, 7, 4, 5, 6).unwrap();
        assert!(
            BackupRun::generate_name(later) > BackupRun::generate_name(at)
        );
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Success,
            RunStatus::PartialFail,
            RunStatus::Failed,
        ] {
            assert_eq!(status.to_string().parse::<RunStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<RunStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&RunStatus::PartialFail).unwrap(),
            "\"PARTIAL_FAIL\""
        );
    }

    #[test]
    fn test_degrade_does_not_override_failure() {
        let mut run = BackupRun::new("backup_x");
        run.degrade();
        assert_eq!(run.status, RunStatus::PartialFail);

        let mut failed = BackupRun::new("backup_y");
        failed.fail("db copy failed");
        failed.degrade();
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.phase, RunPhase::Failed);
    }

    #[test]
    fn test_absorb_routes_by_error_metadata() {
        let mut run = BackupRun::new("backup_x");
        run.absorb(&BackupError::cloud_auth("gdrive", "token revoked"));
        assert_eq!(run.status, RunStatus::PartialFail);
        assert_eq!(run.phase, RunPhase::Started);
        assert!(run.log[0].contains("WARNING: [CLOUD_AUTH_FAILURE] gdrive"));

        run.absorb(&BackupError::Archive("disk full".into()));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.phase, RunPhase::Failed);
        assert!(run.log[1].contains("ERROR: [ARCHIVE_FAILURE]"));

        run.absorb(&BackupError::ExternalCopy("mirror offline".into()));
        assert_eq!(run.status, RunStatus::Failed);
    }

    #[test]
    fn test_log_entry_from_run() {
        let mut run = BackupRun::new("backup_2026-01-01_00-00-00");
        run.log("first");
        run.warn("second");
        run.storage_class = StorageClass::Hybrid;
        run.destination = Some("/mnt/mirror".to_string());

        let entry = BackupLogEntry::from(&run);
        assert_eq!(entry.run_name, run.name);
        assert_eq!(entry.storage_class, StorageClass::Hybrid);
        assert_eq!(entry.destination.as_deref(), Some("/mnt/mirror"));
        let lines: Vec<&str> = entry.log_text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("first"));
        assert!(lines[1].ends_with("WARNING: second"));
    }
}
