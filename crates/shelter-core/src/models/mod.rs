//! Domain models for backup runs, schedules and cloud providers

pub mod backup;
pub mod provider;
pub mod schedule;

pub use backup::{
    BackupLogEntry, BackupRun, ProviderOutcome, RunLogger, RunPhase, RunStatus, StorageClass,
    TracingLog, LEGACY_RUN_PREFIX, RUN_PREFIX,
};
pub use provider::{ClientCredentials, ProviderKind, TokenSet, UploadConfirmation};
pub use schedule::Frequency;
