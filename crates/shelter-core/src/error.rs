//! Error types module
//!
//! All failures of the backup engine are unified under [`BackupError`]. The
//! variants mirror the stages of a run so the orchestrator can decide, per
//! variant, whether the failure ends the run or only degrades its outcome.

use std::io;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected conditions like a provider not being configured
    Debug,
    /// Warning level - for absorbed failures that degrade a run
    Warn,
    /// Error level - for failures that end a run or a restore
    Error,
}

/// Metadata describing how an error is reported and propagated
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "ARCHIVE_FAILURE")
    fn error_code(&self) -> &'static str;

    /// Whether this error ends the backup run it occurred in
    fn is_fatal_to_run(&self) -> bool;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    #[error("Archive failure: {0}")]
    Archive(String),

    #[error("External copy failure: {0}")]
    ExternalCopy(String),

    #[error("{provider} authentication failure: {message}")]
    CloudAuth {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} transfer failure at offset {offset}: {message}")]
    CloudTransfer {
        provider: &'static str,
        offset: u64,
        message: String,
    },

    #[error("Failed to delete {item}: {message}")]
    RotationItem { item: String, message: String },

    #[error("Notification failure: {0}")]
    Notification(String),

    #[error("Restore failure: {0}")]
    Restore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings store error: {0}")]
    Settings(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl BackupError {
    /// Shorthand for an auth failure on the given provider
    pub fn cloud_auth(provider: &'static str, message: impl Into<String>) -> Self {
        BackupError::CloudAuth {
            provider,
            message: message.into(),
        }
    }

    /// Shorthand for a transfer failure on the given provider
    pub fn cloud_transfer(provider: &'static str, offset: u64, message: impl Into<String>) -> Self {
        BackupError::CloudTransfer {
            provider,
            offset,
            message: message.into(),
        }
    }
}

impl ErrorMetadata for BackupError {
    fn error_code(&self) -> &'static str {
        match self {
            BackupError::Archive(_) => "ARCHIVE_FAILURE",
            BackupError::ExternalCopy(_) => "EXTERNAL_COPY_FAILURE",
            BackupError::CloudAuth { .. } => "CLOUD_AUTH_FAILURE",
            BackupError::CloudTransfer { .. } => "CLOUD_TRANSFER_FAILURE",
            BackupError::RotationItem { .. } => "ROTATION_ITEM_FAILURE",
            BackupError::Notification(_) => "NOTIFICATION_FAILURE",
            BackupError::Restore(_) => "RESTORE_FAILURE",
            BackupError::Config(_) => "CONFIG_ERROR",
            BackupError::Settings(_) => "SETTINGS_ERROR",
            BackupError::Crypto(_) => "CRYPTO_ERROR",
            BackupError::Io(_) => "IO_ERROR",
        }
    }

    fn is_fatal_to_run(&self) -> bool {
        matches!(self, BackupError::Archive(_))
    }

    fn log_level(&self) -> LogLevel {
        match self {
            BackupError::Archive(_) | BackupError::Restore(_) | BackupError::Config(_) => {
                LogLevel::Error
            }
            BackupError::Io(_) | BackupError::Settings(_) | BackupError::Crypto(_) => {
                LogLevel::Error
            }
            BackupError::ExternalCopy(_)
            | BackupError::CloudAuth { .. }
            | BackupError::CloudTransfer { .. }
            | BackupError::RotationItem { .. }
            | BackupError::Notification(_) => LogLevel::Warn,
        }
    }
}

pub type BackupResult<T> = Result<T, BackupError>;
