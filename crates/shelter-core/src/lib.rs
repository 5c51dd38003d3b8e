//! Shelter Core Library
//!
//! Shared types for the backup engine: configuration, the error taxonomy,
//! domain models, the secret codec, and the contracts of the external
//! collaborators (settings store, audit log sink, notifier).

pub mod config;
pub mod encryption;
pub mod error;
pub mod models;
pub mod settings;

pub use config::{BackupPaths, Config};
pub use encryption::SecretCodec;
pub use error::{BackupError, BackupResult, ErrorMetadata, LogLevel};
pub use settings::{BackupLogSink, BackupNotification, BackupNotifier, SettingsStore};
