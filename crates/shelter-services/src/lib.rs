//! Shelter Services Layer
//!
//! Coordination on top of storage and cloud: the backup orchestrator that
//! sequences a run, the schedule controller that triggers it, and outcome
//! notifications.

pub mod backup;
pub mod notify;
pub mod schedule;

pub use backup::BackupOrchestrator;
#[cfg(feature = "email")]
pub use notify::EmailNotifier;
pub use schedule::ScheduleController;
