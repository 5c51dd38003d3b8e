mod service;

pub use service::BackupOrchestrator;
