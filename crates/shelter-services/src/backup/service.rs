use chrono::{Local, Utc};
use futures::future::join_all;
use shelter_cloud::CloudProvider;
use shelter_core::models::{
    BackupLogEntry, BackupRun, ProviderOutcome, RunPhase, StorageClass, UploadConfirmation,
};
use shelter_core::settings::keys;
use shelter_core::{
    BackupError, BackupLogSink, BackupNotification, BackupNotifier, BackupPaths, BackupResult,
    ErrorMetadata, SettingsStore,
};
use shelter_storage::{copy_dir_recursive, ArchiveBuilder, RetentionRotator, Snapshot};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Where the off-box steps of one run ended up
#[derive(Debug, Default)]
struct Replication {
    /// Mirror root that received the run directory
    external_root: Option<PathBuf>,
    external_target: Option<PathBuf>,
    cloud_destinations: Vec<String>,
}

impl Replication {
    fn off_box(&self) -> bool {
        self.external_target.is_some() || !self.cloud_destinations.is_empty()
    }

    fn storage_class(&self) -> StorageClass {
        if !self.cloud_destinations.is_empty() {
            StorageClass::Cloud
        } else if self.external_target.is_some() {
            StorageClass::Hybrid
        } else {
            StorageClass::Local
        }
    }
}

/// Sequences one backup run end to end.
///
/// `run` is single-flight: concurrent callers queue on an async mutex and run
/// one after another. A run never returns an error; its outcome is the
/// returned [`BackupRun`], the audit record and the notification.
pub struct BackupOrchestrator {
    archive: ArchiveBuilder,
    keep_count: usize,
    settings: Arc<dyn SettingsStore>,
    log_sink: Arc<dyn BackupLogSink>,
    providers: Vec<Arc<dyn CloudProvider>>,
    notifier: Option<Arc<dyn BackupNotifier>>,
    guard: Mutex<()>,
}

impl BackupOrchestrator {
    pub fn new(
        paths: BackupPaths,
        keep_count: usize,
        settings: Arc<dyn SettingsStore>,
        log_sink: Arc<dyn BackupLogSink>,
    ) -> Self {
        Self {
            archive: ArchiveBuilder::new(paths),
            keep_count: keep_count.max(1),
            settings,
            log_sink,
            providers: Vec::new(),
            notifier: None,
            guard: Mutex::new(()),
        }
    }

    pub fn with_providers(mut self, providers: Vec<Arc<dyn CloudProvider>>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn BackupNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn paths(&self) -> &BackupPaths {
        self.archive.paths()
    }

    pub fn keep_count(&self) -> usize {
        self.keep_count
    }

    /// Execute one backup run.
    ///
    /// `external_override` takes precedence over the `backup_path` setting
    /// for the mirror copy.
    #[tracing::instrument(skip(self), fields(backup.operation = "run"))]
    pub async fn run(&self, external_override: Option<PathBuf>) -> BackupRun {
        let _flight = self.guard.lock().await;

        let name = self
            .archive
            .reserve_run_name(&BackupRun::generate_name(Local::now()));
        let mut run = BackupRun::new(name);
        run.log("Backup started");

        let replication = match self.archive.build(&mut run).await {
            Ok(snapshot) => self.replicate(&mut run, &snapshot, external_override).await,
            Err(e) => {
                run.absorb(&e);
                Replication::default()
            }
        };

        self.rotate(&mut run, replication.external_root.as_deref())
            .await;
        self.finish(&mut run).await;
        run
    }

    async fn replicate(
        &self,
        run: &mut BackupRun,
        snapshot: &Snapshot,
        external_override: Option<PathBuf>,
    ) -> Replication {
        let mut replication = Replication::default();

        match self.resolve_external_path(run, external_override).await {
            Some(root) => match self.copy_external(run, &snapshot.run_dir, &root).await {
                Ok(target) => {
                    run.log(format!(
                        "Backup copied to external location {}",
                        target.display()
                    ));
                    run.advance(RunPhase::ExternalCopied);
                    replication.external_target = Some(target);
                    replication.external_root = Some(root);
                }
                Err(e) => {
                    run.absorb(&e);
                    run.advance(RunPhase::ExternalSkipped);
                }
            },
            None => run.advance(RunPhase::ExternalSkipped),
        }

        replication.cloud_destinations = self.upload_to_cloud(run, &snapshot.run_dir).await;

        run.storage_class = replication.storage_class();
        let mut destinations: Vec<String> = replication
            .external_target
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        destinations.extend(replication.cloud_destinations.iter().cloned());
        run.destination = Some(if destinations.is_empty() {
            snapshot.run_dir.display().to_string()
        } else {
            destinations.join(", ")
        });

        if replication.off_box() {
            match tokio::fs::remove_dir_all(&snapshot.run_dir).await {
                Ok(()) => run.log("Local copy removed after successful off-box replication"),
                Err(e) => run.warn(format!(
                    "Failed to remove local copy {}: {}",
                    snapshot.run_dir.display(),
                    e
                )),
            }
        }

        replication
    }

    async fn resolve_external_path(
        &self,
        run: &mut BackupRun,
        external_override: Option<PathBuf>,
    ) -> Option<PathBuf> {
        if let Some(path) = external_override {
            return Some(path);
        }
        match self.settings.get_non_empty(keys::BACKUP_PATH).await {
            Ok(path) => path.map(PathBuf::from),
            Err(e) => {
                run.warn(format!(
                    "Could not read {} setting: {}",
                    keys::BACKUP_PATH,
                    e
                ));
                None
            }
        }
    }

    /// Copy the run directory under `root`.
    ///
    /// `root` must be an existing directory that neither contains nor sits
    /// inside the backup root, otherwise the mirror and the local copy would
    /// be the same files.
    async fn copy_external(
        &self,
        run: &BackupRun,
        run_dir: &Path,
        root: &Path,
    ) -> BackupResult<PathBuf> {
        let is_dir = tokio::fs::metadata(root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(BackupError::ExternalCopy(format!(
                "External location {} is not available",
                root.display()
            )));
        }

        let backup_root = &self.paths().backup_root;
        let mirror = canonical(root).await?;
        let local = canonical(backup_root).await?;
        if mirror.starts_with(&local) || local.starts_with(&mirror) {
            return Err(BackupError::ExternalCopy(format!(
                "External location {} overlaps the backup root {}",
                root.display(),
                backup_root.display()
            )));
        }

        let target = root.join(&run.name);
        let (src, dest) = (run_dir.to_path_buf(), target.clone());
        tokio::task::spawn_blocking(move || copy_dir_recursive(&src, &dest))
            .await
            .map_err(|e| BackupError::ExternalCopy(format!("Copy task failed: {}", e)))?
            .map_err(|e| BackupError::ExternalCopy(format!("{:#}", e)))?;
        Ok(target)
    }

    /// Upload the packaged run to every configured provider concurrently.
    /// Returns `<provider>:<remote path>` for each success.
    async fn upload_to_cloud(&self, run: &mut BackupRun, run_dir: &Path) -> Vec<String> {
        let mut enabled = Vec::new();
        for provider in &self.providers {
            match provider.is_configured().await {
                Ok(true) => enabled.push(provider.clone()),
                Ok(false) => {}
                Err(e) => run.warn(format!(
                    "Could not read {} settings: {}",
                    provider.kind(),
                    e
                )),
            }
        }

        if enabled.is_empty() {
            run.log("No cloud provider configured, skipping upload");
            run.advance(RunPhase::CloudSkipped);
            return Vec::new();
        }

        let results = match self.archive.package(run_dir).await {
            Ok(archive) => {
                let remote_name = format!("{}.zip", run.name);
                run.log(format!("Packaged {} for cloud upload", remote_name));

                let (shared, name) = (&archive, &remote_name);
                let uploads = enabled.iter().map(|provider| async move {
                    let result = upload_one(provider.as_ref(), shared, name).await;
                    (provider.kind(), result)
                });
                let results = join_all(uploads).await;

                if let Err(e) = tokio::fs::remove_file(&archive).await {
                    run.warn(format!(
                        "Failed to remove upload archive {}: {}",
                        archive.display(),
                        e
                    ));
                }
                results
            }
            // Nothing to upload: every enabled provider fails at offset 0.
            Err(e) => enabled
                .iter()
                .map(|provider| {
                    let kind = provider.kind();
                    let message = format!("Upload skipped: {}", e);
                    (kind, Err(BackupError::cloud_transfer(kind.key(), 0, message)))
                })
                .collect(),
        };

        let mut destinations = Vec::new();
        for (kind, result) in results {
            match result {
                Ok(confirmation) => {
                    run.log(format!(
                        "Uploaded to {} as {} ({} bytes)",
                        kind, confirmation.remote_path, confirmation.bytes
                    ));
                    run.providers.push(ProviderOutcome {
                        provider: kind.to_string(),
                        success: true,
                        detail: confirmation.remote_path.clone(),
                    });
                    destinations.push(format!("{}:{}", kind, confirmation.remote_path));
                }
                Err(e) => {
                    run.absorb(&e);
                    run.providers.push(ProviderOutcome {
                        provider: kind.to_string(),
                        success: false,
                        detail: e.to_string(),
                    });
                }
            }
        }

        run.advance(if destinations.is_empty() {
            RunPhase::CloudFailed
        } else {
            RunPhase::CloudUploaded
        });
        destinations
    }

    async fn rotate(&self, run: &mut BackupRun, mirror_root: Option<&Path>) {
        let local = RetentionRotator::new(&self.paths().backup_root);
        if let Err(e) = local.rotate(self.keep_count, run).await {
            run.warn(format!(
                "Rotation of {} failed: {}",
                local.root().display(),
                e
            ));
        }

        if let Some(mirror_root) = mirror_root {
            let mirror = RetentionRotator::new(mirror_root);
            if let Err(e) = mirror.rotate(self.keep_count, run).await {
                run.warn(format!(
                    "Rotation of {} failed: {}",
                    mirror.root().display(),
                    e
                ));
            }
        }

        if !run.is_failed() {
            run.advance(RunPhase::Rotated);
        }
    }

    async fn finish(&self, run: &mut BackupRun) {
        run.finished_at = Some(Utc::now());
        if run.is_failed() {
            run.log(format!("Backup failed ({})", run.status));
        } else {
            run.log(format!(
                "Backup finished with status {} ({})",
                run.status, run.storage_class
            ));
            run.advance(RunPhase::Logged);
        }

        let entry = BackupLogEntry::from(&*run);
        if let Err(e) = self.log_sink.record(&entry).await {
            tracing::error!(
                run_name = %run.name,
                error_code = e.error_code(),
                error = %e,
                "Failed to persist backup log"
            );
        }

        if let Some(notifier) = &self.notifier {
            let notification = BackupNotification {
                success: !run.is_failed(),
                location: run.destination.clone().unwrap_or_else(|| {
                    self.paths()
                        .backup_root
                        .join(&run.name)
                        .display()
                        .to_string()
                }),
                timestamp: entry.created_at,
                backup_name: run.name.clone(),
                details: entry.log_text.clone(),
            };
            if let Err(e) = notifier.notify(&notification).await {
                tracing::warn!(
                    run_name = %run.name,
                    error_code = e.error_code(),
                    error = %e,
                    "Backup notification failed"
                );
            }
        }

        if !run.is_failed() {
            run.advance(RunPhase::Done);
        }
    }
}

async fn upload_one(
    provider: &dyn CloudProvider,
    archive: &Path,
    remote_name: &str,
) -> BackupResult<UploadConfirmation> {
    let folder = provider.folder_name().await?;
    provider.upload_file(archive, remote_name, &folder).await
}

async fn canonical(path: &Path) -> BackupResult<PathBuf> {
    tokio::fs::canonicalize(path).await.map_err(|e| {
        BackupError::ExternalCopy(format!("Failed to resolve {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shelter_core::models::{ProviderKind, RunStatus, TokenSet};
    use shelter_db::{InMemoryBackupLog, InMemorySettings};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeProvider {
        kind: ProviderKind,
        configured: bool,
        fail: bool,
        uploads: AtomicUsize,
    }

    impl FakeProvider {
        fn new(kind: ProviderKind, configured: bool, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                kind,
                configured,
                fail,
                uploads: AtomicUsize::new(0),
            })
        }

        fn uploads(&self) -> usize {
            self.uploads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CloudProvider for FakeProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }

        async fn get_auth_url(&self, _redirect_uri: &str) -> BackupResult<String> {
            Ok("https://auth.invalid".to_string())
        }

        async fn connect(&self, _code: &str, _redirect_uri: &str) -> BackupResult<TokenSet> {
            unimplemented!("not used by the orchestrator")
        }

        async fn refresh_token(&self) -> BackupResult<String> {
            Ok("access".to_string())
        }

        async fn upload_file(
            &self,
            local_path: &Path,
            remote_name: &str,
            folder_name: &str,
        ) -> BackupResult<UploadConfirmation> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            let bytes = fs::metadata(local_path)?.len();
            if self.fail {
                return Err(BackupError::cloud_transfer(self.kind.key(), 0, "rejected"));
            }
            Ok(UploadConfirmation {
                provider: self.kind,
                remote_path: format!("{}/{}", folder_name, remote_name),
                remote_id: Some("remote-1".to_string()),
                bytes,
            })
        }

        async fn is_configured(&self) -> BackupResult<bool> {
            Ok(self.configured)
        }

        async fn folder_name(&self) -> BackupResult<String> {
            Ok("Backups".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        sent: std::sync::Mutex<Vec<BackupNotification>>,
    }

    impl RecordingNotifier {
        fn failing() -> Arc<Self> {
            Arc::new(Self {
                fail: true,
                ..Default::default()
            })
        }

        fn sent(&self) -> Vec<BackupNotification> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BackupNotifier for RecordingNotifier {
        async fn notify(&self, notification: &BackupNotification) -> BackupResult<()> {
            self.sent.lock().unwrap().push(notification.clone());
            if self.fail {
                return Err(BackupError::Notification("smtp unreachable".into()));
            }
            Ok(())
        }
    }

    struct Fixture {
        _root: tempfile::TempDir,
        paths: BackupPaths,
        settings: InMemorySettings,
        log: InMemoryBackupLog,
    }

    fn fixture(with_database: bool) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        let paths = BackupPaths::under_root(root.path(), false);
        if with_database {
            fs::write(&paths.database_file, b"SQLite format 3\0").unwrap();
        }
        fs::create_dir_all(paths.uploads_dir.join("tickets")).unwrap();
        fs::write(paths.uploads_dir.join("tickets/a.png"), b"png").unwrap();
        Fixture {
            _root: root,
            paths,
            settings: InMemorySettings::new(),
            log: InMemoryBackupLog::new(),
        }
    }

    fn orchestrator(f: &Fixture, providers: Vec<Arc<dyn CloudProvider>>) -> BackupOrchestrator {
        BackupOrchestrator::new(
            f.paths.clone(),
            3,
            Arc::new(f.settings.clone()),
            Arc::new(f.log.clone()),
        )
        .with_providers(providers)
    }

    fn seed_artifacts(dir: &Path, prefix: &str, days: u32) {
        for day in 1..=days {
            let name = format!("{}_2020-01-0{}_00-00-00", prefix, day);
            fs::create_dir_all(dir.join(name)).unwrap();
        }
    }

    fn artifacts(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_local_only_run_succeeds() {
        let f = fixture(true);
        let run = orchestrator(&f, Vec::new()).run(None).await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.storage_class, StorageClass::Local);
        assert_eq!(run.phase, RunPhase::Done);
        assert!(run.phases.contains(&RunPhase::CloudSkipped));
        let run_dir = f.paths.backup_root.join(&run.name);
        assert!(run_dir.join("dev.db").exists());
        assert!(run_dir.join("uploads.zip").exists());

        let entries = f.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_database_copy_failure_fails_run() {
        let f = fixture(false);
        seed_artifacts(&f.paths.backup_root, "backup", 5);
        let provider = FakeProvider::new(ProviderKind::OneDrive, true, false);
        let run = orchestrator(&f, vec![provider.clone()]).run(None).await;

        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.phase, RunPhase::Failed);
        assert_eq!(provider.uploads(), 0);
        assert!(!f.paths.backup_root.join(&run.name).exists());
        // Rotation still ran
        assert_eq!(
            artifacts(&f.paths.backup_root),
            vec![
                "backup_2020-01-03_00-00-00",
                "backup_2020-01-04_00-00-00",
                "backup_2020-01-05_00-00-00",
            ]
        );

        let entries = f.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_external_copy_makes_hybrid_and_removes_local() {
        let f = fixture(true);
        let mirror = tempfile::tempdir().unwrap();
        let run = orchestrator(&f, Vec::new())
            .run(Some(mirror.path().to_path_buf()))
            .await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.storage_class, StorageClass::Hybrid);
        assert!(mirror.path().join(&run.name).join("dev.db").exists());
        assert!(!f.paths.backup_root.join(&run.name).exists());
        assert_eq!(
            run.destination.as_deref(),
            Some(mirror.path().join(&run.name).display().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_missing_external_path_is_partial_failure() {
        let f = fixture(true);
        f.settings
            .set(keys::BACKUP_PATH, "/definitely/not/mounted")
            .await
            .unwrap();
        let run = orchestrator(&f, Vec::new()).run(None).await;

        assert_eq!(run.status, RunStatus::PartialFail);
        assert_eq!(run.storage_class, StorageClass::Local);
        assert!(f.paths.backup_root.join(&run.name).exists());
    }

    #[tokio::test]
    async fn test_mirror_overlapping_backup_root_is_refused() {
        let f = fixture(true);
        let nested = f.paths.backup_root.join("mirror");
        fs::create_dir_all(&nested).unwrap();
        let parent = f.paths.backup_root.parent().unwrap().to_path_buf();
        let orchestrator = orchestrator(&f, Vec::new());

        for mirror in [f.paths.backup_root.clone(), nested, parent] {
            let run = orchestrator.run(Some(mirror)).await;

            assert_eq!(run.status, RunStatus::PartialFail);
            assert_eq!(run.storage_class, StorageClass::Local);
            assert!(f.paths.backup_root.join(&run.name).join("dev.db").exists());
            assert!(run.log_text().contains("EXTERNAL_COPY_FAILURE"));
        }

        let statuses: Vec<RunStatus> = f.log.entries().iter().map(|e| e.status).collect();
        assert_eq!(statuses, vec![RunStatus::PartialFail; 3]);
    }

    #[tokio::test]
    async fn test_one_provider_failing_is_partial_and_cloud() {
        let f = fixture(true);
        let good = FakeProvider::new(ProviderKind::OneDrive, true, false);
        let bad = FakeProvider::new(ProviderKind::GDrive, true, true);
        let run = orchestrator(&f, vec![good.clone(), bad.clone()])
            .run(None)
            .await;

        assert_eq!(good.uploads(), 1);
        assert_eq!(bad.uploads(), 1);
        assert_eq!(run.status, RunStatus::PartialFail);
        assert_eq!(run.storage_class, StorageClass::Cloud);
        assert!(run.phases.contains(&RunPhase::CloudUploaded));
        assert_eq!(run.providers.len(), 2);
        // Shared archive and local run directory are both gone
        assert!(artifacts(&f.paths.backup_root).is_empty());
    }

    #[tokio::test]
    async fn test_all_providers_failing_keeps_local_copy() {
        let f = fixture(true);
        let bad = FakeProvider::new(ProviderKind::GDrive, true, true);
        let skipped = FakeProvider::new(ProviderKind::OneDrive, false, false);
        let run = orchestrator(&f, vec![bad.clone(), skipped.clone()])
            .run(None)
            .await;

        assert_eq!(skipped.uploads(), 0);
        assert_eq!(run.status, RunStatus::PartialFail);
        assert_eq!(run.storage_class, StorageClass::Local);
        assert!(run.phases.contains(&RunPhase::CloudFailed));
        assert_eq!(artifacts(&f.paths.backup_root), vec![run.name.clone()]);
    }

    #[tokio::test]
    async fn test_rotation_bounds_local_artifacts() {
        let f = fixture(true);
        seed_artifacts(&f.paths.backup_root, "full_backup", 4);
        let run = orchestrator(&f, Vec::new()).run(None).await;

        let remaining = artifacts(&f.paths.backup_root);
        assert_eq!(remaining.len(), 3);
        assert!(remaining.contains(&run.name));
        let kept = "full_backup_2020-01-04_00-00-00".to_string();
        let rotated = "full_backup_2020-01-02_00-00-00".to_string();
        assert!(remaining.contains(&kept));
        assert!(!remaining.contains(&rotated));
    }

    #[tokio::test]
    async fn test_notifier_receives_outcome_once() {
        let f = fixture(true);
        let notifier = Arc::new(RecordingNotifier::default());
        let run = orchestrator(&f, Vec::new())
            .with_notifier(notifier.clone())
            .run(None)
            .await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].success);
        assert_eq!(sent[0].backup_name, run.name);
        let run_dir = f.paths.backup_root.join(&run.name);
        assert_eq!(sent[0].location, run_dir.display().to_string());
        assert!(sent[0].details.contains("Backup started"));
        assert_eq!(sent[0].details, f.log.entries()[0].log_text);
    }

    #[tokio::test]
    async fn test_failed_run_notifies_failure() {
        let f = fixture(false);
        let notifier = Arc::new(RecordingNotifier::default());
        let run = orchestrator(&f, Vec::new())
            .with_notifier(notifier.clone())
            .run(None)
            .await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].success);
        let run_dir = f.paths.backup_root.join(&run.name);
        assert_eq!(sent[0].location, run_dir.display().to_string());
        assert!(sent[0].details.contains("ARCHIVE_FAILURE"));
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_status_and_record() {
        let f = fixture(true);
        let notifier = RecordingNotifier::failing();
        let run = orchestrator(&f, Vec::new())
            .with_notifier(notifier.clone())
            .run(None)
            .await;

        assert_eq!(notifier.sent().len(), 1);
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.phase, RunPhase::Done);
        let entries = f.log.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, RunStatus::Success);
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_serialized() {
        let f = fixture(true);
        let orchestrator = Arc::new(orchestrator(&f, Vec::new()));

        let (a, b) = tokio::join!(orchestrator.run(None), orchestrator.run(None));

        assert_ne!(a.name, b.name);
        assert_eq!(f.log.entries().len(), 2);
    }
}
