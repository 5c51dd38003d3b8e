use shelter_core::models::RunLogger;
use shelter_core::{BackupError, BackupPaths, BackupResult};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::archive::UPLOADS_ARCHIVE_NAME;
use crate::fs_ops::extract_zip;

/// What a restore changed in the live state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub database_restored: bool,
    /// Copy of the live database taken before it was overwritten
    pub backup_of_previous: Option<PathBuf>,
    pub uploads_restored: bool,
    pub uploads_files: usize,
}

/// Reverses the backup pipeline onto the live database and uploads directory
#[derive(Clone, Debug)]
pub struct RestorePipeline {
    paths: BackupPaths,
}

impl RestorePipeline {
    pub fn new(paths: BackupPaths) -> Self {
        Self { paths }
    }

    /// Restore from a packaged run (`<run>.zip`) or an unpacked run directory.
    ///
    /// Archives are extracted into a temporary directory that is removed
    /// whether or not the restore succeeds.
    pub async fn restore(
        &self,
        source: &Path,
        log: &mut dyn RunLogger,
    ) -> BackupResult<RestoreReport> {
        let metadata = fs::metadata(source).await.map_err(|e| {
            BackupError::Restore(format!("Cannot read {}: {}", source.display(), e))
        })?;

        if metadata.is_dir() {
            log.info(&format!(
                "Restoring from run directory {}",
                source.display()
            ));
            return self.apply(source, log).await;
        }

        let staging = tempfile::Builder::new()
            .prefix("shelter-restore-")
            .tempdir()
            .map_err(|e| BackupError::Restore(format!("Failed to create staging dir: {}", e)))?;

        let archive = source.to_path_buf();
        let target = staging.path().to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extract_zip(&archive, &target))
            .await
            .map_err(|e| BackupError::Restore(format!("Extraction task failed: {}", e)))?
            .map_err(|e| BackupError::Restore(format!("{:#}", e)))?;
        log.info(&format!(
            "Extracted {} entries from {}",
            extracted,
            source.display()
        ));

        let result = self.apply(staging.path(), log).await;

        if let Err(e) = staging.close() {
            tracing::warn!(error = %e, "Failed to remove restore staging directory");
        }
        result
    }

    async fn apply(&self, staged: &Path, log: &mut dyn RunLogger) -> BackupResult<RestoreReport> {
        let mut report = RestoreReport::default();

        let db_name = self.paths.database_file_name();
        let staged_db = staged.join(&db_name);
        if is_file(&staged_db).await {
            report.backup_of_previous = self.backup_live_database(log).await?;
            fs::copy(&staged_db, &self.paths.database_file)
                .await
                .map_err(|e| {
                    BackupError::Restore(format!(
                        "Failed to replace {}: {}",
                        self.paths.database_file.display(),
                        e
                    ))
                })?;
            log.info(&format!(
                "Database restored to {}",
                self.paths.database_file.display()
            ));
            report.database_restored = true;
        } else {
            log.warn(&format!(
                "Archive contains no {}, database left untouched",
                db_name
            ));
        }

        let staged_uploads = staged.join(UPLOADS_ARCHIVE_NAME);
        if is_file(&staged_uploads).await {
            let target = self.paths.uploads_dir.clone();
            let files = tokio::task::spawn_blocking(move || extract_zip(&staged_uploads, &target))
                .await
                .map_err(|e| BackupError::Restore(format!("Extraction task failed: {}", e)))?
                .map_err(|e| BackupError::Restore(format!("Failed to restore uploads: {:#}", e)))?;
            log.info(&format!(
                "Restored {} upload files into {}",
                files,
                self.paths.uploads_dir.display()
            ));
            report.uploads_restored = true;
            report.uploads_files = files;
        } else {
            log.info(&format!(
                "Archive contains no {}, uploads left untouched",
                UPLOADS_ARCHIVE_NAME
            ));
        }

        Ok(report)
    }

    async fn backup_live_database(&self, log: &mut dyn RunLogger) -> BackupResult<Option<PathBuf>> {
        if !is_file(&self.paths.database_file).await {
            return Ok(None);
        }
        let bak = PathBuf::from(format!("{}.bak", self.paths.database_file.display()));
        fs::copy(&self.paths.database_file, &bak).await.map_err(|e| {
            BackupError::Restore(format!("Failed to back up live database: {}", e))
        })?;
        log.info(&format!("Previous database saved to {}", bak.display()));
        Ok(Some(bak))
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
