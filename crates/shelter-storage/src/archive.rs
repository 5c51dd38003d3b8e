use shelter_core::models::{BackupRun, RunPhase};
use shelter_core::{BackupError, BackupPaths, BackupResult};
use std::path::{Path, PathBuf};
use tokio::fs;

use crate::fs_ops::zip_directory;

/// Name of the uploads archive inside a run directory
pub const UPLOADS_ARCHIVE_NAME: &str = "uploads.zip";

/// Result of snapshotting the live state into a run directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub run_dir: PathBuf,
    pub database_copy: PathBuf,
    /// `None` when the live uploads directory did not exist
    pub uploads_archive: Option<PathBuf>,
}

/// Builds `<backup_root>/<run_name>/` from the live database and uploads
#[derive(Clone, Debug)]
pub struct ArchiveBuilder {
    paths: BackupPaths,
}

impl ArchiveBuilder {
    pub fn new(paths: BackupPaths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &BackupPaths {
        &self.paths
    }

    /// Pick a run name that collides with no existing directory or archive,
    /// appending `_2`, `_3`... to `base` when needed.
    pub fn reserve_run_name(&self, base: &str) -> String {
        let root = &self.paths.backup_root;
        let taken = |name: &str| {
            root.join(name).exists() || root.join(format!("{}.zip", name)).exists()
        };
        if !taken(base) {
            return base.to_string();
        }
        (2..)
            .map(|n| format!("{}_{}", base, n))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    /// Snapshot the live database and uploads into a fresh run directory.
    ///
    /// A failed database copy is an [`BackupError::Archive`] and leaves no run
    /// directory behind. A missing uploads directory is logged and skipped.
    pub async fn build(&self, run: &mut BackupRun) -> BackupResult<Snapshot> {
        let run_dir = self.paths.backup_root.join(&run.name);
        fs::create_dir_all(&run_dir).await.map_err(|e| {
            BackupError::Archive(format!(
                "Failed to create run directory {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        let database_copy = run_dir.join(self.paths.database_file_name());
        if let Err(e) = fs::copy(&self.paths.database_file, &database_copy).await {
            if let Err(cleanup) = fs::remove_dir_all(&run_dir).await {
                tracing::warn!(
                    error = %cleanup,
                    run_dir = %run_dir.display(),
                    "Failed to remove run directory after database copy failure"
                );
            }
            return Err(BackupError::Archive(format!(
                "Failed to copy database {}: {}",
                self.paths.database_file.display(),
                e
            )));
        }
        run.log(format!("Database copied to {}", database_copy.display()));
        run.advance(RunPhase::DbCopied);

        let uploads_archive = if fs::metadata(&self.paths.uploads_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
        {
            let target = run_dir.join(UPLOADS_ARCHIVE_NAME);
            let files = zip_blocking(self.paths.uploads_dir.clone(), target.clone())
                .await
                .map_err(|e| BackupError::Archive(format!("Failed to archive uploads: {:#}", e)))?;
            run.log(format!("Uploads archived ({} files)", files));
            Some(target)
        } else {
            run.log(format!(
                "Uploads directory {} not found, skipping",
                self.paths.uploads_dir.display()
            ));
            None
        };
        run.advance(RunPhase::Archived);

        Ok(Snapshot {
            run_dir,
            database_copy,
            uploads_archive,
        })
    }

    /// Compress a run directory into `<run_dir>.zip`, contents at the archive root.
    pub async fn package(&self, run_dir: &Path) -> BackupResult<PathBuf> {
        let archive = PathBuf::from(format!("{}.zip", run_dir.display()));

        zip_blocking(run_dir.to_path_buf(), archive.clone())
            .await
            .map_err(|e| BackupError::Archive(format!("Failed to package run: {:#}", e)))?;

        Ok(archive)
    }
}

async fn zip_blocking(src: PathBuf, dest: PathBuf) -> anyhow::Result<usize> {
    tokio::task::spawn_blocking(move || zip_directory(&src, &dest))
        .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs as stdfs;

    fn layout() -> (tempfile::TempDir, BackupPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = BackupPaths::under_root(dir.path(), false);
        (dir, paths)
    }

    #[tokio::test]
    async fn test_build_snapshot() {
        let (_dir, paths) = layout();
        stdfs::write(&paths.database_file, b"SQLite format 3\0data").unwrap();
        stdfs::create_dir_all(paths.uploads_dir.join("tickets")).unwrap();
        stdfs::write(paths.uploads_dir.join("tickets/1.png"), b"png").unwrap();

        let builder = ArchiveBuilder::new(paths.clone());
        let mut run = BackupRun::new("backup_2026-01-01_00-00-00");
        let snapshot = builder.build(&mut run).await.unwrap();

        assert_eq!(snapshot.run_dir, paths.backup_root.join(&run.name));
        assert_eq!(
            stdfs::read(&snapshot.database_copy).unwrap(),
            b"SQLite format 3\0data"
        );
        assert_eq!(snapshot.database_copy.file_name().unwrap(), "dev.db");
        assert!(snapshot.uploads_archive.as_ref().unwrap().exists());
        assert_eq!(run.phase, RunPhase::Archived);
    }

    #[tokio::test]
    async fn test_missing_uploads_is_skipped() {
        let (_dir, paths) = layout();
        stdfs::write(&paths.database_file, b"db").unwrap();

        let builder = ArchiveBuilder::new(paths);
        let mut run = BackupRun::new("backup_x");
        let snapshot = builder.build(&mut run).await.unwrap();

        assert!(snapshot.uploads_archive.is_none());
        assert!(run.log_text().contains("skipping"));
    }

    #[tokio::test]
    async fn test_missing_database_fails_and_cleans_up() {
        let (_dir, paths) = layout();
        let builder = ArchiveBuilder::new(paths.clone());
        let mut run = BackupRun::new("backup_x");

        let err = builder.build(&mut run).await.unwrap_err();
        assert!(matches!(err, BackupError::Archive(_)));
        assert!(!paths.backup_root.join("backup_x").exists());
    }

    #[tokio::test]
    async fn test_package_and_reserve_name() {
        let (_dir, paths) = layout();
        stdfs::write(&paths.database_file, b"db").unwrap();
        let builder = ArchiveBuilder::new(paths.clone());

        let mut run = BackupRun::new("backup_same");
        let snapshot = builder.build(&mut run).await.unwrap();
        let archive = builder.package(&snapshot.run_dir).await.unwrap();
        assert_eq!(archive, paths.backup_root.join("backup_same.zip"));
        assert!(archive.exists());

        assert_eq!(builder.reserve_run_name("backup_same"), "backup_same_2");
        assert_eq!(builder.reserve_run_name("backup_other"), "backup_other");
    }
}
