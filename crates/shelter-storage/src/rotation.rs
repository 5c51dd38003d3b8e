use shelter_core::models::{RunLogger, LEGACY_RUN_PREFIX, RUN_PREFIX};
use shelter_core::{BackupError, BackupResult};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Ordering key of a backup artifact name, or `None` if the name is not a
/// recognized artifact.
///
/// Recognized: `backup_<datetime>` and legacy `full_backup_<datetime>`, each
/// optionally ending in `.zip`. The key is the embedded zero-padded
/// date-time, so legacy and current artifacts order by age.
pub fn artifact_sort_key(name: &str) -> Option<&str> {
    let stem = name.strip_suffix(".zip").unwrap_or(name);
    [LEGACY_RUN_PREFIX, RUN_PREFIX]
        .iter()
        .find_map(|prefix| {
            stem.strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('_'))
        })
        .filter(|key| key.starts_with(|c: char| c.is_ascii_digit()))
}

/// Outcome of one rotation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub kept: Vec<String>,
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

/// Keeps at most `keep_count` artifacts in one backup directory
#[derive(Clone, Debug)]
pub struct RetentionRotator {
    root: PathBuf,
}

impl RetentionRotator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Delete the oldest artifacts beyond `keep_count`.
    ///
    /// Per-item deletion failures are logged and reported; they never stop
    /// the remaining deletions.
    pub async fn rotate(
        &self,
        keep_count: usize,
        log: &mut dyn RunLogger,
    ) -> BackupResult<RotationReport> {
        let mut candidates = match self.list_artifacts().await {
            Ok(candidates) => candidates,
            Err(BackupError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(
                    root = %self.root.display(),
                    "Backup root missing, nothing to rotate"
                );
                return Ok(RotationReport::default());
            }
            Err(e) => return Err(e),
        };

        // Newest first
        candidates.sort_by(|a, b| {
            let key_a = artifact_sort_key(a).unwrap_or_default();
            let key_b = artifact_sort_key(b).unwrap_or_default();
            key_b.cmp(key_a).then_with(|| b.cmp(a))
        });

        let mut report = RotationReport::default();
        if candidates.len() <= keep_count {
            report.kept = candidates;
            return Ok(report);
        }

        let expired = candidates.split_off(keep_count);
        report.kept = candidates;

        for name in expired {
            let path = self.root.join(&name);
            match remove_artifact(&path).await {
                Ok(()) => {
                    log.info(&format!("Rotated out old backup {}", name));
                    report.deleted.push(name);
                }
                Err(e) => {
                    let err = BackupError::RotationItem {
                        item: name.clone(),
                        message: e.to_string(),
                    };
                    log.warn(&err.to_string());
                    report.failed.push(name);
                }
            }
        }

        Ok(report)
    }

    async fn list_artifacts(&self) -> BackupResult<Vec<String>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if artifact_sort_key(&name).is_some() {
                names.push(name);
            }
        }
        Ok(names)
    }
}

async fn remove_artifact(path: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path).await?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).await
    } else {
        fs::remove_file(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shelter_core::models::TracingLog;
    use std::fs as stdfs;

    #[test]
    fn test_artifact_sort_key() {
        assert_eq!(
            artifact_sort_key("backup_2026-01-02_03-04-05"),
            Some("2026-01-02_03-04-05")
        );
        assert_eq!(
            artifact_sort_key("backup_2026-01-02_03-04-05.zip"),
            Some("2026-01-02_03-04-05")
        );
        assert_eq!(
            artifact_sort_key("full_backup_2025-12-31_23-59-59"),
            Some("2025-12-31_23-59-59")
        );
        assert_eq!(artifact_sort_key("backup_notes.txt"), None);
        assert_eq!(artifact_sort_key("uploads"), None);
        assert_eq!(artifact_sort_key("backup_"), None);
    }

    fn seed(root: &Path, names: &[&str]) {
        stdfs::create_dir_all(root).unwrap();
        for name in names {
            if name.ends_with(".zip") {
                stdfs::write(root.join(name), b"zip").unwrap();
            } else {
                stdfs::create_dir_all(root.join(name)).unwrap();
                stdfs::write(root.join(name).join("dev.db"), b"db").unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_keeps_newest_across_prefixes() {
        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            &[
                "full_backup_2026-01-01_00-00-00",
                "backup_2026-01-02_00-00-00.zip",
                "backup_2026-01-03_00-00-00",
                "full_backup_2026-01-04_00-00-00",
                "unrelated",
            ],
        );

        let rotator = RetentionRotator::new(dir.path());
        let report = rotator.rotate(2, &mut TracingLog).await.unwrap();

        assert_eq!(
            report.kept,
            vec![
                "full_backup_2026-01-04_00-00-00".to_string(),
                "backup_2026-01-03_00-00-00".to_string()
            ]
        );
        assert_eq!(report.deleted.len(), 2);
        assert!(dir.path().join("unrelated").exists());
        assert!(!dir.path().join("backup_2026-01-02_00-00-00.zip").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stuck_artifact_does_not_stop_rotation() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        seed(
            dir.path(),
            &[
                "backup_2026-01-01_00-00-00",
                "backup_2026-01-02_00-00-00",
                "backup_2026-01-03_00-00-00",
                "backup_2026-01-04_00-00-00",
            ],
        );
        let stuck = dir.path().join("backup_2026-01-02_00-00-00");
        stdfs::set_permissions(&stuck, stdfs::Permissions::from_mode(0o555)).unwrap();
        // Permission bits do not bind root
        if stdfs::write(stuck.join("write-check"), b"").is_ok() {
            stdfs::set_permissions(&stuck, stdfs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let rotator = RetentionRotator::new(dir.path());
        let report = rotator.rotate(1, &mut TracingLog).await;
        stdfs::set_permissions(&stuck, stdfs::Permissions::from_mode(0o755)).unwrap();
        let report = report.unwrap();

        assert_eq!(report.kept, vec!["backup_2026-01-04_00-00-00"]);
        assert_eq!(
            report.deleted,
            vec!["backup_2026-01-03_00-00-00", "backup_2026-01-01_00-00-00"]
        );
        assert_eq!(report.failed, vec!["backup_2026-01-02_00-00-00"]);
        assert!(!dir.path().join("backup_2026-01-01_00-00-00").exists());
        assert!(stuck.join("dev.db").exists());
    }

    #[tokio::test]
    async fn test_missing_root_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let rotator = RetentionRotator::new(dir.path().join("does-not-exist"));
        let report = rotator.rotate(3, &mut TracingLog).await.unwrap();
        assert_eq!(report, RotationReport::default());
    }
}
