use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use walkdir::WalkDir;
use zip::write::{FileOptions, ZipWriter};
use zip::{CompressionMethod, ZipArchive};

/// Highest deflate level
const MAX_COMPRESSION_LEVEL: i32 = 9;

/// Entries at or above this size need ZIP64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

fn needs_zip64(size: u64) -> bool {
    size >= ZIP64_THRESHOLD
}

/// Zip the contents of `src_dir` into `dest_file`, entries relative to `src_dir`.
///
/// Returns the number of files written. Directory entries are kept so empty
/// directories survive a restore.
pub fn zip_directory(src_dir: &Path, dest_file: &Path) -> Result<usize> {
    let file = File::create(dest_file)
        .with_context(|| format!("Failed to create archive {}", dest_file.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(MAX_COMPRESSION_LEVEL))
        .unix_permissions(0o644);

    let mut files = 0;
    for entry in WalkDir::new(src_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", src_dir.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .with_context(|| format!("Entry outside {}", src_dir.display()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)
                .with_context(|| format!("Failed to add directory to ZIP: {}", name))?;
        } else if entry.file_type().is_file() {
            let size = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?
                .len();
            let file_options = options.large_file(needs_zip64(size));
            zip.start_file(name.clone(), file_options)
                .with_context(|| format!("Failed to add file to ZIP: {}", name))?;
            let mut source = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            io::copy(&mut source, &mut zip)
                .with_context(|| format!("Failed to write file data to ZIP: {}", name))?;
            files += 1;
        }
    }

    zip.finish().context("Failed to finalize ZIP archive")?;
    Ok(files)
}

/// Extract `archive` into `dest_dir`, overwriting files with the same name.
///
/// Entries whose names would escape `dest_dir` are skipped. Returns the
/// number of files written.
pub fn extract_zip(archive: &Path, dest_dir: &Path) -> Result<usize> {
    let file =
        File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let mut zip = ZipArchive::new(file)
        .with_context(|| format!("Not a valid ZIP archive: {}", archive.display()))?;

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;

    let mut files = 0;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .with_context(|| format!("Failed to read entry {} of ZIP", index))?;

        let relative = match entry.enclosed_name() {
            Some(path) => path.to_path_buf(),
            None => {
                tracing::warn!(entry = %entry.name(), "Skipping ZIP entry with unsafe path");
                continue;
            }
        };
        let target = dest_dir.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let mut out = File::create(&target)
            .with_context(|| format!("Failed to write {}", target.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("Failed to extract {}", relative.display()))?;
        files += 1;
    }

    Ok(files)
}

/// Copy a directory tree. `dest` is created; existing files are overwritten.
pub fn copy_dir_recursive(src: &Path, dest: &Path) -> Result<u64> {
    let mut bytes = 0;
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {}", dest.display()))?;

    for entry in WalkDir::new(src).min_depth(1) {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .with_context(|| format!("Entry outside {}", src.display()))?;
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {}", target.display()))?;
        } else {
            bytes += fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
        }
    }

    Ok(bytes)
}
