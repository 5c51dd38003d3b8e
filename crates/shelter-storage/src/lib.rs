//! Shelter Storage Library
//!
//! Local filesystem side of the backup engine:
//! - [`ArchiveBuilder`] snapshots the live database and uploads into a run directory
//! - [`RetentionRotator`] bounds how many run artifacts are kept
//! - [`RestorePipeline`] puts an archive back into the live locations
//!
//! Zip and recursive-copy work is synchronous and runs on the blocking pool.

pub mod archive;
pub(crate) mod fs_ops;
pub mod restore;
pub mod rotation;

pub use archive::{ArchiveBuilder, Snapshot, UPLOADS_ARCHIVE_NAME};
pub use fs_ops::{copy_dir_recursive, extract_zip, zip_directory};
pub use restore::{RestorePipeline, RestoreReport};
pub use rotation::{artifact_sort_key, RetentionRotator, RotationReport};
