//! Low-level fsync operations for durability.
//!
//! Documents are replaced by rename, which updates a directory entry. Both the
//! file and its parent directory must be synced before a write is durable; a
//! synced file whose directory entry was not synced can vanish on power loss.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so that entries created or renamed in it are durable.
///
/// # Errors
///
/// Returns an error if the path doesn't exist or if the fsync system call fails.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    let dir = OpenOptions::new().read(true).open(dir_path)?;
    dir.sync_all()
}
