//! Durable document storage shared by the work log and the idempotency store.
//!
//! A document is a named JSON blob. The file-backed implementation stores each
//! document as `<dir>/<name>` and guards every access with an advisory lock on
//! `<dir>/<name>.lock`. [`DocumentStorage::update`] holds the exclusive lock
//! across its read, merge and write, so two processes pointed at the same
//! state directory never interleave a read-modify-write.
//!
//! # Atomic Writes
//!
//! Documents are replaced with write-to-temp-then-rename:
//! 1. Write to `<name>.tmp`
//! 2. fsync the temp file
//! 3. Rename to `<name>`
//! 4. fsync the directory
//!
//! Readers therefore see either the old or the new document, never a torn one.
//!
//! # Lock Acquisition
//!
//! Locks are taken non-blocking and retried a bounded number of times with a
//! short doubling pause. When the attempts run out the operation fails with
//! [`StorageError::LockContended`]; callers log it and carry on with their
//! in-memory state.

use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::fsync::{fsync_dir, fsync_file};

/// Default number of lock attempts before a storage operation gives up.
pub const DEFAULT_LOCK_ATTEMPTS: u32 = 3;

/// Pause before the first lock retry; doubles on each further retry.
const LOCK_RETRY_BASE: Duration = Duration::from_millis(20);

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The advisory lock stayed held by someone else for every attempt.
    #[error("lock on {name} still held after {attempts} attempts")]
    LockContended { name: String, attempts: u32 },

    /// Schema version mismatch.
    #[error("schema version mismatch in {name}: expected {expected}, got {got}")]
    SchemaMismatch {
        name: String,
        expected: u32,
        got: u32,
    },

    /// The backend refused the write (used by the in-memory backend).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// A persisted key-to-document substrate.
pub trait DocumentStorage: Send + Sync + fmt::Debug {
    /// Reads a document, returning `None` if it has never been written.
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Replaces a document atomically.
    fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Reads the current document, hands it to `merge`, and writes the
    /// result, all under one exclusive lock. Nothing is written if `merge`
    /// fails.
    fn update(
        &self,
        name: &str,
        merge: &mut dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>>,
    ) -> Result<()>;
}

/// Reads and decodes a JSON document.
pub fn load_document<T: DeserializeOwned>(
    storage: &dyn DocumentStorage,
    name: &str,
) -> Result<Option<T>> {
    match storage.read(name)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

/// Encodes and writes a JSON document.
pub fn save_document<T: Serialize>(
    storage: &dyn DocumentStorage,
    name: &str,
    document: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(document)?;
    storage.write(name, &bytes)
}

/// Decodes the persisted document, merges it with `merge`, and writes the
/// merged document back under the storage's exclusive lock.
pub fn update_document<T, F>(storage: &dyn DocumentStorage, name: &str, mut merge: F) -> Result<()>
where
    T: Serialize + DeserializeOwned,
    F: FnMut(Option<T>) -> Result<T>,
{
    storage.update(name, &mut |current| {
        let current = match current {
            Some(bytes) => Some(serde_json::from_slice(&bytes)?),
            None => None,
        };
        let merged = merge(current)?;
        Ok(serde_json::to_vec_pretty(&merged)?)
    })
}

/// Documents stored as files in one state directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
    lock_attempts: u32,
}

impl FileStorage {
    /// Creates a storage rooted at `dir`. The directory is created on first
    /// write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileStorage {
            dir: dir.into(),
            lock_attempts: DEFAULT_LOCK_ATTEMPTS,
        }
    }

    /// Sets the number of lock attempts (minimum 1).
    pub fn with_lock_attempts(mut self, attempts: u32) -> Self {
        self.lock_attempts = attempts.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn document_path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    /// Opens the lock file for `name` and takes the lock, retrying while
    /// another holder has it.
    fn acquire(&self, name: &str, exclusive: bool) -> Result<File> {
        std::fs::create_dir_all(&self.dir)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(self.lock_path(name))?;

        let mut delay = LOCK_RETRY_BASE;
        for attempt in 1..=self.lock_attempts {
            let locked = if exclusive {
                FileExt::try_lock_exclusive(&lock_file)
            } else {
                FileExt::try_lock_shared(&lock_file)
            };
            match locked {
                Ok(()) => return Ok(lock_file),
                Err(e) if is_contended(&e) => {
                    if attempt < self.lock_attempts {
                        tracing::debug!(document = name, attempt, "Storage lock busy, retrying");
                        std::thread::sleep(delay);
                        delay *= 2;
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::LockContended {
            name: name.to_string(),
            attempts: self.lock_attempts,
        })
    }
}

impl DocumentStorage for FileStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.document_path(name);
        if !path.exists() {
            return Ok(None);
        }
        let lock = self.acquire(name, false)?;
        let result = read_existing(&path);
        let _ = FileExt::unlock(&lock);
        result
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let lock = self.acquire(name, true)?;
        let result = write_atomic(&self.dir, &self.document_path(name), bytes);
        let _ = FileExt::unlock(&lock);
        result
    }

    fn update(
        &self,
        name: &str,
        merge: &mut dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>>,
    ) -> Result<()> {
        let lock = self.acquire(name, true)?;
        let path = self.document_path(name);
        let result = read_existing(&path)
            .and_then(|current| merge(current))
            .and_then(|bytes| write_atomic(&self.dir, &path, &bytes));
        let _ = FileExt::unlock(&lock);
        result
    }
}

fn read_existing(path: &Path) -> Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn write_atomic(dir: &Path, path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        fsync_file(&file)?;
    }
    std::fs::rename(&tmp_path, path)?;
    fsync_dir(dir)?;
    Ok(())
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Documents held in memory, for tests and embedded use.
///
/// Writes can be switched off to exercise the "persistence failed but the
/// caller carries on" paths.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    documents: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Returns the raw bytes of a document, if present.
    pub fn raw(&self, name: &str) -> Option<Vec<u8>> {
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn check_writable(&self, name: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(format!(
                "writes to {name} are disabled"
            )));
        }
        Ok(())
    }
}

impl DocumentStorage for MemoryStorage {
    fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.raw(name))
    }

    fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.check_writable(name)?;
        self.documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn update(
        &self,
        name: &str,
        merge: &mut dyn FnMut(Option<Vec<u8>>) -> Result<Vec<u8>>,
    ) -> Result<()> {
        self.check_writable(name)?;
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        let merged = merge(documents.get(name).cloned())?;
        documents.insert(name.to_string(), merged);
        Ok(())
    }
}
