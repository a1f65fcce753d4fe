//! Persistence layer for the mint relay.
//!
//! Two JSON documents live in the state directory:
//!
//! ```text
//! <state_dir>/
//!   worklog.json          # in-flight jobs and their checkpoints
//!   worklog.json.lock
//!   idempotency.json      # processed items and minted job receipts
//!   idempotency.json.lock
//! ```
//!
//! # Crash Safety
//!
//! - Documents are replaced atomically using write-to-temp-then-rename
//! - Files and the directory are fsynced after every write
//! - Each document is guarded by an advisory lock file
//! - Writes re-read the document under that lock and merge into it, so
//!   processes sharing a state directory keep each other's records
//!
//! # Failure Policy
//!
//! The in-memory mirror of each document is authoritative for the running
//! process. A write that cannot be persisted (lock contention after the
//! bounded retries, IO error) is logged at `warn` and the in-memory change
//! stands.

pub mod fsync;
pub mod idempotency;
pub mod storage;
pub mod worklog;

pub use fsync::{fsync_dir, fsync_file};
pub use idempotency::{DEFAULT_PROCESSED_CAP, IDEMPOTENCY_DOCUMENT, IdempotencyStore};
pub use storage::{
    DEFAULT_LOCK_ATTEMPTS, DocumentStorage, FileStorage, MemoryStorage, StorageError,
    load_document, save_document, update_document,
};
pub use worklog::{EntryStatus, WORKLOG_DOCUMENT, WorkLog, WorkLogEntry};
