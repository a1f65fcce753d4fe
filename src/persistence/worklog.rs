//! The work log: durable record of every job between the payment gate and
//! delivery.
//!
//! Each entry carries enough of the original request to resume the job after a
//! crash, plus checkpoints (mint receipt, registered identity, published
//! categories) that let a resumed run skip everything already done.
//!
//! The log keeps an in-memory mirror that is always authoritative for the
//! running process. Every mutation re-reads the persisted document under the
//! storage lock, overlays this process's entries, drops the entries it
//! removed, and writes the result. Entries written by another process sharing
//! the state directory are left alone. A failed write is logged and the
//! in-memory change stands.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::storage::{DocumentStorage, Result, StorageError, load_document, update_document};
use crate::types::{IdentityRef, ItemId, JobId, MintOrder, MintReceipt, SourceContent};

/// Document name of the work log inside the state directory.
pub const WORKLOG_DOCUMENT: &str = "worklog.json";

/// Current schema version of the work log document.
pub const WORKLOG_SCHEMA_VERSION: u32 = 1;

/// Engine-side progress of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Past the payment gate, not yet minted.
    Accepted,
    /// Minted; publishing and delivery may be outstanding.
    Minted,
    /// Delivered. Entries in this state are removed as soon as they reach it.
    Completed,
}

/// One in-flight job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkLogEntry {
    pub job_id: JobId,
    pub item: ItemId,
    pub order: MintOrder,
    pub status: EntryStatus,
    /// Fetched source content, kept for deriving catalog metadata on resume.
    #[serde(default)]
    pub content: Option<SourceContent>,
    #[serde(default)]
    pub receipt: Option<MintReceipt>,
    #[serde(default)]
    pub identity: Option<IdentityRef>,
    /// Categories already published, in publish order.
    #[serde(default)]
    pub published: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl WorkLogEntry {
    /// A fresh entry for an order that just passed the payment gate.
    pub fn accepted(order: MintOrder) -> Self {
        let now = Utc::now();
        WorkLogEntry {
            job_id: order.job_id.clone(),
            item: order.item.clone(),
            order,
            status: EntryStatus::Accepted,
            content: None,
            receipt: None,
            identity: None,
            published: Vec::new(),
            created_at: now,
            updated_at: now,
            retry_count: 0,
            last_error: None,
        }
    }

    pub fn is_published(&self, category: &str) -> bool {
        self.published.iter().any(|c| c == category)
    }

    /// Categories of the order not yet published, in order.
    pub fn pending_categories(&self) -> Vec<String> {
        self.order
            .categories
            .iter()
            .filter(|c| !self.is_published(c))
            .cloned()
            .collect()
    }

    /// Time since the entry was created.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now.signed_duration_since(self.created_at)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkLogDocument {
    schema_version: u32,
    updated_at: DateTime<Utc>,
    entries: BTreeMap<JobId, WorkLogEntry>,
}

impl WorkLogDocument {
    fn check_schema(&self) -> Result<()> {
        if self.schema_version != WORKLOG_SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                name: WORKLOG_DOCUMENT.to_string(),
                expected: WORKLOG_SCHEMA_VERSION,
                got: self.schema_version,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct LogState {
    entries: BTreeMap<JobId, WorkLogEntry>,
    /// Jobs removed here whose removal has not reached storage yet.
    dropped: BTreeSet<JobId>,
}

/// Durable map of job id to [`WorkLogEntry`].
#[derive(Debug)]
pub struct WorkLog {
    storage: Arc<dyn DocumentStorage>,
    state: Mutex<LogState>,
}

impl WorkLog {
    /// Opens the work log, loading any persisted entries.
    ///
    /// # Errors
    ///
    /// Fails if the persisted document exists but cannot be read or decoded,
    /// or was written by an incompatible schema version. A missing document
    /// is an empty log.
    pub fn open(storage: Arc<dyn DocumentStorage>) -> Result<Self> {
        let entries = match load_document::<WorkLogDocument>(storage.as_ref(), WORKLOG_DOCUMENT)? {
            Some(doc) => {
                doc.check_schema()?;
                doc.entries
            }
            None => BTreeMap::new(),
        };
        debug!(entries = entries.len(), "Loaded work log");
        Ok(WorkLog {
            storage,
            state: Mutex::new(LogState {
                entries,
                dropped: BTreeSet::new(),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Writes this process's view over the persisted document. Called with
    /// the state lock held so writes land in mutation order.
    fn persist(&self, state: &mut LogState) {
        let result = update_document(
            self.storage.as_ref(),
            WORKLOG_DOCUMENT,
            |persisted: Option<WorkLogDocument>| {
                let mut entries = match persisted {
                    Some(doc) => {
                        doc.check_schema()?;
                        doc.entries
                    }
                    None => BTreeMap::new(),
                };
                for job in &state.dropped {
                    entries.remove(job);
                }
                for (job, entry) in &state.entries {
                    entries.insert(job.clone(), entry.clone());
                }
                Ok(WorkLogDocument {
                    schema_version: WORKLOG_SCHEMA_VERSION,
                    updated_at: Utc::now(),
                    entries,
                })
            },
        );
        match result {
            Ok(()) => state.dropped.clear(),
            Err(e) => warn!(error = %e, "Failed to persist work log; keeping in-memory state"),
        }
    }

    /// Applies `f` to the entry for `job`, persisting if it exists.
    fn update<F>(&self, job: &JobId, f: F) -> Option<WorkLogEntry>
    where
        F: FnOnce(&mut WorkLogEntry),
    {
        let mut state = self.lock();
        let entry = state.entries.get_mut(job)?;
        f(entry);
        entry.updated_at = Utc::now();
        let snapshot = entry.clone();
        self.persist(&mut state);
        Some(snapshot)
    }

    pub fn get(&self, job: &JobId) -> Option<WorkLogEntry> {
        self.lock().entries.get(job).cloned()
    }

    pub fn contains(&self, job: &JobId) -> bool {
        self.lock().entries.contains_key(job)
    }

    /// All entries, ordered by job id.
    pub fn entries(&self) -> Vec<WorkLogEntry> {
        self.lock().entries.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Inserts an Accepted entry for `order` unless the job already has one.
    ///
    /// Returns the entry now in the log and whether it was created by this
    /// call.
    pub fn accept(&self, order: &MintOrder) -> (WorkLogEntry, bool) {
        let mut state = self.lock();
        if let Some(existing) = state.entries.get(&order.job_id) {
            return (existing.clone(), false);
        }
        let entry = WorkLogEntry::accepted(order.clone());
        state.dropped.remove(&order.job_id);
        state.entries.insert(order.job_id.clone(), entry.clone());
        self.persist(&mut state);
        debug!(job_id = %order.job_id, item = %order.item, "Work log entry accepted");
        (entry, true)
    }

    /// Checkpoints the mint receipt and moves the entry to Minted.
    pub fn mark_minted(
        &self,
        job: &JobId,
        receipt: &MintReceipt,
        content: Option<&SourceContent>,
    ) -> Option<WorkLogEntry> {
        self.update(job, |entry| {
            entry.status = EntryStatus::Minted;
            entry.receipt = Some(receipt.clone());
            if let Some(content) = content {
                entry.content = Some(content.clone());
            }
            entry.last_error = None;
        })
    }

    /// Checkpoints the registered publishing identity.
    pub fn set_identity(&self, job: &JobId, identity: &IdentityRef) -> Option<WorkLogEntry> {
        self.update(job, |entry| entry.identity = Some(identity.clone()))
    }

    /// Records a successful publish to `category`. Idempotent.
    pub fn mark_published(&self, job: &JobId, category: &str) -> Option<WorkLogEntry> {
        self.update(job, |entry| {
            if !entry.is_published(category) {
                entry.published.push(category.to_string());
            }
        })
    }

    /// Records a failed run, bumping the retry count.
    pub fn record_error(&self, job: &JobId, error: &str) -> Option<WorkLogEntry> {
        self.update(job, |entry| {
            entry.retry_count += 1;
            entry.last_error = Some(error.to_string());
        })
    }

    /// Marks the entry Completed and drops it from the log.
    pub fn complete(&self, job: &JobId) -> Option<WorkLogEntry> {
        let mut entry = self.remove(job)?;
        entry.status = EntryStatus::Completed;
        entry.updated_at = Utc::now();
        Some(entry)
    }

    /// Drops the entry for `job`, if any.
    pub fn remove(&self, job: &JobId) -> Option<WorkLogEntry> {
        let mut state = self.lock();
        let removed = state.entries.remove(job)?;
        state.dropped.insert(job.clone());
        self.persist(&mut state);
        debug!(job_id = %job, "Work log entry removed");
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::storage::{FileStorage, MemoryStorage};
    use crate::test_utils::sample_order;
    use crate::types::{AssetId, TxRef};
    use tempfile::tempdir;

    fn memory_log() -> (Arc<MemoryStorage>, WorkLog) {
        let storage = Arc::new(MemoryStorage::new());
        let log = WorkLog::open(storage.clone()).unwrap();
        (storage, log)
    }

    fn receipt() -> MintReceipt {
        MintReceipt::new(TxRef::new("0xtx"), AssetId::new("9"))
    }

    // ─── Lifecycle ───

    #[test]
    fn accept_creates_once() {
        let (_, log) = memory_log();
        let order = sample_order("1", "111", &["crypto"]);

        let (entry, created) = log.accept(&order);
        assert!(created);
        assert_eq!(entry.status, EntryStatus::Accepted);

        let (again, created) = log.accept(&order);
        assert!(!created);
        assert_eq!(again.created_at, entry.created_at);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn checkpoints_accumulate() {
        let (_, log) = memory_log();
        let job = JobId::new("1");
        log.accept(&sample_order("1", "111", &["crypto", "defi"]));

        log.mark_minted(&job, &receipt(), None);
        log.set_identity(&job, &IdentityRef::new("id-1"));
        log.mark_published(&job, "crypto");
        log.mark_published(&job, "crypto");

        let entry = log.get(&job).unwrap();
        assert_eq!(entry.status, EntryStatus::Minted);
        assert_eq!(entry.receipt, Some(receipt()));
        assert_eq!(entry.identity, Some(IdentityRef::new("id-1")));
        assert_eq!(entry.published, vec!["crypto"]);
        assert_eq!(entry.pending_categories(), vec!["defi"]);
    }

    #[test]
    fn record_error_bumps_retry_count() {
        let (_, log) = memory_log();
        let job = JobId::new("1");
        log.accept(&sample_order("1", "111", &["crypto"]));

        log.record_error(&job, "timeout");
        let entry = log.record_error(&job, "rate limited").unwrap();
        assert_eq!(entry.retry_count, 2);
        assert_eq!(entry.last_error.as_deref(), Some("rate limited"));
    }

    #[test]
    fn updates_to_missing_entries_are_noops() {
        let (_, log) = memory_log();
        assert!(log.mark_minted(&JobId::new("nope"), &receipt(), None).is_none());
        assert!(log.remove(&JobId::new("nope")).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn complete_removes_entry() {
        let (_, log) = memory_log();
        let job = JobId::new("1");
        log.accept(&sample_order("1", "111", &["crypto"]));

        let done = log.complete(&job).unwrap();
        assert_eq!(done.status, EntryStatus::Completed);
        assert!(!log.contains(&job));
    }

    // ─── Durability ───

    #[test]
    fn reopen_restores_entries() {
        let dir = tempdir().unwrap();
        let storage: Arc<dyn DocumentStorage> = Arc::new(FileStorage::new(dir.path()));
        let job = JobId::new("1");
        {
            let log = WorkLog::open(storage.clone()).unwrap();
            log.accept(&sample_order("1", "111", &["crypto", "defi"]));
            log.mark_minted(&job, &receipt(), None);
            log.mark_published(&job, "crypto");
        }

        let reopened = WorkLog::open(storage).unwrap();
        let entry = reopened.get(&job).unwrap();
        assert_eq!(entry.status, EntryStatus::Minted);
        assert_eq!(entry.published, vec!["crypto"]);
    }

    #[test]
    fn logs_sharing_a_directory_keep_each_others_entries() {
        let dir = tempdir().unwrap();
        let ours = WorkLog::open(Arc::new(FileStorage::new(dir.path()))).unwrap();
        let theirs = WorkLog::open(Arc::new(FileStorage::new(dir.path()))).unwrap();

        theirs.accept(&sample_order("1", "111", &["crypto"]));
        ours.accept(&sample_order("2", "222", &["crypto"]));
        ours.accept(&sample_order("3", "333", &["crypto"]));
        ours.remove(&JobId::new("3"));

        let reopened = WorkLog::open(Arc::new(FileStorage::new(dir.path()))).unwrap();
        assert!(reopened.contains(&JobId::new("1")));
        assert!(reopened.contains(&JobId::new("2")));
        assert!(!reopened.contains(&JobId::new("3")));
    }

    #[test]
    fn removal_reaches_storage_after_a_failed_write() {
        let (storage, log) = memory_log();
        log.accept(&sample_order("1", "111", &["crypto"]));

        storage.set_fail_writes(true);
        log.remove(&JobId::new("1"));
        storage.set_fail_writes(false);
        log.accept(&sample_order("2", "222", &["crypto"]));

        let reopened = WorkLog::open(storage).unwrap();
        assert!(!reopened.contains(&JobId::new("1")));
        assert!(reopened.contains(&JobId::new("2")));
    }

    #[test]
    fn failed_write_keeps_memory_state() {
        let (storage, log) = memory_log();
        storage.set_fail_writes(true);

        let (_, created) = log.accept(&sample_order("1", "111", &["crypto"]));
        assert!(created);
        assert!(log.contains(&JobId::new("1")));
        assert!(storage.raw(WORKLOG_DOCUMENT).is_none());
    }

    #[test]
    fn schema_mismatch_is_rejected() {
        let storage = Arc::new(MemoryStorage::new());
        let doc = serde_json::json!({
            "schema_version": 99,
            "updated_at": Utc::now(),
            "entries": {},
        });
        storage
            .write(WORKLOG_DOCUMENT, doc.to_string().as_bytes())
            .unwrap();

        assert!(matches!(
            WorkLog::open(storage),
            Err(StorageError::SchemaMismatch { got: 99, .. })
        ));
    }
}
