//! Durable dedup records: which items have been minted for, and which jobs
//! have minted.
//!
//! Both sets live in one document. The processed-item set is capped; when it
//! grows past the cap the oldest insertions are dropped first. The minted-job
//! map is never trimmed, since losing a receipt would allow a second mint.
//!
//! Every write merges with the persisted document under its lock: minted
//! receipts and processed items recorded by another process sharing the
//! state directory are folded into this store's records rather than
//! overwritten.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::storage::{DocumentStorage, Result, StorageError, load_document, update_document};
use crate::types::{ItemId, JobId, MintReceipt};

/// Document name of the idempotency records inside the state directory.
pub const IDEMPOTENCY_DOCUMENT: &str = "idempotency.json";

/// Current schema version of the idempotency document.
pub const IDEMPOTENCY_SCHEMA_VERSION: u32 = 1;

/// Default cap on remembered processed items.
pub const DEFAULT_PROCESSED_CAP: usize = 10_000;

#[derive(Debug, Default, Serialize, Deserialize)]
struct IdempotencyDocument {
    schema_version: u32,
    /// Oldest first.
    processed_items: Vec<ItemId>,
    minted_jobs: BTreeMap<JobId, MintReceipt>,
}

#[derive(Debug, Default)]
struct Records {
    order: VecDeque<ItemId>,
    processed: HashSet<ItemId>,
    minted: BTreeMap<JobId, MintReceipt>,
}

impl Records {
    fn from_document(doc: IdempotencyDocument, cap: usize) -> Self {
        let mut records = Records {
            minted: doc.minted_jobs,
            ..Records::default()
        };
        for item in doc.processed_items {
            records.insert_processed(item);
        }
        records.trim(cap);
        records
    }

    fn insert_processed(&mut self, item: ItemId) -> bool {
        if self.processed.insert(item.clone()) {
            self.order.push_back(item);
            true
        } else {
            false
        }
    }

    fn trim(&mut self, cap: usize) -> usize {
        let mut dropped = 0;
        while self.order.len() > cap {
            if let Some(oldest) = self.order.pop_front() {
                self.processed.remove(&oldest);
                dropped += 1;
            }
        }
        dropped
    }

    /// Folds a persisted document into these records. Persisted receipts
    /// never replace ours; persisted items count as older than ours.
    fn absorb(&mut self, doc: IdempotencyDocument, cap: usize) {
        for (job, receipt) in doc.minted_jobs {
            self.minted.entry(job).or_insert(receipt);
        }
        let ours = std::mem::take(&mut self.order);
        self.processed.clear();
        for item in doc.processed_items.into_iter().chain(ours) {
            self.insert_processed(item);
        }
        self.trim(cap);
    }

    fn to_document(&self) -> IdempotencyDocument {
        IdempotencyDocument {
            schema_version: IDEMPOTENCY_SCHEMA_VERSION,
            processed_items: self.order.iter().cloned().collect(),
            minted_jobs: self.minted.clone(),
        }
    }
}

/// Processed items and minted jobs, mirrored in memory.
#[derive(Debug)]
pub struct IdempotencyStore {
    storage: Arc<dyn DocumentStorage>,
    cap: usize,
    records: Mutex<Records>,
}

impl IdempotencyStore {
    /// Opens the store, loading persisted records.
    ///
    /// # Errors
    ///
    /// Fails if the document exists but cannot be read or decoded, or has an
    /// unknown schema version.
    pub fn open(storage: Arc<dyn DocumentStorage>, cap: usize) -> Result<Self> {
        let doc = load_persisted(storage.as_ref())?.unwrap_or_default();
        let records = Records::from_document(doc, cap);
        debug!(
            processed = records.processed.len(),
            minted = records.minted.len(),
            "Loaded idempotency records"
        );
        Ok(IdempotencyStore {
            storage,
            cap,
            records: Mutex::new(records),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Merges the persisted document into `records` and writes the union.
    fn persist(&self, records: &mut Records) {
        let cap = self.cap;
        let result = update_document(
            self.storage.as_ref(),
            IDEMPOTENCY_DOCUMENT,
            |persisted: Option<IdempotencyDocument>| {
                if let Some(doc) = persisted {
                    check_schema(&doc)?;
                    records.absorb(doc, cap);
                }
                Ok(records.to_document())
            },
        );
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist idempotency records; keeping in-memory state");
        }
    }

    pub fn has_processed(&self, item: &ItemId) -> bool {
        self.lock().processed.contains(item)
    }

    /// Remembers `item` as processed, trimming the oldest entries past the cap.
    pub fn mark_processed(&self, item: &ItemId) {
        let mut records = self.lock();
        if !records.insert_processed(item.clone()) {
            return;
        }
        let dropped = records.trim(self.cap);
        if dropped > 0 {
            debug!(dropped, cap = self.cap, "Trimmed oldest processed items");
        }
        self.persist(&mut records);
    }

    pub fn has_minted(&self, job: &JobId) -> bool {
        self.lock().minted.contains_key(job)
    }

    pub fn minted_receipt(&self, job: &JobId) -> Option<MintReceipt> {
        self.lock().minted.get(job).cloned()
    }

    /// Records that `job` minted, keeping the first receipt if called twice.
    pub fn mark_minted(&self, job: &JobId, receipt: &MintReceipt) {
        let mut records = self.lock();
        if records.minted.contains_key(job) {
            return;
        }
        records.minted.insert(job.clone(), receipt.clone());
        self.persist(&mut records);
    }

    /// Re-reads the persisted document for a receipt of `job`.
    ///
    /// Covers the case where another process sharing the state directory
    /// minted the job after this store was opened. A receipt found here is
    /// folded into the in-memory mirror. Read failures are logged and treated
    /// as "not found".
    pub fn lookup_minted_durable(&self, job: &JobId) -> Option<MintReceipt> {
        let doc = match load_persisted(self.storage.as_ref()) {
            Ok(doc) => doc?,
            Err(e) => {
                warn!(job_id = %job, error = %e, "Durable minted lookup failed");
                return None;
            }
        };
        let receipt = doc.minted_jobs.get(job)?.clone();
        self.lock()
            .minted
            .entry(job.clone())
            .or_insert_with(|| receipt.clone());
        Some(receipt)
    }

    /// Number of remembered processed items.
    pub fn count(&self) -> usize {
        self.lock().processed.len()
    }

    /// Number of minted jobs.
    pub fn minted_count(&self) -> usize {
        self.lock().minted.len()
    }
}

fn load_persisted(storage: &dyn DocumentStorage) -> Result<Option<IdempotencyDocument>> {
    let doc = load_document::<IdempotencyDocument>(storage, IDEMPOTENCY_DOCUMENT)?;
    if let Some(doc) = &doc {
        check_schema(doc)?;
    }
    Ok(doc)
}

fn check_schema(doc: &IdempotencyDocument) -> Result<()> {
    if doc.schema_version != IDEMPOTENCY_SCHEMA_VERSION {
        return Err(StorageError::SchemaMismatch {
            name: IDEMPOTENCY_DOCUMENT.to_string(),
            expected: IDEMPOTENCY_SCHEMA_VERSION,
            got: doc.schema_version,
        });
    }
    Ok(())
}
