//! In-process advisory lock keyed by logical item.
//!
//! The gate guarantees that at most one pipeline run per item is in flight
//! inside this process. Acquisition never waits: a held key yields [`Busy`]
//! immediately, naming the job that holds it, and the caller decides whether
//! that means "reject" or "ignore as a duplicate notification".
//!
//! The lock is released when the [`GateGuard`] is dropped, so a guard held
//! across an `.await` is released on every exit path, including errors and
//! task cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;

use crate::types::{ItemId, JobId};

/// The item is currently held by another acquisition.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("item {item} is busy (held by job {holder})")]
pub struct Busy {
    pub item: ItemId,
    pub holder: JobId,
}

/// Map of held item keys to the job holding each.
#[derive(Debug, Clone, Default)]
pub struct ItemGate {
    held: Arc<Mutex<HashMap<ItemId, JobId>>>,
}

impl ItemGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to take the lock for `item` on behalf of `job`.
    ///
    /// Returns [`Busy`] without waiting if any job, including `job` itself,
    /// already holds the key.
    pub fn try_acquire(&self, item: &ItemId, job: &JobId) -> Result<GateGuard, Busy> {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holder) = held.get(item) {
            return Err(Busy {
                item: item.clone(),
                holder: holder.clone(),
            });
        }
        held.insert(item.clone(), job.clone());
        Ok(GateGuard {
            item: item.clone(),
            job: job.clone(),
            held: Arc::clone(&self.held),
        })
    }

    /// Returns the job currently holding `item`, if any.
    pub fn holder(&self, item: &ItemId) -> Option<JobId> {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(item)
            .cloned()
    }

    /// Number of items currently held.
    pub fn held_count(&self) -> usize {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Release handle for one gate acquisition.
#[derive(Debug)]
#[must_use = "the item is released as soon as the guard is dropped"]
pub struct GateGuard {
    item: ItemId,
    job: JobId,
    held: Arc<Mutex<HashMap<ItemId, JobId>>>,
}

impl GateGuard {
    pub fn item(&self) -> &ItemId {
        &self.item
    }

    pub fn job(&self) -> &JobId {
        &self.job
    }
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        // Only release our own acquisition.
        if held.get(&self.item) == Some(&self.job) {
            held.remove(&self.item);
        }
    }
}
