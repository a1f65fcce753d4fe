//! Job lifecycle engine.
//!
//! The engine decides what to do with each protocol notification and drives
//! paid jobs through the execution pipeline. It owns no I/O of its own: every
//! outbound call is an effect handed to a [`ProtocolInterpreter`] or
//! [`ServiceInterpreter`], and all shared state lives in an explicitly
//! constructed [`EngineContext`].
//!
//! # Guarantees
//!
//! - At most one mint per item: validation, the processed-item check and the
//!   item gate all run before the pipeline, and the pipeline consults the
//!   minted-job index before minting.
//! - Resumable delivery: every job past the payment gate has a work log
//!   entry until it is delivered or deliberately abandoned, and the entry
//!   carries enough checkpoints to resume without repeating side effects.

mod phase;
mod pipeline;
mod recovery;


use std::sync::Arc;

use chrono::Duration;
use thiserror::Error;
use tokio::task::JoinError;
use tracing::warn;

use crate::effects::{ProtocolEffect, ProtocolInterpreter, ServiceInterpreter};
use crate::gate::ItemGate;
use crate::gateway::ServiceError;
use crate::persistence::{DocumentStorage, IdempotencyStore, StorageError, WorkLog, WorkLogEntry};
use crate::types::{Deliverable, ItemId, JobId, JobPhase};

pub use pipeline::PipelineError;
pub use recovery::RecoveryReport;

/// Default hours an Accepted entry may wait for payment before recovery
/// abandons it.
pub const DEFAULT_STALE_ENTRY_HOURS: i64 = 24;

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Price quoted in payment terms.
    pub price: f64,
    /// Payer used when a notification carries no client address.
    pub default_payer: Option<String>,
    /// Approve Evaluating jobs that this engine already minted.
    pub auto_evaluate: bool,
    /// Age past which an unpaid entry is abandoned by recovery.
    pub stale_after: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            price: 1.0,
            default_payer: None,
            auto_evaluate: false,
            stale_after: Duration::hours(DEFAULT_STALE_ENTRY_HOURS),
        }
    }
}

/// All shared mutable state of the engine.
#[derive(Debug)]
pub struct EngineContext {
    pub worklog: WorkLog,
    pub idempotency: IdempotencyStore,
    pub gate: ItemGate,
}

impl EngineContext {
    /// Opens the work log and idempotency store on `storage`.
    pub fn open(
        storage: Arc<dyn DocumentStorage>,
        processed_cap: usize,
    ) -> Result<Self, StorageError> {
        Ok(EngineContext {
            worklog: WorkLog::open(Arc::clone(&storage))?,
            idempotency: IdempotencyStore::open(storage, processed_cap)?,
            gate: ItemGate::new(),
        })
    }
}

/// Errors surfaced by the engine after any bookkeeping is done.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The pipeline stopped before delivery. The error is recorded on the
    /// work log entry and recovery will pick the job up again.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A protocol call needed to advance the job failed.
    #[error("protocol {effect} failed for job {job_id}: {source}")]
    Protocol {
        job_id: JobId,
        effect: &'static str,
        #[source]
        source: ServiceError,
    },

    /// A state update on the blocking pool did not run to completion.
    #[error("state update failed: {0}")]
    State(#[from] JoinError),
}

/// Why a notification produced no action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// A negotiation notification for a job that already has an entry.
    DuplicateNegotiation,
    /// A paid notification for a job that has already minted.
    AlreadyMinted,
    /// Another run for the same job holds the item.
    InFlight,
    /// A terminal notification with nothing left to clean up.
    Terminal,
}

/// What the engine did with one notification.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Payment terms were posted and an Accepted entry written.
    PaymentRequested { item: ItemId },
    /// The job was rejected with this reason.
    Rejected { reason: String },
    /// The job ran to delivery.
    Delivered(Deliverable),
    /// The job's entry was dropped after the protocol ended it.
    Abandoned { phase: JobPhase },
    /// An evaluation verdict was posted.
    Evaluated { approved: bool },
    /// Nothing to do.
    Ignored(IgnoreReason),
}

/// The job lifecycle engine.
#[derive(Debug)]
pub struct Engine<P, S> {
    ctx: Arc<EngineContext>,
    protocol: P,
    services: S,
    config: EngineConfig,
}

impl<P, S> Engine<P, S> {
    pub fn new(ctx: Arc<EngineContext>, protocol: P, services: S, config: EngineConfig) -> Self {
        Engine {
            ctx,
            protocol,
            services,
            config,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    pub fn services(&self) -> &S {
        &self.services
    }

    /// Runs `f` against the shared state on the blocking pool.
    ///
    /// Work log and idempotency writes go through storage and may wait on its
    /// file locks, so they stay off the async workers.
    async fn with_state<T, F>(&self, f: F) -> Result<T, JoinError>
    where
        F: FnOnce(&EngineContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        let ctx = Arc::clone(&self.ctx);
        tokio::task::spawn_blocking(move || f(&ctx)).await
    }

    async fn remove_entry(&self, job_id: &JobId) -> Result<Option<WorkLogEntry>, JoinError> {
        let job_id = job_id.clone();
        self.with_state(move |ctx| ctx.worklog.remove(&job_id)).await
    }

    /// Checks the minted index in memory, then on disk.
    async fn is_minted(&self, job_id: &JobId) -> Result<bool, JoinError> {
        if self.ctx.idempotency.has_minted(job_id) {
            return Ok(true);
        }
        let job_id = job_id.clone();
        self.with_state(move |ctx| ctx.idempotency.lookup_minted_durable(&job_id).is_some())
            .await
    }
}

impl<P, S> Engine<P, S>
where
    P: ProtocolInterpreter<Error = ServiceError> + Sync,
    S: ServiceInterpreter<Error = ServiceError> + Sync,
{
    /// Posts a rejection. The protocol call is best-effort: the job expires
    /// on the protocol side if the call is lost.
    async fn reject(&self, job_id: &JobId, reason: String) -> Outcome {
        let effect = ProtocolEffect::Reject {
            job_id: job_id.clone(),
            reason: reason.clone(),
        };
        if let Err(e) = self.protocol.interpret(effect).await {
            warn!(job_id = %job_id, error = %e, "Failed to post rejection");
        }
        Outcome::Rejected { reason }
    }

    /// Runs a protocol effect whose failure aborts the current step.
    async fn protocol_call(&self, effect: ProtocolEffect) -> Result<(), EngineError> {
        let job_id = effect.job_id().clone();
        let name = effect.name();
        self.protocol
            .interpret(effect)
            .await
            .map(|_| ())
            .map_err(|source| EngineError::Protocol {
                job_id,
                effect: name,
                source,
            })
    }
}
