//! Startup recovery of jobs left in the work log.
//!
//! Each entry is examined once per pass and either resumed, left waiting for
//! payment, or abandoned. A pass never retries a failed entry; the failure is
//! recorded like a live one and the next pass (or the next notification for
//! the job) picks it up. Running two passes back to back converges on the same
//! state as one: completed entries are gone, and resumed ones restart from
//! their checkpoints.

use chrono::Utc;
use tokio::task::JoinError;
use tracing::{info, instrument, warn};

use super::{Engine, Outcome};
use crate::effects::{ProtocolEffect, ProtocolInterpreter, ProtocolResponse, ServiceInterpreter};
use crate::gateway::ServiceError;
use crate::persistence::{EntryStatus, WorkLogEntry};
use crate::types::{JobId, JobPhase};

/// Summary of one recovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Entries for which the pipeline was re-entered.
    pub resumed: Vec<JobId>,
    /// Resumed entries that reached delivery.
    pub completed: Vec<JobId>,
    /// Entries dropped without delivery.
    pub abandoned: Vec<JobId>,
    /// Entries still waiting for payment.
    pub waiting: Vec<JobId>,
    /// Entries whose item was held by a live run.
    pub skipped: Vec<JobId>,
    /// Resumed entries that stopped again, with the error.
    pub failed: Vec<(JobId, String)>,
}

/// What to do with one Accepted entry after asking the protocol about it.
enum PendingDecision {
    Run,
    Wait,
    Abandon,
}

impl<P, S> Engine<P, S>
where
    P: ProtocolInterpreter<Error = ServiceError> + Sync,
    S: ServiceInterpreter<Error = ServiceError> + Sync,
{
    /// Examines every work log entry once.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let entries = self.ctx.worklog.entries();
        info!(entries = entries.len(), "Starting recovery pass");

        for entry in entries {
            let job_id = entry.job_id.clone();
            if let Err(e) = self.recover_entry(entry, &mut report).await {
                warn!(job_id = %job_id, error = %e, "Recovery of entry interrupted");
                report.failed.push((job_id, e.to_string()));
            }
        }

        info!(
            resumed = report.resumed.len(),
            completed = report.completed.len(),
            abandoned = report.abandoned.len(),
            waiting = report.waiting.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Recovery pass finished"
        );
        report
    }

    async fn recover_entry(
        &self,
        entry: WorkLogEntry,
        report: &mut RecoveryReport,
    ) -> Result<(), JoinError> {
        let job_id = entry.job_id.clone();
        let Ok(_guard) = self.ctx.gate.try_acquire(&entry.item, &job_id) else {
            info!(job_id = %job_id, "Item held by a live run; skipping");
            report.skipped.push(job_id);
            return Ok(());
        };

        match entry.status {
            EntryStatus::Accepted => {
                if entry.age(Utc::now()) > self.config.stale_after {
                    self.abandon_stale(&job_id).await?;
                    report.abandoned.push(job_id);
                    return Ok(());
                }
                match self.decide_pending(&entry).await? {
                    PendingDecision::Run => self.resume(entry, report).await,
                    PendingDecision::Wait => report.waiting.push(job_id),
                    PendingDecision::Abandon => {
                        self.remove_entry(&job_id).await?;
                        report.abandoned.push(job_id);
                    }
                }
            }
            EntryStatus::Minted => self.resume(entry, report).await,
            EntryStatus::Completed => {
                self.remove_entry(&job_id).await?;
                report.abandoned.push(job_id);
            }
        }
        Ok(())
    }

    /// Rejects a job that never paid within the cutoff, then drops it.
    async fn abandon_stale(&self, job_id: &JobId) -> Result<(), JoinError> {
        let hours = self.config.stale_after.num_hours();
        match self.lookup_phase(job_id).await {
            Ok(Some(phase)) if !phase.is_terminal() => {
                info!(job_id = %job_id, %phase, "Rejecting stale job");
                self.reject(
                    job_id,
                    format!("payment not received within {hours} hours"),
                )
                .await;
            }
            Ok(_) => {}
            Err(e) => warn!(job_id = %job_id, error = %e, "Lookup failed for stale job"),
        }
        self.remove_entry(job_id).await?;
        Ok(())
    }

    async fn decide_pending(&self, entry: &WorkLogEntry) -> Result<PendingDecision, JoinError> {
        let job_id = &entry.job_id;

        // A mint recorded without its work log checkpoint must be finished.
        if self.is_minted(job_id).await? {
            return Ok(PendingDecision::Run);
        }
        if self.ctx.idempotency.has_processed(&entry.item) {
            self.reject(
                job_id,
                format!("item {} already processed by an earlier job", entry.item),
            )
            .await;
            return Ok(PendingDecision::Abandon);
        }

        let decision = match self.lookup_phase(job_id).await {
            Ok(Some(phase)) if phase.is_terminal() => {
                info!(job_id = %job_id, %phase, "Job ended while we were down");
                PendingDecision::Abandon
            }
            Ok(Some(phase)) if phase.is_pre_payment() => PendingDecision::Wait,
            Ok(Some(_)) => PendingDecision::Run,
            Ok(None) => {
                info!(job_id = %job_id, "Protocol no longer knows the job");
                PendingDecision::Abandon
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Lookup unavailable; resuming");
                PendingDecision::Run
            }
        };
        Ok(decision)
    }

    async fn lookup_phase(&self, job_id: &JobId) -> Result<Option<JobPhase>, ServiceError> {
        let response = self
            .protocol
            .interpret(ProtocolEffect::LookupJob {
                job_id: job_id.clone(),
            })
            .await?;
        match response {
            ProtocolResponse::Job(phase) => Ok(phase),
            ProtocolResponse::Ok => Err(ServiceError::permanent(
                "lookup_job returned no job view",
            )),
        }
    }

    async fn resume(&self, entry: WorkLogEntry, report: &mut RecoveryReport) {
        let job_id = entry.job_id.clone();
        report.resumed.push(job_id.clone());
        match self.run_pipeline(entry).await {
            Ok(Outcome::Delivered(_)) => report.completed.push(job_id),
            Ok(_) => report.abandoned.push(job_id),
            Err(e) => report.failed.push((job_id, e.to_string())),
        }
    }
}
