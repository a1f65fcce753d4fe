//! Phase controller: one decision per inbound notification.
//!
//! | Phase | Action |
//! |---|---|
//! | Requested, Negotiating | validate, dedup, gate, post terms, write Accepted entry |
//! | Paid, Evaluating | validate (or reuse the entry), dedup, gate, run the pipeline |
//! | Rejected, Expired | drop an Accepted entry |
//! | Completed | drop a stale entry |
//!
//! Busy handling is asymmetric. During negotiation a different job holding
//! the item is a competing request and is rejected. In a paid phase any busy
//! item is ignored. With the same job as holder the notification is a
//! duplicate. With another holder, the paid job's work log entry (if its
//! negotiation wrote one) stays in place for recovery to resolve.

use tracing::{debug, info, instrument, warn};

use super::{Engine, EngineError, IgnoreReason, Outcome};
use crate::effects::{PaymentTerms, ProtocolEffect, ProtocolInterpreter, ServiceInterpreter};
use crate::gateway::ServiceError;
use crate::parser::{parse_memos, validate};
use crate::persistence::EntryStatus;
use crate::types::{JobId, JobNotification, JobPhase, MintOrder};

impl<P, S> Engine<P, S>
where
    P: ProtocolInterpreter<Error = ServiceError> + Sync,
    S: ServiceInterpreter<Error = ServiceError> + Sync,
{
    /// Handles one protocol notification.
    ///
    /// Every notification may be a duplicate; handling the same notification
    /// twice never produces a second mint, payment request or delivery.
    ///
    /// # Errors
    ///
    /// Returns an error when a required protocol call fails during
    /// negotiation, or when the pipeline stops before delivery. Pipeline
    /// errors are already recorded on the job's work log entry.
    #[instrument(skip(self, notification), fields(job_id = %notification.job_id, phase = %notification.phase))]
    pub async fn handle_notification(
        &self,
        notification: &JobNotification,
    ) -> Result<Outcome, EngineError> {
        match notification.phase {
            JobPhase::Requested | JobPhase::Negotiating => self.negotiate(notification).await,
            JobPhase::Paid | JobPhase::Evaluating => self.execute(notification).await,
            JobPhase::Rejected | JobPhase::Expired => {
                self.abandon(&notification.job_id, notification.phase).await
            }
            JobPhase::Completed => self.clean_up_completed(&notification.job_id).await,
        }
    }

    fn payer_for(&self, notification: &JobNotification) -> Option<String> {
        notification
            .client_address
            .clone()
            .or_else(|| self.config.default_payer.clone())
    }

    /// Parses and validates the memos, or returns the rejection outcome.
    async fn order_from(&self, notification: &JobNotification) -> Result<MintOrder, Outcome> {
        let request = parse_memos(&notification.memos);
        let payer = self.payer_for(notification);
        match validate(&notification.job_id, &request, payer.as_deref()) {
            Ok(order) => Ok(order),
            Err(e) => {
                info!(error = %e, "Rejecting invalid request");
                Err(self.reject(&notification.job_id, e.to_string()).await)
            }
        }
    }

    async fn reject_processed(&self, order: &MintOrder) -> Outcome {
        info!(item = %order.item, "Rejecting already processed item");
        self.reject(
            &order.job_id,
            format!("item {} already processed by an earlier job", order.item),
        )
        .await
    }

    async fn negotiate(&self, notification: &JobNotification) -> Result<Outcome, EngineError> {
        let job_id = &notification.job_id;
        if self.ctx.worklog.contains(job_id) {
            debug!("Duplicate negotiation notification");
            return Ok(Outcome::Ignored(IgnoreReason::DuplicateNegotiation));
        }

        let order = match self.order_from(notification).await {
            Ok(order) => order,
            Err(outcome) => return Ok(outcome),
        };
        if self.ctx.idempotency.has_processed(&order.item) {
            return Ok(self.reject_processed(&order).await);
        }

        let guard = match self.ctx.gate.try_acquire(&order.item, job_id) {
            Ok(guard) => guard,
            Err(busy) if &busy.holder == job_id => {
                debug!(item = %order.item, "Negotiation already in progress for this job");
                return Ok(Outcome::Ignored(IgnoreReason::InFlight));
            }
            Err(busy) => {
                info!(item = %order.item, holder = %busy.holder, "Rejecting competing request");
                let reason = format!(
                    "item {} is already being processed by job {}",
                    order.item, busy.holder
                );
                return Ok(self.reject(job_id, reason).await);
            }
        };

        // The item may have completed while we waited on the gate.
        if self.ctx.idempotency.has_processed(&order.item) {
            return Ok(self.reject_processed(&order).await);
        }

        if notification.phase == JobPhase::Requested {
            self.protocol_call(ProtocolEffect::Accept {
                job_id: job_id.clone(),
                memo: format!(
                    "Accepted: mint {} into {}",
                    order.source_url,
                    order.categories.join(", ")
                ),
            })
            .await?;
        }
        self.protocol_call(ProtocolEffect::RequestPayment {
            job_id: job_id.clone(),
            terms: PaymentTerms {
                price: self.config.price,
                memo: format!(
                    "Mint item {} and publish to {} categories",
                    order.item,
                    order.categories.len()
                ),
            },
        })
        .await?;

        let accepted = order.clone();
        self.with_state(move |ctx| ctx.worklog.accept(&accepted)).await?;
        drop(guard);

        info!(item = %order.item, "Payment requested");
        Ok(Outcome::PaymentRequested { item: order.item })
    }

    async fn execute(&self, notification: &JobNotification) -> Result<Outcome, EngineError> {
        let job_id = &notification.job_id;

        if self.is_minted(job_id).await? {
            if notification.phase == JobPhase::Evaluating && self.config.auto_evaluate {
                return self.approve(job_id).await;
            }
            debug!("Job already minted, skipping");
            return Ok(Outcome::Ignored(IgnoreReason::AlreadyMinted));
        }

        let order = match self.ctx.worklog.get(job_id) {
            Some(entry) => entry.order,
            None => match self.order_from(notification).await {
                Ok(order) => order,
                Err(outcome) => return Ok(outcome),
            },
        };
        if self.ctx.idempotency.has_processed(&order.item) {
            self.remove_entry(job_id).await?;
            return Ok(self.reject_processed(&order).await);
        }

        let guard = match self.ctx.gate.try_acquire(&order.item, job_id) {
            Ok(guard) => guard,
            Err(busy) => {
                debug!(item = %order.item, holder = %busy.holder, "Item busy, ignoring duplicate");
                return Ok(Outcome::Ignored(IgnoreReason::InFlight));
            }
        };

        // Re-check after acquisition: a concurrent run may have finished.
        if self.is_minted(job_id).await? {
            return Ok(Outcome::Ignored(IgnoreReason::AlreadyMinted));
        }
        if self.ctx.idempotency.has_processed(&order.item) {
            self.remove_entry(job_id).await?;
            return Ok(self.reject_processed(&order).await);
        }

        let accepted = order.clone();
        let (entry, created) = self
            .with_state(move |ctx| ctx.worklog.accept(&accepted))
            .await?;
        if created {
            warn!(item = %order.item, "Paid job had no work log entry; created one");
        }

        let result = self.run_pipeline(entry).await;
        drop(guard);
        Ok(result?)
    }

    async fn approve(&self, job_id: &JobId) -> Result<Outcome, EngineError> {
        let reason = match self.ctx.idempotency.minted_receipt(job_id) {
            Some(receipt) => format!("minted in transaction {}", receipt.tx_ref.short()),
            None => "minted".to_string(),
        };
        self.protocol_call(ProtocolEffect::Evaluate {
            job_id: job_id.clone(),
            approved: true,
            reason,
        })
        .await?;
        info!("Evaluation approved");
        Ok(Outcome::Evaluated { approved: true })
    }

    async fn abandon(&self, job_id: &JobId, phase: JobPhase) -> Result<Outcome, EngineError> {
        match self.ctx.worklog.get(job_id) {
            Some(entry) if entry.status == EntryStatus::Accepted => {
                self.remove_entry(job_id).await?;
                info!("Job ended before payment; entry dropped");
                Ok(Outcome::Abandoned { phase })
            }
            Some(_) => {
                warn!("Job ended after minting; keeping entry for delivery retry");
                Ok(Outcome::Ignored(IgnoreReason::Terminal))
            }
            None => Ok(Outcome::Ignored(IgnoreReason::Terminal)),
        }
    }

    async fn clean_up_completed(&self, job_id: &JobId) -> Result<Outcome, EngineError> {
        if self.remove_entry(job_id).await?.is_some() {
            info!("Removed stale entry for completed job");
        }
        Ok(Outcome::Ignored(IgnoreReason::Terminal))
    }
}
