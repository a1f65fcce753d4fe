//! Execution pipeline: fetch, mint, record ownership, publish, deliver.
//!
//! The mint checkpoint splits the pipeline in two. Before it, any failure
//! leaves no trace but the recorded error, and a rerun starts from the top.
//! After it, the job can only move forward: publish failures are collected
//! per category and delivered as a partial result, and a rerun resumes from
//! the entry's checkpoints without minting again.

use thiserror::Error;
use tokio::task::JoinError;
use tracing::{debug, info, warn};

use super::{Engine, Outcome};
use crate::effects::{
    CatalogEntry, ProtocolEffect, ProtocolInterpreter, ServiceEffect, ServiceInterpreter,
    ServiceResponse,
};
use crate::gateway::{ErrorKind, ServiceError};
use crate::persistence::WorkLogEntry;
use crate::types::{Deliverable, IdentityRef, MintReceipt, SourceContent};

/// Longest description derived from fetched text.
const DERIVED_DESCRIPTION_LEN: usize = 280;

/// Failures that stop a pipeline run before delivery.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("content fetch failed: {0}")]
    Fetch(#[source] ServiceError),

    #[error("mint failed: {0}")]
    Mint(#[source] ServiceError),

    #[error("delivery failed: {0}")]
    Deliver(#[source] ServiceError),

    #[error("unexpected response to {effect}")]
    UnexpectedResponse { effect: &'static str },

    #[error("state update failed: {0}")]
    State(#[from] JoinError),
}

impl<P, S> Engine<P, S>
where
    P: ProtocolInterpreter<Error = ServiceError> + Sync,
    S: ServiceInterpreter<Error = ServiceError> + Sync,
{
    /// Runs the pipeline for `entry`, recording any failure on the entry.
    ///
    /// The caller must hold the gate for the entry's item.
    pub(super) async fn run_pipeline(&self, entry: WorkLogEntry) -> Result<Outcome, PipelineError> {
        let job_id = entry.job_id.clone();
        match self.pipeline_steps(entry).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let (failed, message) = (job_id.clone(), e.to_string());
                let retries = self
                    .with_state(move |ctx| ctx.worklog.record_error(&failed, &message))
                    .await
                    .ok()
                    .flatten()
                    .map(|entry| entry.retry_count);
                warn!(job_id = %job_id, error = %e, retries, "Pipeline stopped; left for recovery");
                Err(e)
            }
        }
    }

    async fn pipeline_steps(&self, mut entry: WorkLogEntry) -> Result<Outcome, PipelineError> {
        let job_id = entry.job_id.clone();

        let receipt = match entry.receipt.clone() {
            Some(receipt) => {
                debug!(job_id = %job_id, "Resuming after mint checkpoint");
                receipt
            }
            None => {
                let content = self.fetch_content(&entry).await?;
                entry.content = Some(content);

                let known = match self.ctx.idempotency.minted_receipt(&job_id) {
                    Some(receipt) => Some(receipt),
                    None => {
                        let job_id = job_id.clone();
                        self.with_state(move |ctx| ctx.idempotency.lookup_minted_durable(&job_id))
                            .await?
                    }
                };
                let (receipt, fresh) = match known {
                    Some(receipt) => {
                        info!(job_id = %job_id, tx_ref = %receipt.tx_ref, "Mint already recorded");
                        (receipt, false)
                    }
                    None => match self.mint(&entry).await {
                        Ok(receipt) => (receipt, true),
                        Err(e) if e.kind == ErrorKind::InsufficientFunds => {
                            return Ok(self.reject_unfunded(&entry, &e).await);
                        }
                        Err(e) => return Err(PipelineError::Mint(e)),
                    },
                };

                // Checkpoint before anything else can fail.
                let checkpoint = {
                    let (job_id, item) = (job_id.clone(), entry.item.clone());
                    let (receipt, content) = (receipt.clone(), entry.content.clone());
                    self.with_state(move |ctx| {
                        ctx.idempotency.mark_minted(&job_id, &receipt);
                        ctx.idempotency.mark_processed(&item);
                        ctx.worklog.mark_minted(&job_id, &receipt, content.as_ref())
                    })
                    .await?
                };
                entry = checkpoint.unwrap_or_else(|| {
                    let mut local = entry.clone();
                    local.receipt = Some(receipt.clone());
                    local
                });

                if fresh {
                    self.record_ownership(&entry, &receipt).await;
                }
                receipt
            }
        };

        let identity = self.resolve_identity(&mut entry).await;

        let mut failed_categories = Vec::new();
        for category in entry.pending_categories() {
            match self.publish(&entry, &receipt, identity.clone(), &category).await {
                Ok(()) => {
                    entry.published.push(category.clone());
                    let (job_id, category) = (job_id.clone(), category.clone());
                    if let Err(e) = self
                        .with_state(move |ctx| ctx.worklog.mark_published(&job_id, &category))
                        .await
                    {
                        warn!(error = %e, "Publish checkpoint not recorded");
                    }
                }
                Err(e) => {
                    warn!(job_id = %job_id, category = %category, error = %e, "Publish failed");
                    failed_categories.push(category);
                }
            }
        }

        let deliverable = Deliverable {
            tx_ref: receipt.tx_ref.clone(),
            asset_id: receipt.asset_id.clone(),
            item: entry.item.clone(),
            source_url: entry.order.source_url.clone(),
            categories: entry.published.clone(),
            failed_categories,
        };
        self.protocol
            .interpret(ProtocolEffect::Deliver {
                job_id: job_id.clone(),
                deliverable: deliverable.clone(),
            })
            .await
            .map_err(PipelineError::Deliver)?;

        {
            let job_id = job_id.clone();
            if let Err(e) = self.with_state(move |ctx| ctx.worklog.complete(&job_id)).await {
                warn!(error = %e, "Delivered job not cleared from the work log");
            }
        }
        info!(
            job_id = %job_id,
            tx_ref = %receipt.tx_ref.short(),
            published = deliverable.categories.len(),
            failed = deliverable.failed_categories.len(),
            "Job delivered"
        );
        Ok(Outcome::Delivered(deliverable))
    }

    async fn fetch_content(&self, entry: &WorkLogEntry) -> Result<SourceContent, PipelineError> {
        let response = self
            .services
            .interpret(ServiceEffect::FetchContent {
                item: entry.item.clone(),
                source_url: entry.order.source_url.clone(),
            })
            .await
            .map_err(PipelineError::Fetch)?;
        match response {
            ServiceResponse::Content(content) => Ok(content),
            _ => Err(PipelineError::UnexpectedResponse {
                effect: "fetch_content",
            }),
        }
    }

    async fn mint(&self, entry: &WorkLogEntry) -> Result<MintReceipt, ServiceError> {
        let response = self
            .services
            .interpret(ServiceEffect::Mint {
                job_id: entry.job_id.clone(),
                payer: entry.order.payer.clone(),
            })
            .await?;
        match response {
            ServiceResponse::Minted { tx_ref, asset_id } => {
                info!(job_id = %entry.job_id, tx_ref = %tx_ref, asset_id = %asset_id, "Minted");
                Ok(MintReceipt::new(tx_ref, asset_id))
            }
            other => Err(ServiceError::permanent(format!(
                "unexpected response to mint: {other:?}"
            ))),
        }
    }

    /// Rejects a job whose mint cannot be paid for and drops its entry.
    async fn reject_unfunded(&self, entry: &WorkLogEntry, error: &ServiceError) -> Outcome {
        warn!(job_id = %entry.job_id, error = %error, "Mint refused for insufficient funds");
        if let Err(e) = self.remove_entry(&entry.job_id).await {
            warn!(job_id = %entry.job_id, error = %e, "Unfunded job not cleared from the work log");
        }
        self.reject(
            &entry.job_id,
            format!("minting failed: insufficient funds ({})", error.message),
        )
        .await
    }

    /// Records the new asset's owner. Failures are logged only.
    async fn record_ownership(&self, entry: &WorkLogEntry, receipt: &MintReceipt) {
        let Some(owner) = entry.order.payer.clone() else {
            debug!(job_id = %entry.job_id, "No payer; skipping ownership record");
            return;
        };
        let effect = ServiceEffect::RecordOwnership {
            asset_id: receipt.asset_id.clone(),
            owner,
            item: entry.item.clone(),
        };
        if let Err(e) = self.services.interpret(effect).await {
            warn!(job_id = %entry.job_id, error = %e, "Failed to record ownership");
        }
    }

    /// Returns the identity to publish under: the checkpointed one, a newly
    /// registered one, or `None` for the service default.
    async fn resolve_identity(&self, entry: &mut WorkLogEntry) -> Option<IdentityRef> {
        if let Some(identity) = &entry.identity {
            return Some(identity.clone());
        }
        let request = entry.order.identity.clone()?;
        let effect = ServiceEffect::RegisterIdentity {
            name: request.name.clone(),
            description: request.description.clone(),
        };
        match self.services.interpret(effect).await {
            Ok(ServiceResponse::Identity(identity)) => {
                let (job_id, registered) = (entry.job_id.clone(), identity.clone());
                if let Err(e) = self
                    .with_state(move |ctx| ctx.worklog.set_identity(&job_id, &registered))
                    .await
                {
                    warn!(job_id = %entry.job_id, error = %e, "Identity checkpoint not recorded");
                }
                entry.identity = Some(identity.clone());
                debug!(job_id = %entry.job_id, identity = %identity, "Registered publishing identity");
                Some(identity)
            }
            Ok(other) => {
                warn!(job_id = %entry.job_id, response = ?other, "Unexpected identity response; using default identity");
                None
            }
            Err(e) => {
                warn!(job_id = %entry.job_id, error = %e, "Identity registration failed; using default identity");
                None
            }
        }
    }

    async fn publish(
        &self,
        entry: &WorkLogEntry,
        receipt: &MintReceipt,
        identity: Option<IdentityRef>,
        category: &str,
    ) -> Result<(), ServiceError> {
        let effect = ServiceEffect::Publish {
            identity,
            entry: CatalogEntry {
                tx_ref: receipt.tx_ref.clone(),
                asset_id: receipt.asset_id.clone(),
                title: title_for(entry),
                description: description_for(entry),
                source_url: entry.order.source_url.clone(),
                category: category.to_string(),
            },
        };
        self.services.interpret(effect).await.map(|_| ())
    }
}

/// Custom title, else one derived from the fetched author, else the item.
fn title_for(entry: &WorkLogEntry) -> String {
    if let Some(title) = &entry.order.title {
        return title.clone();
    }
    match &entry.content {
        Some(content) if !content.author.is_empty() => format!("Post by {}", content.author),
        _ => format!("Post {}", entry.item),
    }
}

/// Custom description, else the fetched text truncated, else the source URL.
fn description_for(entry: &WorkLogEntry) -> String {
    if let Some(description) = &entry.order.description {
        return description.clone();
    }
    match &entry.content {
        Some(content) if !content.text.is_empty() => {
            content.text.chars().take(DERIVED_DESCRIPTION_LEN).collect()
        }
        _ => entry.order.source_url.clone(),
    }
}
