//! Effect interpreters backed by [`HttpGateway`].
//!
//! Key implementation details:
//! - One endpoint per effect on the relevant sidecar
//! - Retry logic with exponential backoff, per-effect policy
//! - Mint retries everything except insufficient funds

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::effects::{
    CatalogEntry, PaymentTerms, ProtocolEffect, ProtocolInterpreter, ProtocolResponse,
    ServiceEffect, ServiceInterpreter, ServiceResponse,
};
use crate::types::{
    AssetId, Deliverable, IdentityRef, ItemId, JobId, JobPhase, SourceContent, TxRef,
};

use super::client::HttpGateway;
use super::error::ServiceError;
use super::retry::{RetryPolicy, retry_with_backoff};

// ─── Wire Types ───────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MemoBody<'a> {
    memo: &'a str,
}

#[derive(Debug, Serialize)]
struct PaymentBody<'a> {
    price: f64,
    memo: &'a str,
}

#[derive(Debug, Serialize)]
struct RejectBody<'a> {
    reason: &'a str,
}

#[derive(Debug, Serialize)]
struct DeliverBody<'a> {
    deliverable: &'a Deliverable,
}

#[derive(Debug, Serialize)]
struct EvaluateBody<'a> {
    approved: bool,
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct JobView {
    phase: JobPhase,
}

#[derive(Debug, Serialize)]
struct FetchBody<'a> {
    item: &'a ItemId,
    source_url: &'a str,
}

#[derive(Debug, Serialize)]
struct MintBody<'a> {
    job_id: &'a JobId,
    payer: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct MintView {
    tx_ref: TxRef,
    asset_id: AssetId,
}

#[derive(Debug, Serialize)]
struct OwnershipBody<'a> {
    asset_id: &'a AssetId,
    owner: &'a str,
    item: &'a ItemId,
}

#[derive(Debug, Serialize)]
struct IdentityBody<'a> {
    name: &'a str,
    description: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct IdentityView {
    identity: IdentityRef,
}

#[derive(Debug, Serialize)]
struct PublishBody<'a> {
    identity: Option<&'a IdentityRef>,
    #[serde(flatten)]
    entry: &'a CatalogEntry,
}

/// Acknowledgement bodies are ignored.
#[derive(Debug, Deserialize)]
struct Ack {}

// ─── Interpreter Implementation ───────────────────────────────────────────────

impl ProtocolInterpreter for HttpGateway {
    type Error = ServiceError;

    async fn interpret(&self, effect: ProtocolEffect) -> Result<ProtocolResponse, Self::Error> {
        debug!(job_id = %effect.job_id(), effect = effect.name(), "Protocol call");
        retry_with_backoff(self.retry, RetryPolicy::RetryTransient, || {
            execute_protocol(self, &effect)
        })
        .await
        .into_result()
    }
}

impl ServiceInterpreter for HttpGateway {
    type Error = ServiceError;

    async fn interpret(&self, effect: ServiceEffect) -> Result<ServiceResponse, Self::Error> {
        debug!(effect = effect.name(), "Service call");
        retry_with_backoff(self.retry, service_policy(&effect), || {
            execute_service(self, &effect)
        })
        .await
        .into_result()
    }
}

/// Retry policy for a service effect.
fn service_policy(effect: &ServiceEffect) -> RetryPolicy {
    match effect {
        ServiceEffect::Mint { .. } => RetryPolicy::RetryUnlessTerminal,
        _ => RetryPolicy::RetryTransient,
    }
}

fn job_path(job_id: &JobId, action: Option<&str>) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(job_id.as_str().as_bytes()).collect();
    match action {
        Some(action) => format!("jobs/{encoded}/{action}"),
        None => format!("jobs/{encoded}"),
    }
}

/// Executes a single protocol effect without retry logic.
async fn execute_protocol(
    gateway: &HttpGateway,
    effect: &ProtocolEffect,
) -> Result<ProtocolResponse, ServiceError> {
    match effect {
        ProtocolEffect::Accept { job_id, memo } => {
            let _: Ack = gateway
                .protocol_post(&job_path(job_id, Some("accept")), &MemoBody { memo })
                .await?;
            Ok(ProtocolResponse::Ok)
        }
        ProtocolEffect::RequestPayment {
            job_id,
            terms: PaymentTerms { price, memo },
        } => {
            let _: Ack = gateway
                .protocol_post(
                    &job_path(job_id, Some("payment-request")),
                    &PaymentBody { price: *price, memo },
                )
                .await?;
            Ok(ProtocolResponse::Ok)
        }
        ProtocolEffect::Reject { job_id, reason } => {
            let _: Ack = gateway
                .protocol_post(&job_path(job_id, Some("reject")), &RejectBody { reason })
                .await?;
            Ok(ProtocolResponse::Ok)
        }
        ProtocolEffect::Deliver {
            job_id,
            deliverable,
        } => {
            let _: Ack = gateway
                .protocol_post(&job_path(job_id, Some("deliver")), &DeliverBody { deliverable })
                .await?;
            Ok(ProtocolResponse::Ok)
        }
        ProtocolEffect::Evaluate {
            job_id,
            approved,
            reason,
        } => {
            let _: Ack = gateway
                .protocol_post(
                    &job_path(job_id, Some("evaluate")),
                    &EvaluateBody {
                        approved: *approved,
                        reason,
                    },
                )
                .await?;
            Ok(ProtocolResponse::Ok)
        }
        ProtocolEffect::LookupJob { job_id } => {
            let view: Option<JobView> = gateway
                .protocol_get_optional(&job_path(job_id, None))
                .await?;
            Ok(ProtocolResponse::Job(view.map(|v| v.phase)))
        }
    }
}

/// Executes a single service effect without retry logic.
async fn execute_service(
    gateway: &HttpGateway,
    effect: &ServiceEffect,
) -> Result<ServiceResponse, ServiceError> {
    match effect {
        ServiceEffect::FetchContent { item, source_url } => {
            let content: SourceContent = gateway
                .services_post("content/fetch", &FetchBody { item, source_url })
                .await?;
            Ok(ServiceResponse::Content(content))
        }
        ServiceEffect::Mint { job_id, payer } => {
            let view: MintView = gateway
                .services_post(
                    "mint",
                    &MintBody {
                        job_id,
                        payer: payer.as_deref(),
                    },
                )
                .await?;
            Ok(ServiceResponse::Minted {
                tx_ref: view.tx_ref,
                asset_id: view.asset_id,
            })
        }
        ServiceEffect::RecordOwnership {
            asset_id,
            owner,
            item,
        } => {
            let _: Ack = gateway
                .services_post(
                    "ownership",
                    &OwnershipBody {
                        asset_id,
                        owner,
                        item,
                    },
                )
                .await?;
            Ok(ServiceResponse::Ok)
        }
        ServiceEffect::RegisterIdentity { name, description } => {
            let view: IdentityView = gateway
                .services_post(
                    "identities",
                    &IdentityBody {
                        name,
                        description: description.as_deref(),
                    },
                )
                .await?;
            Ok(ServiceResponse::Identity(view.identity))
        }
        ServiceEffect::Publish { identity, entry } => {
            let _: Ack = gateway
                .services_post(
                    "catalog/publish",
                    &PublishBody {
                        identity: identity.as_ref(),
                        entry,
                    },
                )
                .await?;
            Ok(ServiceResponse::Ok)
        }
    }
}
