//! Job requests as received from the protocol and as accepted for execution.

use serde::{Deserialize, Serialize};

use super::ids::{ItemId, JobId};
use super::phase::JobPhase;

/// An inbound protocol notification about one job.
///
/// The protocol may emit several notifications for a single logical state
/// change, so handlers must treat every notification as potentially duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobNotification {
    #[serde(alias = "jobId", alias = "id")]
    pub job_id: JobId,

    pub phase: JobPhase,

    /// Opaque memo payloads in protocol order. Each may or may not be JSON.
    #[serde(default)]
    pub memos: Vec<String>,

    /// Wallet of the buyer, used as the payer identity when minting.
    #[serde(default, alias = "clientAddress")]
    pub client_address: Option<String>,
}

impl JobNotification {
    pub fn new(job_id: impl Into<JobId>, phase: JobPhase, memos: Vec<String>) -> Self {
        JobNotification {
            job_id: job_id.into(),
            phase,
            memos,
            client_address: None,
        }
    }

    pub fn with_client(mut self, address: impl Into<String>) -> Self {
        self.client_address = Some(address.into());
        self
    }
}

/// The partial structure extracted from a job's memos.
///
/// Every field is optional at this stage; validation decides what is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source_url: Option<String>,
    pub categories: Vec<String>,
    pub identity_name: Option<String>,
    pub identity_description: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// Identity fields supplied by the requester for publishing under their name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRequest {
    pub name: String,
    pub description: Option<String>,
}

/// A validated request, ready to occupy a work log slot.
///
/// This is the form persisted in the work log, so recovery can resume a job
/// without the original memos.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintOrder {
    pub job_id: JobId,
    pub item: ItemId,
    pub source_url: String,
    /// Target categories: non-empty, deduplicated, in request order.
    pub categories: Vec<String>,
    #[serde(default)]
    pub identity: Option<IdentityRequest>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub payer: Option<String>,
}
