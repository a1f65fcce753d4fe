//! Commerce protocol effect types.
//!
//! These describe calls back into the protocol as data. Effects are job-scoped
//! and carry everything the interpreter needs; the interpreter holds the
//! connection details.

use serde::{Deserialize, Serialize};

use crate::types::{Deliverable, JobId, JobPhase};

/// Terms posted to the buyer before payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentTerms {
    /// Price quoted for the mint.
    pub price: f64,
    /// Human-readable requirement memo.
    pub memo: String,
}

/// A protocol effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEffect {
    /// Formally accept a job at phase Requested.
    Accept { job_id: JobId, memo: String },

    /// Post payment terms and move the job towards payment.
    RequestPayment { job_id: JobId, terms: PaymentTerms },

    /// Reject a job with an actionable reason.
    Reject { job_id: JobId, reason: String },

    /// Report the job's result.
    Deliver {
        job_id: JobId,
        deliverable: Deliverable,
    },

    /// Approve or reject a delivered job as its evaluator.
    Evaluate {
        job_id: JobId,
        approved: bool,
        reason: String,
    },

    /// Ask the protocol for a job's current phase.
    LookupJob { job_id: JobId },
}

impl ProtocolEffect {
    pub fn job_id(&self) -> &JobId {
        match self {
            ProtocolEffect::Accept { job_id, .. }
            | ProtocolEffect::RequestPayment { job_id, .. }
            | ProtocolEffect::Reject { job_id, .. }
            | ProtocolEffect::Deliver { job_id, .. }
            | ProtocolEffect::Evaluate { job_id, .. }
            | ProtocolEffect::LookupJob { job_id } => job_id,
        }
    }

    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEffect::Accept { .. } => "accept",
            ProtocolEffect::RequestPayment { .. } => "request_payment",
            ProtocolEffect::Reject { .. } => "reject",
            ProtocolEffect::Deliver { .. } => "deliver",
            ProtocolEffect::Evaluate { .. } => "evaluate",
            ProtocolEffect::LookupJob { .. } => "lookup_job",
        }
    }
}

/// Response from a protocol effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ProtocolResponse {
    /// The call was accepted by the protocol.
    Ok,

    /// Response to `LookupJob`: the job's phase, or `None` if the protocol no
    /// longer knows the job.
    Job(Option<JobPhase>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_serializes_with_type_tag() {
        let effect = ProtocolEffect::Reject {
            job_id: JobId::new("5"),
            reason: "missing source URL".to_string(),
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["type"], "reject");
        assert_eq!(json["job_id"], "5");
    }

    #[test]
    fn lookup_response_round_trips_unknown_job() {
        let json = serde_json::to_string(&ProtocolResponse::Job(None)).unwrap();
        let back: ProtocolResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ProtocolResponse::Job(None));
    }

    #[test]
    fn job_id_and_name_cover_every_variant() {
        let job = JobId::new("1");
        let effect = ProtocolEffect::Evaluate {
            job_id: job.clone(),
            approved: true,
            reason: "minted".to_string(),
        };
        assert_eq!(effect.job_id(), &job);
        assert_eq!(effect.name(), "evaluate");
    }
}
