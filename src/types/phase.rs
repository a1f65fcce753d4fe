//! Protocol-owned job phases.
//!
//! The engine never invents phase transitions; it only reacts to the phase
//! carried by each notification. Phases arrive either as their ordinal
//! (`0..=6`) or as a snake_case name, and are serialized as the name.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The protocol phase of a job's payment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "RawPhase")]
pub enum JobPhase {
    /// The buyer opened the job (ordinal 0).
    Requested,
    /// Terms are being negotiated (ordinal 1).
    Negotiating,
    /// The buyer paid; the provider may execute (ordinal 2).
    Paid,
    /// The deliverable is under evaluation (ordinal 3).
    Evaluating,
    /// The job settled (ordinal 4).
    Completed,
    /// The job was rejected by either side.
    Rejected,
    /// The job expired before settling.
    Expired,
}

/// Error returned for unknown phase values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown job phase: {0}")]
pub struct UnknownPhase(pub String);

impl JobPhase {
    /// Returns the ordinal of a non-terminal-by-rejection phase.
    ///
    /// Rejected and Expired have no position in the payment ordering.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            JobPhase::Requested => Some(0),
            JobPhase::Negotiating => Some(1),
            JobPhase::Paid => Some(2),
            JobPhase::Evaluating => Some(3),
            JobPhase::Completed => Some(4),
            JobPhase::Rejected | JobPhase::Expired => None,
        }
    }

    /// Maps the protocol's wire ordinal to a phase.
    pub fn from_ordinal(n: u64) -> Option<Self> {
        match n {
            0 => Some(JobPhase::Requested),
            1 => Some(JobPhase::Negotiating),
            2 => Some(JobPhase::Paid),
            3 => Some(JobPhase::Evaluating),
            4 => Some(JobPhase::Completed),
            5 => Some(JobPhase::Rejected),
            6 => Some(JobPhase::Expired),
            _ => None,
        }
    }

    /// Returns true before the buyer has paid.
    pub fn is_pre_payment(self) -> bool {
        matches!(self, JobPhase::Requested | JobPhase::Negotiating)
    }

    /// Returns true once payment has landed and the job is still live.
    pub fn is_paid(self) -> bool {
        matches!(self, JobPhase::Paid | JobPhase::Evaluating)
    }

    /// Returns true for phases after which no further work is accepted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobPhase::Completed | JobPhase::Rejected | JobPhase::Expired
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Requested => "requested",
            JobPhase::Negotiating => "negotiating",
            JobPhase::Paid => "paid",
            JobPhase::Evaluating => "evaluating",
            JobPhase::Completed => "completed",
            JobPhase::Rejected => "rejected",
            JobPhase::Expired => "expired",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobPhase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requested" | "request" => Ok(JobPhase::Requested),
            "negotiating" | "negotiation" => Ok(JobPhase::Negotiating),
            "paid" | "transaction" => Ok(JobPhase::Paid),
            "evaluating" | "evaluation" => Ok(JobPhase::Evaluating),
            "completed" => Ok(JobPhase::Completed),
            "rejected" => Ok(JobPhase::Rejected),
            "expired" => Ok(JobPhase::Expired),
            other => Err(UnknownPhase(other.to_string())),
        }
    }
}

/// Wire representation accepted on input.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPhase {
    Ordinal(u64),
    Name(String),
}

impl TryFrom<RawPhase> for JobPhase {
    type Error = UnknownPhase;

    fn try_from(raw: RawPhase) -> Result<Self, Self::Error> {
        match raw {
            RawPhase::Ordinal(n) => {
                JobPhase::from_ordinal(n).ok_or_else(|| UnknownPhase(n.to_string()))
            }
            RawPhase::Name(name) => name.parse(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_follow_payment_order() {
        let ordered = [
            JobPhase::Requested,
            JobPhase::Negotiating,
            JobPhase::Paid,
            JobPhase::Evaluating,
            JobPhase::Completed,
        ];
        for (i, phase) in ordered.iter().enumerate() {
            assert_eq!(phase.ordinal(), Some(i as u8));
            assert_eq!(JobPhase::from_ordinal(i as u64), Some(*phase));
        }
        assert_eq!(JobPhase::Rejected.ordinal(), None);
        assert_eq!(JobPhase::Expired.ordinal(), None);
    }

    #[test]
    fn deserializes_from_ordinal_or_name() {
        let from_num: JobPhase = serde_json::from_str("2").unwrap();
        let from_name: JobPhase = serde_json::from_str("\"paid\"").unwrap();
        let from_alias: JobPhase = serde_json::from_str("\"TRANSACTION\"").unwrap();
        assert_eq!(from_num, JobPhase::Paid);
        assert_eq!(from_name, JobPhase::Paid);
        assert_eq!(from_alias, JobPhase::Paid);
    }

    #[test]
    fn rejects_unknown_values() {
        assert!(serde_json::from_str::<JobPhase>("9").is_err());
        assert!(serde_json::from_str::<JobPhase>("\"shipping\"").is_err());
    }

    #[test]
    fn serializes_as_name() {
        assert_eq!(
            serde_json::to_string(&JobPhase::Negotiating).unwrap(),
            "\"negotiating\""
        );
    }

    #[test]
    fn classification() {
        assert!(JobPhase::Requested.is_pre_payment());
        assert!(JobPhase::Negotiating.is_pre_payment());
        assert!(JobPhase::Paid.is_paid());
        assert!(JobPhase::Evaluating.is_paid());
        assert!(!JobPhase::Completed.is_paid());
        assert!(JobPhase::Completed.is_terminal());
        assert!(JobPhase::Rejected.is_terminal());
        assert!(JobPhase::Expired.is_terminal());
        assert!(!JobPhase::Paid.is_terminal());
    }
}
