//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using an
//! `ItemId` where a `JobId` is expected) and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A protocol-assigned job identifier.
///
/// Opaque to the engine: two notifications refer to the same job iff their
/// identifiers compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(s: impl Into<String>) -> Self {
        JobId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        JobId(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        JobId(s.to_string())
    }
}

/// The logical item a job refers to.
///
/// Deduplication is keyed on this value, not on the job: two jobs for the same
/// source content share an `ItemId` and only one of them may ever mint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn new(s: impl Into<String>) -> Self {
        ItemId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        ItemId(s.to_string())
    }
}

/// Reference to a submitted mint transaction (usually a transaction hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxRef(pub String);

impl TxRef {
    pub fn new(s: impl Into<String>) -> Self {
        TxRef(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a shortened form for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a minted asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(s: impl Into<String>) -> Self {
        AssetId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a registered publishing identity in the catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityRef(pub String);

impl IdentityRef {
    pub fn new(s: impl Into<String>) -> Self {
        IdentityRef(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod job_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn serializes_as_bare_string(s in "[a-zA-Z0-9_-]{1,40}") {
                let id = JobId::new(&s);
                let json = serde_json::to_string(&id).unwrap();
                prop_assert_eq!(json, format!("\"{}\"", s));
            }

            #[test]
            fn ordering_matches_underlying(a in "[0-9]{1,10}", b in "[0-9]{1,10}") {
                prop_assert_eq!(JobId::new(&a).cmp(&JobId::new(&b)), a.cmp(&b));
            }
        }
    }

    mod tx_ref {
        use super::*;

        #[test]
        fn short_truncates_long_hashes() {
            let tx = TxRef::new(format!("0x{}", "ab".repeat(32)));
            assert_eq!(tx.short(), "0xababababab");
        }

        #[test]
        fn short_handles_short_input() {
            let tx = TxRef::new("0x1");
            assert_eq!(tx.short(), "0x1");
        }
    }

    #[test]
    fn item_id_display_is_raw_value() {
        assert_eq!(ItemId::from("12345").to_string(), "12345");
    }
}
