//! Results flowing out of the execution pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AssetId, ItemId, TxRef};

/// Source content returned by the content-fetch service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContent {
    pub text: String,
    pub author: String,
    #[serde(default)]
    pub media_refs: Vec<String>,
}

/// Proof that a mint happened.
///
/// Recorded in both the idempotency store and the work log the moment the mint
/// call returns, so every later step can run from it without minting again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintReceipt {
    pub tx_ref: TxRef,
    pub asset_id: AssetId,
    pub minted_at: DateTime<Utc>,
}

impl MintReceipt {
    pub fn new(tx_ref: TxRef, asset_id: AssetId) -> Self {
        MintReceipt {
            tx_ref,
            asset_id,
            minted_at: Utc::now(),
        }
    }
}

/// The result reported back to the protocol.
///
/// `failed_categories` is omitted from the wire form when every publish
/// succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deliverable {
    pub tx_ref: TxRef,
    pub asset_id: AssetId,
    pub item: ItemId,
    pub source_url: String,
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_categories: Vec<String>,
}

impl Deliverable {
    pub fn is_partial(&self) -> bool {
        !self.failed_categories.is_empty()
    }
}
