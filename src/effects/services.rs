//! External service effect types: content fetch, minting, ownership, identity
//! registration and catalog publication.

use serde::{Deserialize, Serialize};

use crate::types::{AssetId, IdentityRef, ItemId, JobId, SourceContent, TxRef};

/// Metadata published to the catalog for one category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub tx_ref: TxRef,
    pub asset_id: AssetId,
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub category: String,
}

/// A service effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServiceEffect {
    /// Fetch the source post for an item.
    FetchContent { item: ItemId, source_url: String },

    /// Submit the mint transaction.
    ///
    /// The interpreter may retry failures other than insufficient funds.
    Mint {
        job_id: JobId,
        payer: Option<String>,
    },

    /// Record the asset's owner in the ownership ledger.
    RecordOwnership {
        asset_id: AssetId,
        owner: String,
        item: ItemId,
    },

    /// Register a publishing identity for the requester.
    RegisterIdentity {
        name: String,
        description: Option<String>,
    },

    /// Publish catalog metadata under `identity`, or the service's default
    /// identity when `None`.
    Publish {
        identity: Option<IdentityRef>,
        entry: CatalogEntry,
    },
}

impl ServiceEffect {
    /// Short operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            ServiceEffect::FetchContent { .. } => "fetch_content",
            ServiceEffect::Mint { .. } => "mint",
            ServiceEffect::RecordOwnership { .. } => "record_ownership",
            ServiceEffect::RegisterIdentity { .. } => "register_identity",
            ServiceEffect::Publish { .. } => "publish",
        }
    }
}

/// Response from a service effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServiceResponse {
    /// Response to `FetchContent`.
    Content(SourceContent),

    /// Response to `Mint`.
    Minted { tx_ref: TxRef, asset_id: AssetId },

    /// Response to `RegisterIdentity`.
    Identity(IdentityRef),

    /// Response to effects with no payload.
    Ok,
}
