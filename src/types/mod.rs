//! Core domain types for the mint relay.
//!
//! This module contains the identifiers, protocol phases and request/result
//! shapes shared by the parser, the stores and the engine.

pub mod ids;
pub mod job;
pub mod mint;
pub mod phase;

// Re-export commonly used types at the module level
pub use ids::{AssetId, IdentityRef, ItemId, JobId, TxRef};
pub use job::{IdentityRequest, JobNotification, JobRequest, MintOrder};
pub use mint::{Deliverable, MintReceipt, SourceContent};
pub use phase::{JobPhase, UnknownPhase};
