//! Job parsing: memo extraction, item key derivation and validation.
//!
//! This module is pure. It turns a notification's memos into a
//! [`MintOrder`](crate::types::MintOrder) or a specific rejection reason, and
//! never touches the stores, the gate or any external service.

pub mod item;
pub mod memo;
pub mod validation;

pub use item::derive_item_id;
pub use memo::{normalize_categories, parse_memos};
pub use validation::{MAX_CATEGORIES, ValidationError, validate};
