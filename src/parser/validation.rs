//! Validation of a parsed request into a [`MintOrder`].
//!
//! Validation is pure: it runs before the payment gate, before the item lock
//! and before any work log write, so a malformed request never occupies any
//! engine resource. Every failure carries a reason string suitable for the
//! protocol's rejection memo.

use thiserror::Error;
use url::Url;

use super::item::derive_item_id;
use crate::types::{IdentityRequest, JobId, JobRequest, MintOrder};

/// Maximum number of target categories per job.
pub const MAX_CATEGORIES: usize = 10;
/// Maximum length of a single category name.
pub const MAX_CATEGORY_LEN: usize = 64;
/// Maximum length of a custom title.
pub const MAX_TITLE_LEN: usize = 200;
/// Maximum length of a custom description.
pub const MAX_DESCRIPTION_LEN: usize = 2000;
/// Maximum length of a requester identity name.
pub const MAX_IDENTITY_NAME_LEN: usize = 64;

/// Reasons a request is rejected before any side effect.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing source URL: include a sourceUrl field with the post to mint")]
    MissingSourceUrl,

    #[error("malformed source URL {url:?}: {reason}")]
    MalformedUrl { url: String, reason: String },

    #[error("unsupported URL scheme {0:?}: only http and https are accepted")]
    UnsupportedScheme(String),

    #[error("missing categories: provide at least one target category")]
    MissingCategories,

    #[error("too many categories: {count} given, at most {max} allowed")]
    TooManyCategories { count: usize, max: usize },

    #[error("category {category:?} is longer than {max} characters")]
    CategoryTooLong { category: String, max: usize },

    #[error("title is {len} characters, at most {max} allowed")]
    TitleTooLong { len: usize, max: usize },

    #[error("description is {len} characters, at most {max} allowed")]
    DescriptionTooLong { len: usize, max: usize },

    #[error("identity name is {len} characters, at most {max} allowed")]
    IdentityNameTooLong { len: usize, max: usize },
}

/// Validates a parsed request for `job_id`.
///
/// On success the returned order carries the derived item key, which is the
/// value every later dedup check uses.
pub fn validate(
    job_id: &JobId,
    request: &JobRequest,
    payer: Option<&str>,
) -> Result<MintOrder, ValidationError> {
    let raw_url = request
        .source_url
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingSourceUrl)?;

    let url = Url::parse(raw_url).map_err(|e| ValidationError::MalformedUrl {
        url: raw_url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ValidationError::MalformedUrl {
            url: raw_url.to_string(),
            reason: "URL has no host".to_string(),
        });
    }

    if request.categories.is_empty() {
        return Err(ValidationError::MissingCategories);
    }
    if request.categories.len() > MAX_CATEGORIES {
        return Err(ValidationError::TooManyCategories {
            count: request.categories.len(),
            max: MAX_CATEGORIES,
        });
    }
    if let Some(long) = request
        .categories
        .iter()
        .find(|c| c.chars().count() > MAX_CATEGORY_LEN)
    {
        return Err(ValidationError::CategoryTooLong {
            category: long.clone(),
            max: MAX_CATEGORY_LEN,
        });
    }

    check_len(request.title.as_deref(), MAX_TITLE_LEN, |len, max| {
        ValidationError::TitleTooLong { len, max }
    })?;
    check_len(
        request.description.as_deref(),
        MAX_DESCRIPTION_LEN,
        |len, max| ValidationError::DescriptionTooLong { len, max },
    )?;
    check_len(
        request.identity_name.as_deref(),
        MAX_IDENTITY_NAME_LEN,
        |len, max| ValidationError::IdentityNameTooLong { len, max },
    )?;

    let identity = request.identity_name.as_ref().map(|name| IdentityRequest {
        name: name.clone(),
        description: request.identity_description.clone(),
    });

    Ok(MintOrder {
        job_id: job_id.clone(),
        item: derive_item_id(&url),
        source_url: raw_url.to_string(),
        categories: request.categories.clone(),
        identity,
        title: request.title.clone(),
        description: request.description.clone(),
        payer: payer.map(str::to_string),
    })
}

fn check_len(
    value: Option<&str>,
    max: usize,
    err: impl FnOnce(usize, usize) -> ValidationError,
) -> Result<(), ValidationError> {
    match value.map(|v| v.chars().count()) {
        Some(len) if len > max => Err(err(len, max)),
        _ => Ok(()),
    }
}
