//! Extraction of a structured request from a job's memo envelope.
//!
//! Memos are free-form: some are JSON objects, some are JSON objects wrapping
//! the real payload in a `requirement` field (itself either an object or a
//! string of JSON), and some are not JSON at all. The extractor tolerates all
//! of these and never fails.

use serde_json::{Map, Value};

use crate::types::JobRequest;

const SOURCE_URL_KEYS: &[&str] = &["sourceUrl", "source_url", "url", "tweetUrl", "tweet_url"];
const CATEGORY_KEYS: &[&str] = &["categories", "category"];
const IDENTITY_NAME_KEYS: &[&str] = &["identityName", "identity_name"];
const IDENTITY_DESCRIPTION_KEYS: &[&str] = &["identityDescription", "identity_description"];
const TITLE_KEYS: &[&str] = &["title"];
const DESCRIPTION_KEYS: &[&str] = &["description"];

/// Parses a job's memos into a partial request.
///
/// # Parsing Rules
///
/// - Memos are scanned in order; the first non-empty value for each field wins
/// - Within one memo the `requirement` wrapper is checked before the top level
/// - Non-JSON memos, and JSON values that are not objects, are skipped
/// - Categories may be a list or a comma-separated string (see
///   [`normalize_categories`])
///
/// # Examples
///
/// ```
/// use mint_relay::parser::parse_memos;
///
/// let memos = vec![
///     "not json".to_string(),
///     r#"{"requirement": {"sourceUrl": "https://x.com/a/status/1", "categories": "crypto, defi"}}"#
///         .to_string(),
/// ];
/// let request = parse_memos(&memos);
/// assert_eq!(request.source_url.as_deref(), Some("https://x.com/a/status/1"));
/// assert_eq!(request.categories, vec!["crypto", "defi"]);
/// ```
pub fn parse_memos<S: AsRef<str>>(memos: &[S]) -> JobRequest {
    let mut request = JobRequest::default();

    for memo in memos {
        let Some(top) = decode_object(memo.as_ref()) else {
            continue;
        };
        let wrapped = top.get("requirement").and_then(requirement_object);

        let mut layers: Vec<&Map<String, Value>> = Vec::with_capacity(2);
        if let Some(inner) = wrapped.as_ref() {
            layers.push(inner);
        }
        layers.push(&top);

        fill(&mut request.source_url, &layers, SOURCE_URL_KEYS);
        fill(&mut request.identity_name, &layers, IDENTITY_NAME_KEYS);
        fill(
            &mut request.identity_description,
            &layers,
            IDENTITY_DESCRIPTION_KEYS,
        );
        fill(&mut request.title, &layers, TITLE_KEYS);
        fill(&mut request.description, &layers, DESCRIPTION_KEYS);

        if request.categories.is_empty() {
            request.categories = first_categories(&layers);
        }
    }

    request
}

/// Normalizes raw category input into a deduplicated ordered list.
///
/// Each input may itself contain comma-separated values. Entries are trimmed,
/// empty entries dropped, and duplicates removed case-insensitively keeping the
/// first spelling.
pub fn normalize_categories<'a>(raw: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for chunk in raw {
        for part in chunk.split(',') {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                continue;
            }
            if seen.insert(trimmed.to_lowercase()) {
                out.push(trimmed.to_string());
            }
        }
    }
    out
}

/// Decodes a memo into a JSON object, unwrapping one level of string-encoded
/// JSON.
fn decode_object(memo: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(memo).ok()? {
        Value::Object(map) => Some(map),
        Value::String(inner) => match serde_json::from_str::<Value>(&inner).ok()? {
            Value::Object(map) => Some(map),
            _ => None,
        },
        _ => None,
    }
}

fn requirement_object(value: &Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map.clone()),
        Value::String(s) => decode_object(s),
        _ => None,
    }
}

fn fill(slot: &mut Option<String>, layers: &[&Map<String, Value>], keys: &[&str]) {
    if slot.is_some() {
        return;
    }
    *slot = layers
        .iter()
        .flat_map(|layer| keys.iter().filter_map(move |key| layer.get(*key)))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string);
}

fn first_categories(layers: &[&Map<String, Value>]) -> Vec<String> {
    for layer in layers {
        for key in CATEGORY_KEYS {
            let normalized = match layer.get(*key) {
                Some(Value::String(s)) => normalize_categories([s.as_str()]),
                Some(Value::Array(items)) => {
                    normalize_categories(items.iter().filter_map(Value::as_str))
                }
                _ => continue,
            };
            if !normalized.is_empty() {
                return normalized;
            }
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn memos(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn reads_top_level_fields() {
        let request = parse_memos(&memos(&[
            r#"{"sourceUrl": "https://x.com/a/status/42", "categories": ["crypto"], "title": "Hello"}"#,
        ]));
        assert_eq!(
            request.source_url.as_deref(),
            Some("https://x.com/a/status/42")
        );
        assert_eq!(request.categories, vec!["crypto"]);
        assert_eq!(request.title.as_deref(), Some("Hello"));
        assert_eq!(request.description, None);
    }

    #[test]
    fn requirement_wrapper_wins_over_top_level() {
        let request = parse_memos(&memos(&[
            r#"{"url": "https://top.example/1", "requirement": {"url": "https://inner.example/2"}}"#,
        ]));
        assert_eq!(request.source_url.as_deref(), Some("https://inner.example/2"));
    }

    #[test]
    fn requirement_may_be_string_encoded_json() {
        let request = parse_memos(&memos(&[
            r#"{"requirement": "{\"tweetUrl\": \"https://x.com/a/status/9\", \"category\": \"art\"}"}"#,
        ]));
        assert_eq!(
            request.source_url.as_deref(),
            Some("https://x.com/a/status/9")
        );
        assert_eq!(request.categories, vec!["art"]);
    }

    #[test]
    fn first_memo_with_value_wins() {
        let request = parse_memos(&memos(&[
            r#"{"title": "first"}"#,
            r#"{"title": "second", "description": "later"}"#,
        ]));
        assert_eq!(request.title.as_deref(), Some("first"));
        assert_eq!(request.description.as_deref(), Some("later"));
    }

    #[test]
    fn empty_values_do_not_win() {
        let request = parse_memos(&memos(&[
            r#"{"title": "   ", "categories": ""}"#,
            r#"{"title": "real", "categories": "news"}"#,
        ]));
        assert_eq!(request.title.as_deref(), Some("real"));
        assert_eq!(request.categories, vec!["news"]);
    }

    #[test]
    fn skips_non_json_and_non_object_memos() {
        let request = parse_memos(&memos(&[
            "plain text",
            "[1, 2, 3]",
            "42",
            r#"{"identityName": "alice", "identity_description": "writer"}"#,
        ]));
        assert_eq!(request.identity_name.as_deref(), Some("alice"));
        assert_eq!(request.identity_description.as_deref(), Some("writer"));
    }

    #[test]
    fn no_memos_yields_empty_request() {
        let request = parse_memos::<String>(&[]);
        assert_eq!(request, JobRequest::default());
    }

    #[test]
    fn categories_from_comma_string() {
        assert_eq!(
            normalize_categories([" crypto ,defi,, crypto "]),
            vec!["crypto", "defi"]
        );
    }

    #[test]
    fn categories_dedupe_is_case_insensitive() {
        assert_eq!(
            normalize_categories(["Crypto", "crypto", "DeFi, defi"]),
            vec!["Crypto", "DeFi"]
        );
    }

    proptest! {
        /// Normalized categories are trimmed, non-empty and unique.
        #[test]
        fn normalized_categories_are_clean(raw in prop::collection::vec("[ a-zA-Z,]{0,20}", 0..8)) {
            let out = normalize_categories(raw.iter().map(String::as_str));
            let mut lowered = std::collections::HashSet::new();
            for c in &out {
                prop_assert!(!c.is_empty());
                prop_assert_eq!(c.trim(), c.as_str());
                prop_assert!(!c.contains(','));
                prop_assert!(lowered.insert(c.to_lowercase()));
            }
        }

        /// The parser never panics on arbitrary input.
        #[test]
        fn parse_never_panics(raw in prop::collection::vec(".{0,64}", 0..5)) {
            let _ = parse_memos(&raw);
        }
    }
}
