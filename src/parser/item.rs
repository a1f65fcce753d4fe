//! Derivation of the logical item key from a source URL.
//!
//! The same post is reachable under several URLs (`x.com` vs `twitter.com`,
//! with or without tracking query strings, with a trailing `/photo/1`). The
//! item key collapses these to one value so deduplication sees a single item.

use url::Url;

use crate::types::ItemId;

/// Hosts whose status ids are global, so the id alone names the post.
const POST_HOSTS: &[&str] = &["x.com", "twitter.com"];

/// Subdomains that serve the same posts as the bare post host.
const POST_HOST_PREFIXES: &[&str] = &["www.", "mobile."];

/// Path segments that precede a numeric post identifier.
const STATUS_SEGMENTS: &[&str] = &["status", "statuses"];

/// Derives the logical item key for a parsed source URL.
///
/// - On a post host (`x.com`, `twitter.com`), a numeric segment following
///   `status`/`statuses` is the key
/// - Otherwise the key is `host/path`, lower-cased host, no query or fragment,
///   no trailing slash
pub fn derive_item_id(url: &Url) -> ItemId {
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    if is_post_host(&host) {
        let after_status = segments
            .windows(2)
            .find(|pair| STATUS_SEGMENTS.contains(&pair[0].to_ascii_lowercase().as_str()))
            .map(|pair| pair[1])
            .filter(|id| is_numeric(id));
        if let Some(id) = after_status {
            return ItemId::new(id);
        }
    }

    if segments.is_empty() {
        ItemId::new(host)
    } else {
        ItemId::new(format!("{}/{}", host, segments.join("/")))
    }
}

fn is_post_host(host: &str) -> bool {
    let bare = POST_HOST_PREFIXES
        .iter()
        .find_map(|prefix| host.strip_prefix(prefix))
        .unwrap_or(host);
    POST_HOSTS.contains(&bare)
}

fn is_numeric(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(raw: &str) -> String {
        derive_item_id(&Url::parse(raw).unwrap()).0
    }

    #[test]
    fn status_urls_collapse_across_hosts() {
        assert_eq!(item("https://x.com/alice/status/12345"), "12345");
        assert_eq!(item("https://twitter.com/alice/status/12345"), "12345");
        assert_eq!(
            item("https://x.com/alice/status/12345/photo/1?s=20#top"),
            "12345"
        );
    }

    #[test]
    fn post_host_variants_share_a_key() {
        assert_eq!(item("https://www.twitter.com/alice/status/12345"), "12345");
        assert_eq!(item("https://mobile.x.com/i/web/status/12345"), "12345");
    }

    #[test]
    fn numeric_paths_on_other_hosts_keep_their_host() {
        let issue = item("https://github.com/org/repo/issues/5");
        let page = item("https://blog.example.com/page/5");
        assert_ne!(issue, page);
        assert_eq!(issue, "github.com/org/repo/issues/5");
        assert_eq!(page, "blog.example.com/page/5");
    }

    #[test]
    fn status_segment_off_post_hosts_is_a_plain_path() {
        assert_eq!(
            item("https://mastodon.example/@alice/statuses/42"),
            "mastodon.example/@alice/statuses/42"
        );
        assert_ne!(item("https://example.com/status/12345"), item("https://x.com/a/status/12345"));
    }

    #[test]
    fn non_numeric_status_falls_through() {
        assert_eq!(item("https://x.com/status/abc"), "x.com/status/abc");
    }

    #[test]
    fn fallback_normalizes_host_and_path() {
        assert_eq!(
            item("https://Example.COM/articles/hello/?utm=1"),
            "example.com/articles/hello"
        );
        assert_eq!(item("https://example.com/"), "example.com");
    }
}
