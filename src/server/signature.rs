//! HMAC-SHA256 signatures on inbound notifications.
//!
//! When a notification secret is configured, the protocol bridge signs each
//! request body and sends `X-Signature-256: sha256=<hex>`. Verification runs on
//! the raw body before it is parsed.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "x-signature-256";

/// Decodes `sha256=<hex>` into raw bytes. Malformed values yield `None`.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    hex::decode(header.strip_prefix("sha256=")?).ok()
}

/// Checks `signature_header` against the HMAC of `payload` under `secret`.
///
/// Comparison is constant-time.
pub fn verify_signature(payload: &[u8], signature_header: &str, secret: &[u8]) -> bool {
    let Some(expected) = parse_signature_header(signature_header) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

/// Produces the header value a sender would attach to `payload`.
#[cfg(test)]
pub fn sign(payload: &[u8], secret: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_prefixed_hex() {
        assert_eq!(
            parse_signature_header("sha256=1234ABcd"),
            Some(vec![0x12, 0x34, 0xab, 0xcd])
        );
        assert_eq!(parse_signature_header("sha256="), Some(vec![]));
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(parse_signature_header("1234abcd"), None);
        assert_eq!(parse_signature_header("sha1=1234abcd"), None);
        assert_eq!(parse_signature_header("sha256=abc"), None);
        assert_eq!(parse_signature_header("sha256=xyz"), None);
    }

    #[test]
    fn verifies_own_signature() {
        let body = br#"{"job_id":"1","phase":2}"#;
        let header = sign(body, b"secret");
        assert!(verify_signature(body, &header, b"secret"));
    }

    #[test]
    fn wrong_secret_or_body_fails() {
        let body = br#"{"job_id":"1","phase":2}"#;
        let header = sign(body, b"secret");
        assert!(!verify_signature(body, &header, b"other"));
        assert!(!verify_signature(br#"{"job_id":"2","phase":2}"#, &header, b"secret"));
        assert!(!verify_signature(body, "sha256=", b"secret"));
    }

    proptest! {
        #[test]
        fn arbitrary_headers_never_panic(header in ".*", body in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = verify_signature(&body, &header, b"secret");
        }

        #[test]
        fn signatures_round_trip(body in proptest::collection::vec(any::<u8>(), 0..256), secret in proptest::collection::vec(any::<u8>(), 0..64)) {
            let header = sign(&body, &secret);
            prop_assert!(verify_signature(&body, &header, &secret));
        }
    }
}
