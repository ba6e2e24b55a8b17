/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Webhook request signing.
//!
//! Every webhook request carries `X-Notif-Signature: sha256=<hex>` where the
//! digest is HMAC-SHA256 of the raw body under the webhook's secret.
//! Receivers recompute the digest to authenticate the sender.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature header name.
pub const SIGNATURE_HEADER: &str = "X-Notif-Signature";
/// Event id header name.
pub const EVENT_ID_HEADER: &str = "X-Notif-Event-ID";
/// Topic header name.
pub const TOPIC_HEADER: &str = "X-Notif-Topic";

/// Computes the signature header value for a body.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a signature header value against a body.
///
/// Comparison happens inside the MAC to stay constant-time.
pub fn verify(secret: &str, body: &[u8], header_value: &str) -> bool {
    let Some(hex_digest) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Generates a fresh 32-byte webhook secret, hex encoded.
pub fn generate_secret() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_format() {
        let signature = sign("secret", b"{\"id\":1}");
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
    }

    #[test]
    fn test_sign_verify_round_trip() {
        let body = br#"{"id":"evt","topic":"orders.created"}"#;
        let signature = sign("s3cr3t", body);

        assert!(verify("s3cr3t", body, &signature));
        assert!(!verify("other", body, &signature));
        assert!(!verify("s3cr3t", b"tampered", &signature));
    }

    #[test]
    fn test_verify_rejects_malformed_header() {
        assert!(!verify("s", b"body", "md5=abc"));
        assert!(!verify("s", b"body", "sha256=nothex"));
        assert!(!verify("s", b"body", ""));
    }

    #[test]
    fn test_sign_is_deterministic() {
        assert_eq!(sign("k", b"body"), sign("k", b"body"));
        assert_ne!(sign("k", b"body"), sign("k", b"body2"));
    }

    #[test]
    fn test_generate_secret() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
