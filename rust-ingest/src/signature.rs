//! Webhook signature verification.
//!
//! Senders sign the raw request body with HMAC-SHA256 and send the hex digest
//! in a header, optionally prefixed with `sha256=`.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Prefix accepted in front of the hex digest.
pub const SIGNATURE_PREFIX: &str = "sha256=";

/// Length in bytes of an HMAC-SHA256 digest.
const DIGEST_LEN: usize = 32;

/// Verify a webhook signature.
///
/// # Arguments
///
/// * `raw_body` - The request body exactly as received
/// * `signature` - The signature header value as received
/// * `secret` - The shared signing secret
///
/// # Returns
///
/// `true` only if `signature` decodes to the HMAC-SHA256 of `raw_body` under
/// `secret`. Any malformed encoding yields `false`.
pub fn verify(raw_body: &[u8], signature: &[u8], secret: &[u8]) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "signature_missing_fields"
        );
        return false;
    }

    let provided = match decode_signature(signature) {
        Some(bytes) => bytes,
        None => {
            warn!(signature_length = signature.len(), "signature_malformed");
            return false;
        }
    };

    let expected = match compute_mac(raw_body, secret) {
        Some(mac) => mac,
        None => {
            warn!("signature_invalid_key");
            return false;
        }
    };

    let valid = constant_time_eq(&expected, &provided);

    if !valid {
        warn!(body_length = raw_body.len(), "signature_mismatch");
    }

    valid
}

/// Produce the canonical `sha256=<hex>` header value for `raw_body`.
pub fn sign(raw_body: &[u8], secret: &[u8]) -> String {
    let digest = compute_mac(raw_body, secret)
        .map(hex::encode)
        .unwrap_or_default();
    format!("{}{}", SIGNATURE_PREFIX, digest)
}

fn compute_mac(raw_body: &[u8], secret: &[u8]) -> Option<[u8; DIGEST_LEN]> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(raw_body);

    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Some(digest)
}

/// Strip the optional prefix and hex-decode the digest.
fn decode_signature(signature: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(signature).ok()?.trim();
    let hex_part = text.strip_prefix(SIGNATURE_PREFIX).unwrap_or(text);

    if hex_part.len() != DIGEST_LEN * 2 {
        return None;
    }

    hex::decode(hex_part).ok()
}

/// Constant-time byte comparison to prevent timing attacks.
///
/// Only the length is allowed to leak; every byte pair is visited.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
