//! HMAC-SHA256 payload signing for outbound webhooks.
//!
//! Signatures are computed over the JSON-serialized envelope with the
//! signature field absent, encoded as lowercase hex, and transmitted both
//! inside the payload and in the `X-Webhook-Signature` header as
//! `v1=<hex>`. Subscribers recompute the HMAC with the shared secret to
//! authenticate the sender.

use hmac::{Hmac, Mac};
use hookrelay_core::WebhookPayload;
use sha2::Sha256;

use crate::error::{DeliveryError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Signature scheme version carried in the header prefix.
pub const SIGNATURE_VERSION: &str = "v1";

/// Computes the hex HMAC-SHA256 of raw bytes under the given secret.
pub fn sign_bytes(payload: &[u8], secret: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| DeliveryError::configuration("invalid signing secret"))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Computes the signature for a payload envelope.
///
/// The envelope is serialized with its signature field absent, so the
/// signature never covers itself.
pub fn sign_payload(payload: &WebhookPayload, secret: &str) -> Result<String> {
    let mut unsigned = payload.clone();
    unsigned.signature = None;

    let bytes = serde_json::to_vec(&unsigned)
        .map_err(|e| DeliveryError::configuration(format!("unserializable payload: {e}")))?;
    sign_bytes(&bytes, secret)
}

/// Formats a hex signature as the `X-Webhook-Signature` header value.
pub fn signature_header(hex_signature: &str) -> String {
    format!("{SIGNATURE_VERSION}={hex_signature}")
}

/// Verifies a `v1=<hex>` header value against the unsigned envelope bytes.
///
/// Uses constant-time comparison. Intended for subscriber-side validation
/// and end-to-end tests of the wire format.
pub fn verify_signature(unsigned_payload: &[u8], header_value: &str, secret: &str) -> bool {
    let Some(hex_signature) = header_value.strip_prefix("v1=") else {
        return false;
    };
    let Ok(expected) = sign_bytes(unsigned_payload, secret) else {
        return false;
    };
    constant_time_eq(hex_signature, &expected)
}

/// Constant-time string comparison to avoid leaking the expected signature
/// through timing.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a_byte, b_byte) in a.bytes().zip(b.bytes()) {
        diff |= a_byte ^ b_byte;
    }
    diff == 0
}
