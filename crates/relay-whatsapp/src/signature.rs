//! `X-Hub-Signature-256` verification for Meta webhooks.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `sha256=<hex>` over the raw request body.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Check `header` against the HMAC-SHA256 of `body` under `secret`.
///
/// An empty `secret` disables verification and accepts everything, including
/// a missing header. Only use that in development.
///
/// Malformed headers (missing, wrong prefix, bad hex) verify as `false`;
/// nothing here panics or errors. The comparison is constant-time.
pub fn verify_signature(body: &[u8], header: Option<&str>, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }

    let Some(sig_hex) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// `sha256=<hex>` for `body` under `secret`, the value Meta would send.
pub fn sign(body: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(body);
    Some(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}
