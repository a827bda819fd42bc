use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::WebhookSecrets;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`.
pub fn compute_signature(secret: &str, timestamp: &str, body: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Check every candidate against every configured secret. The timestamp
/// must be within `tolerance_secs` of `now` in either direction.
pub fn verify_timestamped(
    secrets: &WebhookSecrets,
    timestamp: &str,
    candidates: &[&str],
    body: &[u8],
    now: i64,
) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        tracing::warn!("Webhook signature rejected: malformed timestamp");
        return false;
    };

    // abs_diff cannot overflow, even for i64::MIN taken from a header
    let skew = now.abs_diff(ts);
    if skew > secrets.tolerance_secs.max(0) as u64 {
        tracing::warn!(
            "Webhook signature rejected: timestamp outside tolerance (skew={}s, max={}s)",
            skew,
            secrets.tolerance_secs
        );
        return false;
    }

    for secret in &secrets.secrets {
        let Some(expected) = compute_signature(secret, timestamp.trim(), body) else {
            continue;
        };
        let expected = expected.as_bytes();
        for candidate in candidates {
            let provided = candidate.trim().as_bytes();
            // length is not secret, always 64 hex chars
            if provided.len() == expected.len() && bool::from(expected.ct_eq(provided)) {
                return true;
            }
        }
    }

    false
}
