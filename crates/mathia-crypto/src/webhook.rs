//! Webhook signature verification — HMAC-SHA256 over the raw request body
//! with constant-time comparison.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify `claimed_hex` (with or without a `sha256=` prefix) against the
/// HMAC-SHA256 of `body` under `secret`. `Mac::verify_slice` is
/// constant-time.
pub fn verify_hmac_sha256(secret: &str, body: &[u8], claimed_hex: &str) -> bool {
    let claimed_hex = claimed_hex.strip_prefix("sha256=").unwrap_or(claimed_hex);
    let Ok(claimed) = hex::decode(claimed_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&claimed).is_ok()
}

/// Hex digest of HMAC-SHA256(secret, body). Used by tests and outbound
/// webhook signing.
pub fn sign_hmac_sha256(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_signature_verifies() {
        let digest = sign_hmac_sha256("topsecret", b"{\"event\":\"ping\"}");
        assert!(verify_hmac_sha256(
            "topsecret",
            b"{\"event\":\"ping\"}",
            &digest
        ));
    }

    #[test]
    fn sha256_prefix_is_accepted() {
        let digest = sign_hmac_sha256("topsecret", b"payload");
        assert!(verify_hmac_sha256(
            "topsecret",
            b"payload",
            &format!("sha256={digest}")
        ));
    }

    #[test]
    fn wrong_secret_rejected() {
        let digest = sign_hmac_sha256("topsecret", b"payload");
        assert!(!verify_hmac_sha256("other", b"payload", &digest));
    }

    #[test]
    fn tampered_body_rejected() {
        let digest = sign_hmac_sha256("topsecret", b"payload");
        assert!(!verify_hmac_sha256("topsecret", b"payload2", &digest));
    }

    #[test]
    fn malformed_hex_rejected() {
        assert!(!verify_hmac_sha256("topsecret", b"payload", "zz-not-hex"));
    }
}
