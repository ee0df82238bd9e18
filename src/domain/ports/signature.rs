//! Webhook signature verification port.
//!
//! Vendor signature schemes vary; the webhook adapter only asks a verifier
//! whether the raw body matches the presented header value.

/// Capability to verify an inbound webhook signature.
pub trait SignatureVerifier: Send + Sync {
    /// Verify `header_value` against `body`. Comparison must be
    /// constant-time with respect to the expected digest.
    fn verify(&self, secret: &str, body: &[u8], header_value: &str) -> bool;
}

/// HMAC-SHA256 verifier: the header carries the hex digest of the body,
/// optionally prefixed `sha256=` (the common vendor convention).
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha256Verifier;

impl HmacSha256Verifier {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureVerifier for HmacSha256Verifier {
    fn verify(&self, secret: &str, body: &[u8], header_value: &str) -> bool {
        use hmac::{Hmac, Mac};
        use sha2::Sha256;

        let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
            return false;
        };
        mac.update(body);

        let presented = header_value.strip_prefix("sha256=").unwrap_or(header_value);
        let Ok(presented) = hex_decode(presented) else {
            return false;
        };
        mac.verify_slice(&presented).is_ok()
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>, ()> {
    if s.len() % 2 != 0 {
        return Err(());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
        .collect()
}
