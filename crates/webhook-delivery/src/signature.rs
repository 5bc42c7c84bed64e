//! Intake signature verification (spec §4.4.1 step 2): `HMAC-SHA256(secret,
//! B)` hex-encoded, compared to the `X-Signature` header in constant time.
//! Deliberately simpler than a timestamped/structured scheme — the spec
//! calls for a raw digest comparison, nothing more.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    Mismatch,

    #[error("invalid secret")]
    InvalidSecret,
}

/// Computes the hex-encoded `HMAC-SHA256(secret, body)` digest.
pub fn compute_signature(secret: &str, body: &[u8]) -> Result<String, SignatureError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies `header` against the signature computed over `body`, in
/// constant time.
pub fn verify(secret: &str, body: &[u8], header: &str) -> Result<(), SignatureError> {
    let expected = compute_signature(secret, body)?;
    if constant_time_compare(expected.as_bytes(), header.as_bytes()) {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Byte-for-byte comparison that takes the same amount of time regardless of
/// where the inputs first differ, to avoid leaking the correct signature
/// through response-time side channels.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
