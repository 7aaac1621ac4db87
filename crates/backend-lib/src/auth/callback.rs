// ============================
// crates/backend-lib/src/auth/callback.rs
// ============================
//! Authentication of provider callbacks.
//!
//! The callback link handed to the provider carries a token derived from the
//! shared API secrets. Only a party that knows the link (the provider) can
//! confirm a session.
use sha2::{Digest, Sha256};

/// Derive the callback token for a pair of API credentials.
pub fn callback_token(access_key: &str, signature_key: &str) -> String {
    let digest = Sha256::digest(format!("callback\n{access_key}\n{signature_key}").as_bytes());
    hex::encode(digest)
}

/// Compare a presented token with the expected one without short-circuiting
/// on the first differing byte.
pub fn verify_callback_token(expected: &str, presented: &str) -> bool {
    let (expected, presented) = (expected.as_bytes(), presented.as_bytes());
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
