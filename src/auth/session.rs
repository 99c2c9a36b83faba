//! Random identifier, nonce and secret generation.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::Rng;
use zeroize::Zeroizing;

/// Generate a cryptographically random session id.
///
/// Returns URL-safe base64 (43 characters) of 32 random bytes, safe to use
/// verbatim as a cookie value.
pub fn generate_session_id() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 32];
    rng.fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Generate a random anti-forgery nonce as 32 hex characters (16 bytes).
pub fn generate_token_nonce() -> String {
    let mut rng = rand::rng();
    let mut bytes = [0u8; 16];
    rng.fill(&mut bytes);
    hex::encode(bytes)
}

/// Generate a per-token HMAC key. Wiped from memory on drop.
pub fn generate_token_secret() -> Zeroizing<[u8; 32]> {
    let mut rng = rand::rng();
    let mut secret = Zeroizing::new([0u8; 32]);
    rng.fill(&mut secret[..]);
    secret
}
