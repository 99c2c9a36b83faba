//! Anti-forgery token issuance and verification.
//!
//! Token wire format: `{timestamp_ms}:{nonce_hex}:{signature_hex}` where the
//! signature is HMAC-SHA256 over `{timestamp_ms}:{nonce_hex}`, keyed with a
//! secret generated for that token alone. The secret never leaves the process.
//!
//! Verification fails closed. Unknown, expired, mis-bound and forged tokens all
//! yield `false` so callers cannot tell which tokens ever existed.

use crate::auth::session::{generate_token_nonce, generate_token_secret};
use crate::clock::Clock;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Whether a token survives successful verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenPolicy {
    /// Valid for any number of requests until it expires.
    #[default]
    Reusable,
    /// Removed on the first successful verification.
    SingleUse,
}

/// A freshly issued token as handed to the client.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub value: String,
    pub expires_at: u64,
}

struct TokenRecord {
    secret: Zeroizing<[u8; 32]>,
    bound_session_id: Option<String>,
    expires_at: u64,
}

/// Issues and verifies anti-forgery tokens.
pub struct TokenAuthority {
    tokens: Mutex<HashMap<String, TokenRecord>>,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    policy: TokenPolicy,
}

impl TokenAuthority {
    pub fn new(clock: Arc<dyn Clock>, ttl: Duration, policy: TokenPolicy) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            clock,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            policy,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn policy(&self) -> TokenPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TokenRecord>> {
        // Every operation leaves the map consistent, so a poisoned lock is safe to reuse
        self.tokens.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Issue a new token, optionally bound to a session id.
    ///
    /// Also drops every expired record (O(n) over live tokens).
    pub fn issue(&self, bound_session_id: Option<&str>) -> IssuedToken {
        let now = self.clock.now_ms();
        let data = format!("{}:{}", now, generate_token_nonce());
        let secret = generate_token_secret();
        let signature = hex::encode(sign(&secret, &data));
        let value = format!("{}:{}", data, signature);
        let expires_at = now.saturating_add(self.ttl_ms);

        let mut tokens = self.lock();
        tokens.insert(
            value.clone(),
            TokenRecord {
                secret,
                bound_session_id: bound_session_id.map(str::to_string),
                expires_at,
            },
        );
        tokens.retain(|_, record| now <= record.expires_at);

        IssuedToken { value, expires_at }
    }

    /// Verify a presented token.
    ///
    /// When `session_id` is given and the token was bound at issuance, the two
    /// must match. Never panics; every failure is `false`.
    pub fn verify(&self, token: &str, session_id: Option<&str>) -> bool {
        let now = self.clock.now_ms();
        let mut tokens = self.lock();

        let Some(record) = tokens.get(token) else {
            return false;
        };

        if now > record.expires_at {
            tokens.remove(token);
            return false;
        }

        if let (Some(presented), Some(bound)) = (session_id, record.bound_session_id.as_deref()) {
            if presented != bound {
                return false;
            }
        }

        let mut parts = token.split(':');
        let (Some(timestamp), Some(nonce), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if timestamp.is_empty() || nonce.is_empty() {
            return false;
        }

        let Ok(presented) = hex::decode(signature) else {
            return false;
        };
        let expected = sign(&record.secret, &format!("{}:{}", timestamp, nonce));
        if presented.len() != expected.len() || !bool::from(presented.ct_eq(&expected)) {
            return false;
        }

        if self.policy == TokenPolicy::SingleUse {
            tokens.remove(token);
        }
        true
    }

    /// Remove a token. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.lock().remove(token).is_some()
    }

    /// Remove every token bound to `session_id`.
    pub fn revoke_session(&self, session_id: &str) -> usize {
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, record| record.bound_session_id.as_deref() != Some(session_id));
        before - tokens.len()
    }

    /// Drop expired records. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, record| now <= record.expires_at);
        before - tokens.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sign(secret: &[u8; 32], data: &str) -> Vec<u8> {
    // HMAC accepts keys of any length; an empty signature never verifies
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return Vec::new();
    };
    mac.update(data.as_bytes());
    mac.finalize().into_bytes().to_vec()
}
