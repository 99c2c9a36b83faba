//! Request and response models for the API, plus the in-memory session entity.
//!
//! Wire models use camelCase field names to match what the browser client sends
//! and expects.

use serde::{Deserialize, Serialize};

// ============================================================================
// Session Entity
// ============================================================================

/// Handles returned by the VM provider for one remote browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSession {
    pub remote_session_id: String,
    pub embed_url: String,
    pub admin_token: String,
}

/// A logical browsing session as held by the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub last_activity_at: u64,
    pub owner_address: String,
    pub is_shared: bool,
    /// Join order, no duplicates; always starts with the owner.
    pub member_addresses: Vec<String>,
    pub remote: Option<RemoteSession>,
}

impl Session {
    pub fn embed_url(&self) -> Option<&str> {
        self.remote.as_ref().map(|r| r.embed_url.as_str())
    }

    pub fn is_owner(&self, address: &str) -> bool {
        self.owner_address == address
    }
}

// ============================================================================
// Anti-forgery Models
// ============================================================================

/// Response carrying a fresh anti-forgery token.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub token: String,
    /// Validity in milliseconds.
    pub expires_in: u64,
}

// ============================================================================
// Session Lifecycle Models
// ============================================================================

/// Request to create a session or join a shared one.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub is_shared: bool,
    pub join_session_id: Option<String>,
}

/// Response after creating or joining a session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub embed_url: Option<String>,
    /// Only the owner receives the provider admin token.
    pub admin_token: Option<String>,
    pub expires_at: u64,
    /// Inactivity limit in milliseconds.
    pub inactivity_timeout: u64,
    pub is_shared: bool,
    pub connected_addresses: Vec<String>,
    pub connected_count: usize,
    pub is_joining: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub session_id: String,
    /// Milliseconds until the absolute session TTL.
    pub time_remaining: u64,
    /// Milliseconds since the previous recorded activity.
    pub last_activity: u64,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: String,
    pub created_at: u64,
    pub last_activity: u64,
    pub time_remaining: u64,
    pub time_since_activity: u64,
    pub embed_url: Option<String>,
    pub will_expire_at: u64,
    pub inactivity_limit: u64,
    pub is_shared: bool,
    pub connected_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusResponse {
    pub has_session: bool,
    pub session: Option<SessionStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateResponse {
    pub success: bool,
    pub session_terminated: bool,
}

// ============================================================================
// Shared Session Models
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedSessionQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSharedRequest {
    pub session_id: Option<String>,
}

/// Membership view of a shared session.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedSessionInfo {
    pub id: String,
    pub connected_addresses: Vec<String>,
    pub connected_count: usize,
    pub created_at: u64,
    pub last_activity: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinSharedResponse {
    pub session_id: String,
    pub embed_url: Option<String>,
    pub connected_addresses: Vec<String>,
    pub connected_count: usize,
    pub message: String,
}

impl From<&Session> for SharedSessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            connected_addresses: session.member_addresses.clone(),
            connected_count: session.member_addresses.len(),
            created_at: session.created_at,
            last_activity: session.last_activity_at,
        }
    }
}
