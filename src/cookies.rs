//! Session cookie parsing and `Set-Cookie` construction.
//!
//! Two cookies travel together: `sessionId` (the local session) and
//! `remoteSessionId` (the provider's VM id). Both are `HttpOnly; Secure;
//! SameSite=Strict` and live as long as the absolute session TTL.

use axum::http::{header, HeaderMap, HeaderValue};

pub const SESSION_COOKIE: &str = "sessionId";
pub const REMOTE_SESSION_COOKIE: &str = "remoteSessionId";

/// Read a cookie value from the request's `Cookie` headers.
pub fn get_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The caller's `sessionId` cookie, if present.
pub fn session_id(headers: &HeaderMap) -> Option<String> {
    get_cookie(headers, SESSION_COOKIE)
}

fn cookie_header(name: &str, value: &str, max_age_secs: u64) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age={}",
        name, value, max_age_secs
    ))
    .ok()
}

/// Append `Set-Cookie` headers for a session and its remote VM.
pub fn set_session_cookies(
    headers: &mut HeaderMap,
    session_id: &str,
    remote_session_id: Option<&str>,
    max_age_secs: u64,
) {
    if let Some(value) = cookie_header(SESSION_COOKIE, session_id, max_age_secs) {
        headers.append(header::SET_COOKIE, value);
    }
    if let Some(value) =
        remote_session_id.and_then(|id| cookie_header(REMOTE_SESSION_COOKIE, id, max_age_secs))
    {
        headers.append(header::SET_COOKIE, value);
    }
}

/// Append `Set-Cookie` headers that expire both session cookies.
pub fn clear_session_cookies(headers: &mut HeaderMap) {
    for name in [SESSION_COOKIE, REMOTE_SESSION_COOKIE] {
        if let Some(value) = cookie_header(name, "", 0) {
            headers.append(header::SET_COOKIE, value);
        }
    }
}
