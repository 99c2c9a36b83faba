//! Shared application state and the request gate.
//!
//! Every API request passes through [`request_gate`] before reaching a handler:
//! identify the client, charge its rate window, check the anti-forgery token on
//! state-changing methods, then admit.

use crate::auth::csrf::TokenAuthority;
use crate::clock::Clock;
use crate::config::Config;
use crate::cookies;
use crate::error::AppError;
use crate::storage::{RateLimiter, SessionStore};
use crate::vm::VmProvisioner;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::sync::Arc;

pub const CSRF_HEADER: &str = "x-csrf-token";

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub tokens: Arc<TokenAuthority>,
    pub sessions: Arc<SessionStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub provisioner: Arc<dyn VmProvisioner>,
}

impl AppState {
    pub fn new(config: Config, clock: Arc<dyn Clock>, provisioner: Arc<dyn VmProvisioner>) -> Self {
        let tokens = TokenAuthority::new(
            clock.clone(),
            config.csrf_token_ttl(),
            config.token_policy(),
        );
        let sessions = SessionStore::new(
            clock.clone(),
            config.session_ttl(),
            config.inactivity_ttl(),
        );
        let rate_limiter = RateLimiter::new(
            clock.clone(),
            config.rate_limit_max_requests,
            config.rate_limit_window(),
        );

        Self {
            config: Arc::new(config),
            clock,
            tokens: Arc::new(tokens),
            sessions: Arc::new(sessions),
            rate_limiter: Arc::new(rate_limiter),
            provisioner,
        }
    }
}

/// Client identity resolved by the gate.
///
/// Handlers extract it to record session ownership and membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddress(pub String);

impl<S> FromRequestParts<S> for ClientAddress
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<ClientAddress>()
            .cloned()
            .ok_or_else(|| AppError::Internal("Client address not resolved by gate".to_string()))
    }
}

/// Resolve the client identity for a request.
///
/// With `trust_proxy_headers`, the first `X-Forwarded-For` entry wins, then
/// `X-Real-IP`. Falls back to the transport peer, then `"unknown"`.
pub fn resolve_client_address(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trust_proxy_headers: bool,
) -> String {
    if trust_proxy_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = forwarded {
            return addr.to_string();
        }

        let real_ip = headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(addr) = real_ip {
            return addr.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Short non-reversible tag for a client address, for logs.
pub fn ip_hash(address: &str) -> String {
    let mut hasher = std::hash::DefaultHasher::new();
    address.hash(&mut hasher);
    format!("{:x}", hasher.finish())
}

fn is_state_changing(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: u64) {
    headers.insert(name, HeaderValue::from(value));
}

fn rate_limit_headers(state: &AppState, client: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert_header(
        &mut headers,
        "x-ratelimit-limit",
        u64::from(state.rate_limiter.limit()),
    );
    insert_header(
        &mut headers,
        "x-ratelimit-remaining",
        u64::from(state.rate_limiter.remaining(client)),
    );
    insert_header(
        &mut headers,
        "x-ratelimit-reset",
        state.rate_limiter.reset_at(client).div_ceil(1000),
    );
    headers
}

/// Rate limiting and anti-forgery check in front of every API route.
pub async fn request_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = resolve_client_address(
        request.headers(),
        peer,
        state.config.trust_proxy_headers,
    );

    if !state.rate_limiter.allow(&client) {
        let reset_at = state.rate_limiter.reset_at(&client);
        let retry_after = reset_at
            .saturating_sub(state.clock.now_ms())
            .div_ceil(1000);
        tracing::warn!(
            action = "rate_limited",
            path = %request.uri().path(),
            ip_hash = %ip_hash(&client),
            "Rate limit exceeded"
        );

        let mut response = AppError::RateLimited { reset_at }.into_response();
        let headers = response.headers_mut();
        headers.extend(rate_limit_headers(&state, &client));
        insert_header(headers, "x-ratelimit-remaining", 0);
        insert_header(headers, "retry-after", retry_after);
        return response;
    }

    let limit_headers = rate_limit_headers(&state, &client);

    if is_state_changing(request.method()) {
        let token = request
            .headers()
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let session_id = cookies::session_id(request.headers());

        let verified = token
            .as_deref()
            .is_some_and(|t| state.tokens.verify(t, session_id.as_deref()));
        if !verified {
            tracing::warn!(
                action = "csrf_rejected",
                path = %request.uri().path(),
                token_present = token.is_some(),
                ip_hash = %ip_hash(&client),
                "Anti-forgery check failed"
            );
            let mut response = AppError::InvalidToken.into_response();
            response.headers_mut().extend(limit_headers);
            return response;
        }
    }

    request.extensions_mut().insert(ClientAddress(client));

    let mut response = next.run(request).await;
    response.headers_mut().extend(limit_headers);
    response
}
