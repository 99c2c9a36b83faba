//! API route handlers.

pub mod csrf;
pub mod session;
pub mod shared;

use crate::auth::middleware::{request_gate, AppState};
use crate::middleware::security_headers;
use axum::{middleware, routing::get, routing::post, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the API router with all endpoints, every one behind the request gate.
pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        // Anti-forgery
        .route("/api/csrf-token", get(csrf::issue_token))
        // Session lifecycle
        .route("/api/session/create", post(session::create_session))
        .route("/api/session/heartbeat", post(session::heartbeat))
        .route("/api/session/status", get(session::status))
        .route("/api/session/terminate", post(session::terminate))
        // Shared sessions
        .route(
            "/api/session/shared",
            get(shared::shared_info).post(shared::join_shared),
        )
        .layer(middleware::from_fn_with_state(state, request_gate))
}

/// GET /health — Liveness probe, not gated.
pub async fn health() -> &'static str {
    "OK"
}

/// Full application: gated API, health probe, CORS, tracing and security headers.
pub fn app(state: AppState) -> Router {
    // Explicit CORS: deny all cross-origin requests (single-origin deployment).
    // CorsLayer::new() with no allowed origins rejects all CORS preflight requests.
    let cors = CorsLayer::new();

    Router::new()
        .route("/health", get(health))
        .merge(api_router(state.clone()))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}
