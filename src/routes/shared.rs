//! Shared session endpoints.

use crate::auth::middleware::{ip_hash, AppState, ClientAddress};
use crate::cookies;
use crate::error::AppError;
use crate::models::{JoinSharedRequest, JoinSharedResponse, SharedSessionInfo, SharedSessionQuery};
use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};

fn require_session_id(id: Option<String>) -> Result<String, AppError> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::BadRequest("Session ID required".to_string()))
}

/// GET /api/session/shared?sessionId= — Membership of a shared session
pub async fn shared_info(
    State(state): State<AppState>,
    Query(query): Query<SharedSessionQuery>,
) -> Result<Json<SharedSessionInfo>, AppError> {
    let session_id = require_session_id(query.session_id)?;

    let session = state
        .sessions
        .get(&session_id)
        .filter(|s| s.is_shared)
        .ok_or_else(|| AppError::NotFound("Shared session not found".to_string()))?;

    Ok(Json(SharedSessionInfo::from(&session)))
}

/// POST /api/session/shared — Join a shared session
pub async fn join_shared(
    State(state): State<AppState>,
    ClientAddress(client): ClientAddress,
    Json(req): Json<JoinSharedRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session_id = require_session_id(req.session_id)?;

    let session = state
        .sessions
        .join(&session_id, &client)
        .ok_or_else(|| AppError::NotFound("Shared session not found".to_string()))?;

    tracing::info!(
        action = "session_joined",
        session_id = %session.id,
        members = session.member_addresses.len(),
        ip_hash = %ip_hash(&client),
        "Client joined shared session"
    );

    let mut headers = HeaderMap::new();
    cookies::set_session_cookies(
        &mut headers,
        &session.id,
        session.remote.as_ref().map(|r| r.remote_session_id.as_str()),
        state.config.session_ttl_secs,
    );

    Ok((
        headers,
        Json(JoinSharedResponse {
            embed_url: session.embed_url().map(str::to_string),
            connected_count: session.member_addresses.len(),
            connected_addresses: session.member_addresses,
            session_id: session.id,
            message: "Successfully joined shared session".to_string(),
        }),
    ))
}
