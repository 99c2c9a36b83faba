//! Session lifecycle endpoints.

use crate::auth::middleware::{ip_hash, AppState, ClientAddress, CSRF_HEADER};
use crate::cookies;
use crate::error::AppError;
use crate::models::{
    CreateSessionRequest, CreateSessionResponse, HeartbeatResponse, Session, SessionStatus,
    SessionStatusResponse, TerminateResponse,
};
use crate::vm::ProvisionError;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

fn ttl_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Absolute expiry of a session in epoch milliseconds.
fn expires_at(state: &AppState, session: &Session) -> u64 {
    session
        .created_at
        .saturating_add(ttl_ms(state.sessions.session_ttl()))
}

fn session_cookies(state: &AppState, session: &Session) -> HeaderMap {
    let mut headers = HeaderMap::new();
    cookies::set_session_cookies(
        &mut headers,
        &session.id,
        session.remote.as_ref().map(|r| r.remote_session_id.as_str()),
        state.config.session_ttl_secs,
    );
    headers
}

fn cleared_cookies() -> HeaderMap {
    let mut headers = HeaderMap::new();
    cookies::clear_session_cookies(&mut headers);
    headers
}

fn create_response(
    state: &AppState,
    session: &Session,
    admin_token: Option<String>,
    is_joining: bool,
) -> CreateSessionResponse {
    CreateSessionResponse {
        session_id: session.id.clone(),
        embed_url: session.embed_url().map(str::to_string),
        admin_token,
        expires_at: expires_at(state, session),
        inactivity_timeout: ttl_ms(state.sessions.inactivity_ttl()),
        is_shared: session.is_shared,
        connected_addresses: session.member_addresses.clone(),
        connected_count: session.member_addresses.len(),
        is_joining,
    }
}

/// POST /api/session/create — Create a session, or join a shared one
///
/// Body (optional JSON): `{isShared?, joinSessionId?}`.
/// A caller whose `sessionId` cookie names a live session gets 409.
pub async fn create_session(
    State(state): State<AppState>,
    ClientAddress(client): ClientAddress,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let req: CreateSessionRequest = if body.is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid request body: {}", e)))?
    };

    if let Some(existing) = cookies::session_id(&headers).and_then(|id| state.sessions.get(&id)) {
        return Err(AppError::SessionConflict {
            session_id: existing.id,
        });
    }

    if let Some(join_id) = req.join_session_id.as_deref() {
        let session = state
            .sessions
            .join(join_id, &client)
            .ok_or_else(|| AppError::NotFound("Shared session not found".to_string()))?;

        tracing::info!(
            action = "session_joined",
            session_id = %session.id,
            members = session.member_addresses.len(),
            ip_hash = %ip_hash(&client),
            "Client joined shared session"
        );

        let cookies = session_cookies(&state, &session);
        let response = create_response(&state, &session, None, true);
        return Ok((StatusCode::OK, cookies, Json(response)).into_response());
    }

    // The existence check above and this insert are not atomic across the
    // provisioning await; concurrent creates from one client can both succeed.
    let session = state.sessions.create(&client, req.is_shared);

    let provisioned = tokio::time::timeout(
        state.config.upstream_timeout(),
        state.provisioner.create_session(&state.config.vm),
    )
    .await
    .unwrap_or(Err(ProvisionError::Timeout));

    let remote = match provisioned {
        Ok(remote) => remote,
        Err(e) => {
            state.sessions.delete(&session.id);
            tracing::warn!(
                action = "session_rolled_back",
                session_id = %session.id,
                error = %e,
                "VM provisioning failed"
            );
            return Err(e.into());
        }
    };

    let admin_token = remote.admin_token.clone();
    let remote_session_id = remote.remote_session_id.clone();
    if !state.sessions.attach_remote(&session.id, remote) {
        // Swept while the provider was working
        state.provisioner.terminate_session(&remote_session_id).await;
        return Err(AppError::Internal(format!(
            "Session {} expired during provisioning",
            session.id
        )));
    }

    let session = state
        .sessions
        .get(&session.id)
        .ok_or_else(|| AppError::Internal("Session vanished after provisioning".to_string()))?;

    tracing::info!(
        action = "session_created",
        session_id = %session.id,
        remote_session_id = %remote_session_id,
        shared = session.is_shared,
        ip_hash = %ip_hash(&client),
        "Session created"
    );

    let cookies = session_cookies(&state, &session);
    let response = create_response(&state, &session, Some(admin_token), false);
    Ok((StatusCode::CREATED, cookies, Json(response)).into_response())
}

/// POST /api/session/heartbeat — Keep the caller's session alive
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<HeartbeatResponse>, AppError> {
    let session_id = cookies::session_id(&headers)
        .ok_or_else(|| AppError::SessionNotFound("No session found".to_string()))?;

    let previous = state
        .sessions
        .get(&session_id)
        .ok_or_else(|| AppError::SessionNotFound("Session expired or invalid".to_string()))?;

    if !state.sessions.touch(&session_id) {
        return Err(AppError::SessionNotFound(
            "Session expired or invalid".to_string(),
        ));
    }

    let now = state.sessions.now_ms();
    Ok(Json(HeartbeatResponse {
        time_remaining: expires_at(&state, &previous).saturating_sub(now),
        last_activity: now.saturating_sub(previous.last_activity_at),
        session_id: previous.id,
        is_active: true,
    }))
}

/// GET /api/session/status — Describe the caller's session
///
/// Clears both cookies when they reference a session that is no longer valid.
pub async fn status(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(session_id) = cookies::session_id(&headers) else {
        return Json(SessionStatusResponse {
            has_session: false,
            session: None,
        })
        .into_response();
    };

    let Some(session) = state.sessions.get(&session_id) else {
        return (
            cleared_cookies(),
            Json(SessionStatusResponse {
                has_session: false,
                session: None,
            }),
        )
            .into_response();
    };

    let now = state.sessions.now_ms();
    let will_expire_at = expires_at(&state, &session);
    Json(SessionStatusResponse {
        has_session: true,
        session: Some(SessionStatus {
            time_remaining: will_expire_at.saturating_sub(now),
            time_since_activity: now.saturating_sub(session.last_activity_at),
            embed_url: session.embed_url().map(str::to_string),
            will_expire_at,
            inactivity_limit: ttl_ms(state.sessions.inactivity_ttl()),
            is_shared: session.is_shared,
            connected_count: session.member_addresses.len(),
            created_at: session.created_at,
            last_activity: session.last_activity_at,
            id: session.id,
        }),
    })
    .into_response()
}

/// Stop the remote VM best effort, then drop the session and its tokens.
async fn tear_down(state: &AppState, session: &Session, headers: &HeaderMap) {
    if let Some(remote) = &session.remote {
        if !state
            .provisioner
            .terminate_session(&remote.remote_session_id)
            .await
        {
            tracing::warn!(
                session_id = %session.id,
                remote_session_id = %remote.remote_session_id,
                "Remote VM termination failed, continuing with local cleanup"
            );
        }
    }

    state.sessions.delete(&session.id);
    if let Some(token) = headers.get(CSRF_HEADER).and_then(|v| v.to_str().ok()) {
        state.tokens.revoke(token);
    }
    let revoked = state.tokens.revoke_session(&session.id);

    tracing::info!(
        action = "session_terminated",
        session_id = %session.id,
        revoked_tokens = revoked,
        "Session terminated"
    );
}

/// POST /api/session/terminate — End the caller's session
///
/// A non-owner member of a shared session only leaves: its cookies are
/// cleared and the VM keeps running for the others. A session that already
/// expired on an earlier request still has its VM stopped here if no sweep
/// has claimed it yet.
pub async fn terminate(
    State(state): State<AppState>,
    ClientAddress(client): ClientAddress,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let session_id = cookies::session_id(&headers)
        .ok_or_else(|| AppError::SessionNotFound("No session found".to_string()))?;

    let terminated = match state.sessions.get(&session_id) {
        Some(session) if session.is_shared && !session.is_owner(&client) => {
            tracing::info!(
                action = "session_left",
                session_id = %session.id,
                ip_hash = %ip_hash(&client),
                "Member left shared session"
            );
            false
        }
        Some(session) => {
            tear_down(&state, &session, &headers).await;
            true
        }
        // Expired on an earlier access with its VM still running
        None => match state.sessions.take_evicted(&session_id) {
            Some(session) => {
                tear_down(&state, &session, &headers).await;
                true
            }
            None => false,
        },
    };

    Ok((
        cleared_cookies(),
        Json(TerminateResponse {
            success: true,
            session_terminated: terminated,
        }),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const OWNER: &str = "203.0.113.7";
    const OTHER: &str = "198.51.100.1";

    async fn create(h: &Harness, ip: &str, body: &str) -> serde_json::Value {
        let response = h.send(h.post("/api/session/create", ip, None, body)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    #[tokio::test]
    async fn test_create_private_session() {
        let h = harness();
        let response = h
            .send(h.post("/api/session/create", OWNER, None, ""))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("sessionId="));
        assert!(cookies[0].contains("HttpOnly; Secure; SameSite=Strict; Path=/; Max-Age=600"));
        assert!(cookies[1].starts_with("remoteSessionId=vm-1;"));

        let body = json_body(response).await;
        let session_id = body["sessionId"].as_str().unwrap();
        assert_eq!(session_id.len(), 43);
        assert_eq!(body["embedUrl"], "https://vm.example/1");
        assert_eq!(body["adminToken"], "admin-1");
        assert_eq!(body["expiresAt"], START_MS + 600_000);
        assert_eq!(body["inactivityTimeout"], 30_000);
        assert_eq!(body["isShared"], false);
        assert_eq!(body["connectedCount"], 1);
        assert_eq!(body["connectedAddresses"][0], OWNER);
        assert_eq!(body["isJoining"], false);

        let session = h.state.sessions.get(session_id).unwrap();
        assert_eq!(session.remote.unwrap().remote_session_id, "vm-1");
    }

    #[tokio::test]
    async fn test_create_rejects_malformed_body() {
        let h = harness();
        let response = h
            .send(h.post("/api/session/create", OWNER, None, "{not json"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(h.state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_create_conflict() {
        let h = harness();
        let body = create(&h, OWNER, "{}").await;
        let session_id = body["sessionId"].as_str().unwrap();

        let response = h
            .send(h.post("/api/session/create", OWNER, Some(session_id), "{}"))
            .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert_eq!(body["sessionId"], session_id);
        assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_cookie_does_not_conflict() {
        let h = harness();
        let response = h
            .send(h.post("/api/session/create", OWNER, Some("expired-id"), "{}"))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_create_rolls_back_on_provider_failure() {
        let h = harness();
        h.provisioner.fail.store(true, Ordering::SeqCst);

        let response = h
            .send(h.post("/api/session/create", OWNER, None, "{}"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(set_cookies(&response).is_empty());
        let body = json_body(response).await;
        assert_eq!(body["error"], "Failed to create session");
        assert!(!body.to_string().contains("no capacity"));
        assert!(h.state.sessions.is_empty());
    }

    #[tokio::test]
    async fn test_create_joins_shared_session() {
        let h = harness();
        let body = create(&h, OWNER, r#"{"isShared":true}"#).await;
        let session_id = body["sessionId"].as_str().unwrap().to_string();

        let join = format!(r#"{{"joinSessionId":"{}"}}"#, session_id);
        let response = h
            .send(h.post("/api/session/create", OTHER, None, &join))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(set_cookies(&response).len(), 2);

        let body = json_body(response).await;
        assert_eq!(body["sessionId"], session_id.as_str());
        assert_eq!(body["isJoining"], true);
        assert!(body["adminToken"].is_null());
        assert_eq!(body["embedUrl"], "https://vm.example/1");
        assert_eq!(body["connectedCount"], 2);
        assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_join_private_session_not_found() {
        let h = harness();
        let body = create(&h, OWNER, "{}").await;
        let join = format!(r#"{{"joinSessionId":"{}"}}"#, body["sessionId"].as_str().unwrap());

        let response = h
            .send(h.post("/api/session/create", OTHER, None, &join))
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_heartbeat_and_inactivity_expiry() {
        let h = harness();
        let body = create(&h, OWNER, "{}").await;
        let session_id = body["sessionId"].as_str().unwrap().to_string();

        h.clock.advance(Duration::from_secs(20));
        let response = h
            .send(h.post("/api/session/heartbeat", OWNER, Some(&session_id), ""))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["isActive"], true);
        assert_eq!(body["lastActivity"], 20_000);
        assert_eq!(body["timeRemaining"], 580_000);

        // Heartbeat reset the inactivity clock
        h.clock.advance(Duration::from_secs(25));
        let response = h
            .send(h.post("/api/session/heartbeat", OWNER, Some(&session_id), ""))
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        h.clock.advance(Duration::from_secs(31));
        let response = h
            .send(h.post("/api/session/heartbeat", OWNER, Some(&session_id), ""))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_heartbeat_without_cookie() {
        let h = harness();
        let response = h
            .send(h.post("/api/session/heartbeat", OWNER, None, ""))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_status() {
        let h = harness();
        let response = h.send(h.get("/api/session/status", OWNER, None)).await;
        let body = json_body(response).await;
        assert_eq!(body["hasSession"], false);
        assert!(body["session"].is_null());

        let created = create(&h, OWNER, r#"{"isShared":true}"#).await;
        let session_id = created["sessionId"].as_str().unwrap().to_string();
        h.clock.advance(Duration::from_secs(5));

        let response = h
            .send(h.get("/api/session/status", OWNER, Some(&session_id)))
            .await;
        assert!(set_cookies(&response).is_empty());
        let body = json_body(response).await;
        assert_eq!(body["hasSession"], true);
        let session = &body["session"];
        assert_eq!(session["id"], session_id.as_str());
        assert_eq!(session["timeSinceActivity"], 5_000);
        assert_eq!(session["timeRemaining"], 595_000);
        assert_eq!(session["willExpireAt"], START_MS + 600_000);
        assert_eq!(session["inactivityLimit"], 30_000);
        assert_eq!(session["isShared"], true);
        assert_eq!(session["connectedCount"], 1);
        assert_eq!(session["embedUrl"], "https://vm.example/1");
    }

    #[tokio::test]
    async fn test_status_clears_cookies_for_expired_session() {
        let h = harness();
        let created = create(&h, OWNER, "{}").await;
        let session_id = created["sessionId"].as_str().unwrap().to_string();

        h.clock.advance(Duration::from_secs(31));
        let response = h
            .send(h.get("/api/session/status", OWNER, Some(&session_id)))
            .await;
        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
        let body = json_body(response).await;
        assert_eq!(body["hasSession"], false);
    }

    #[tokio::test]
    async fn test_terminate_by_owner() {
        let h = harness();
        let created = create(&h, OWNER, "{}").await;
        let session_id = created["sessionId"].as_str().unwrap().to_string();
        let bound = h.state.tokens.issue(Some(&session_id)).value;

        let response = h
            .send(h.post("/api/session/terminate", OWNER, Some(&session_id), ""))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(set_cookies(&response)
            .iter()
            .all(|c| c.contains("Max-Age=0")));
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["sessionTerminated"], true);

        assert!(h.state.sessions.get(&session_id).is_none());
        assert!(!h.state.tokens.verify(&bound, None));
        assert_eq!(*h.provisioner.terminated.lock().unwrap(), vec!["vm-1"]);
    }

    #[tokio::test]
    async fn test_terminate_by_shared_member_only_leaves() {
        let h = harness();
        let created = create(&h, OWNER, r#"{"isShared":true}"#).await;
        let session_id = created["sessionId"].as_str().unwrap().to_string();
        h.state.sessions.join(&session_id, OTHER).unwrap();

        let response = h
            .send(h.post("/api/session/terminate", OTHER, Some(&session_id), ""))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(set_cookies(&response).len(), 2);
        let body = json_body(response).await;
        assert_eq!(body["sessionTerminated"], false);

        assert!(h.state.sessions.get(&session_id).is_some());
        assert!(h.provisioner.terminated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminate_without_cookie() {
        let h = harness();
        let response = h
            .send(h.post("/api/session/terminate", OWNER, None, ""))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_terminate_unknown_session_clears_cookies() {
        let h = harness();
        let response = h
            .send(h.post("/api/session/terminate", OWNER, Some("gone"), ""))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(set_cookies(&response).len(), 2);
        let body = json_body(response).await;
        assert_eq!(body["sessionTerminated"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_times_out_and_rolls_back() {
        let h = harness();
        h.provisioner.hang.store(true, Ordering::SeqCst);

        let response = h
            .send(h.post("/api/session/create", OWNER, None, "{}"))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(set_cookies(&response).is_empty());
        assert!(h.state.sessions.is_empty());
        assert_eq!(h.provisioner.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_swept_during_provisioning_stops_fresh_vm() {
        let h = harness();
        let sessions = h.state.sessions.clone();
        let clock = h.clock.clone();
        *h.provisioner.during_create.lock().unwrap() = Some(Box::new(move || {
            clock.advance(Duration::from_secs(31));
            sessions.sweep();
        }));

        let response = h
            .send(h.post("/api/session/create", OWNER, None, "{}"))
            .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(set_cookies(&response).is_empty());
        assert!(h.state.sessions.is_empty());
        assert_eq!(*h.provisioner.terminated.lock().unwrap(), vec!["vm-1"]);
    }

    #[tokio::test]
    async fn test_vm_of_session_expired_by_heartbeat_is_swept() {
        let h = harness();
        let created = create(&h, OWNER, "{}").await;
        let session_id = created["sessionId"].as_str().unwrap().to_string();

        h.clock.advance(Duration::from_secs(31));
        let response = h
            .send(h.post("/api/session/heartbeat", OWNER, Some(&session_id), ""))
            .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(h.provisioner.terminated.lock().unwrap().is_empty());

        let report = crate::cleanup::sweep_once(&h.state).await;
        assert_eq!(report.sessions, 1);
        assert_eq!(report.remote_terminated, 1);
        assert_eq!(*h.provisioner.terminated.lock().unwrap(), vec!["vm-1"]);

        // Nothing left over for the next pass
        let report = crate::cleanup::sweep_once(&h.state).await;
        assert_eq!(report.remote_terminated, 0);
        assert_eq!(h.provisioner.terminated.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_terminate_after_expiry_stops_vm() {
        let h = harness();
        let created = create(&h, OWNER, "{}").await;
        let session_id = created["sessionId"].as_str().unwrap().to_string();
        let bound = h.state.tokens.issue(Some(&session_id)).value;

        h.clock.advance(Duration::from_secs(31));
        // The status check evicts the session before terminate runs
        let response = h
            .send(h.get("/api/session/status", OWNER, Some(&session_id)))
            .await;
        assert_eq!(json_body(response).await["hasSession"], false);

        let response = h
            .send(h.post("/api/session/terminate", OWNER, Some(&session_id), ""))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["sessionTerminated"], true);
        assert_eq!(*h.provisioner.terminated.lock().unwrap(), vec!["vm-1"]);
        assert!(!h.state.tokens.verify(&bound, None));

        let report = crate::cleanup::sweep_once(&h.state).await;
        assert_eq!(report.remote_terminated, 0);
        assert_eq!(h.provisioner.terminated.lock().unwrap().len(), 1);
    }
}
