//! Anti-forgery token endpoint.

use crate::auth::middleware::AppState;
use crate::cookies;
use crate::models::CsrfTokenResponse;
use axum::{extract::State, http::HeaderMap, Json};

/// GET /api/csrf-token — Issue a token
///
/// Bound to the caller's session when the `sessionId` cookie names a live one.
pub async fn issue_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Json<CsrfTokenResponse> {
    let bound = cookies::session_id(&headers).filter(|id| state.sessions.get(id).is_some());
    let issued = state.tokens.issue(bound.as_deref());

    tracing::debug!(
        action = "csrf_issued",
        bound = bound.is_some(),
        outstanding = state.tokens.len(),
        "Anti-forgery token issued"
    );

    Json(CsrfTokenResponse {
        token: issued.value,
        expires_in: state.tokens.ttl().as_millis() as u64,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_issue_token() {
        let h = harness();
        let response = h.send(h.get("/api/csrf-token", "203.0.113.7", None)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["expiresIn"], 300_000);
        let token = body["token"].as_str().unwrap();
        assert_eq!(token.split(':').count(), 3);
        assert!(h.state.tokens.verify(token, None));
    }

    #[tokio::test]
    async fn test_token_bound_to_live_session() {
        let h = harness();
        let session = h.state.sessions.create("203.0.113.7", false);

        let response = h
            .send(h.get("/api/csrf-token", "203.0.113.7", Some(&session.id)))
            .await;
        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap();

        assert!(h.state.tokens.verify(token, Some(&session.id)));
        assert!(!h.state.tokens.verify(token, Some("another-session")));
    }

    #[tokio::test]
    async fn test_stale_cookie_not_bound() {
        let h = harness();
        let response = h
            .send(h.get("/api/csrf-token", "203.0.113.7", Some("gone")))
            .await;
        let body = json_body(response).await;
        let token = body["token"].as_str().unwrap();

        assert!(h.state.tokens.verify(token, Some("any-session")));
    }
}
