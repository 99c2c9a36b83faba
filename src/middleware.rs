//! Security headers middleware.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};

/// CSP applied to every response.
///
/// The browser page embeds the remote VM in an iframe, so `frame-src` admits the
/// provider's hosts while `frame-ancestors` still forbids framing this origin.
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; \
     script-src 'self'; \
     style-src 'self'; \
     img-src 'self' data:; \
     connect-src 'self'; \
     frame-src 'self' https://*.hyperbeam.com; \
     object-src 'none'; \
     frame-ancestors 'none'; \
     base-uri 'self'; \
     form-action 'self'";

/// Middleware that adds security headers to all responses.
///
/// - **Cache-Control: no-store**: session responses carry cookies and embed URLs
/// - **Referrer-Policy: no-referrer**
/// - **X-Content-Type-Options: nosniff**
/// - **X-Frame-Options: DENY**
/// - **Strict-Transport-Security**: session cookies are `Secure`, so the site is HTTPS only
/// - **Permissions-Policy**: camera, microphone, geolocation and payment disabled
/// - **Content-Security-Policy**: see [`CONTENT_SECURITY_POLICY`]
///
/// # Usage
///
/// ```rust,no_run
/// use axum::Router;
/// use axum::middleware;
/// use beamgate::middleware::security_headers;
///
/// let app: Router = Router::new()
///     .layer(middleware::from_fn(security_headers));
/// ```
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert("cache-control", HeaderValue::from_static("no-store"));
    headers.insert("referrer-policy", HeaderValue::from_static("no-referrer"));
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains; preload"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("camera=(), microphone=(), geolocation=(), payment=()"),
    );
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static(CONTENT_SECURITY_POLICY),
    );

    response
}
