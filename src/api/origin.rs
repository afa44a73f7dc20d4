use axum::{extract::Request, middleware::Next, response::Response};

use super::error::ApiError;

/// Check the Origin header on WebSocket upgrade requests.
///
/// Browsers attach the page's Origin to WebSocket handshakes, so a hostile
/// page could otherwise open a relay connection on a visitor's behalf
/// (CSWSH).
///
/// - Non-WebSocket requests: pass through (CORS handles HTTP)
/// - Empty allow-list: pass through
/// - No Origin header: pass through (non-browser clients)
/// - Origin in the allow-list: pass through
/// - Otherwise: reject with 403
pub async fn check_ws_origin(
    allowed_origins: Vec<String>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let is_ws_upgrade = req
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade || allowed_origins.is_empty() {
        return Ok(next.run(req).await);
    }

    let origin = match req.headers().get("origin").and_then(|v| v.to_str().ok()) {
        None => return Ok(next.run(req).await),
        Some(o) => o.to_string(),
    };

    if allowed_origins.iter().any(|allowed| allowed == &origin) {
        return Ok(next.run(req).await);
    }

    tracing::warn!(origin = %origin, "refusing WebSocket upgrade from disallowed origin");
    Err(ApiError::OriginNotAllowed)
}
