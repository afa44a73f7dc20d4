use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// HTTP-level refusals issued before a WebSocket upgrade completes.
///
/// Everything after the upgrade is in-band protocol traffic and never
/// produces one of these.
#[derive(Debug)]
pub enum ApiError {
    /// 403 - WebSocket upgrade from an Origin outside the allow-list.
    OriginNotAllowed,
    /// 503 - The downstream connection cap is reached.
    TooManyConnections,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::OriginNotAllowed => StatusCode::FORBIDDEN,
            ApiError::TooManyConnections => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::OriginNotAllowed => "origin_not_allowed",
            ApiError::TooManyConnections => "too_many_connections",
        }
    }

    pub fn message(&self) -> String {
        match self {
            ApiError::OriginNotAllowed => {
                "WebSocket connections from this origin are not allowed.".to_string()
            }
            ApiError::TooManyConnections => {
                "Too many open connections. Try again shortly.".to_string()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
            }
        });
        (self.status_code(), Json(body)).into_response()
    }
}
