pub mod error;
mod handlers;
pub mod origin;

use axum::{
    http::{HeaderName, HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use crate::router::MessageRouter;
use crate::shutdown::Shutdown;

use handlers::*;

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<MessageRouter>,
    pub shutdown: Shutdown,
    /// Currently open downstream WebSocket connections.
    pub connections: Arc<AtomicUsize>,
    pub max_connections: usize,
}

impl AppState {
    pub fn new(router: Arc<MessageRouter>, shutdown: Shutdown, max_connections: usize) -> Self {
        Self {
            router,
            shutdown,
            connections: Arc::new(AtomicUsize::new(0)),
            max_connections,
        }
    }
}

/// HTTP-level settings for [`router`].
#[derive(Debug, Clone, Default)]
pub struct RouterConfig {
    /// Origins allowed to open WebSocket connections. Empty allows all.
    pub allowed_origins: Vec<String>,
}

pub fn router(state: AppState, config: RouterConfig) -> Router {
    let allowed_origins = config.allowed_origins.clone();
    let ws_routes = Router::new()
        .route("/ws", get(ws_upgrade))
        .layer(axum::middleware::from_fn(move |req, next| {
            let origins = allowed_origins.clone();
            origin::check_ws_origin(origins, req, next)
        }));

    let router = Router::new()
        .route("/health", get(health))
        .merge(ws_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("no-referrer"),
        ));

    if config.allowed_origins.is_empty() {
        router
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        router.layer(
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS]),
        )
    }
}
