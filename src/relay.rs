//! Composition root: owns the shared context and runs the relay.
//!
//! One [`Relay`] per process. It builds the authorization set, the session
//! registry and the single upstream link, wires the link's events into the
//! message router, then serves downstream WebSocket connections until the
//! shutdown signal fires.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;

use crate::api::{self, AppState, RouterConfig};
use crate::auth::AuthGate;
use crate::config::{ConfigError, RelayConfig};
use crate::registry::SessionRegistry;
use crate::router::MessageRouter;
use crate::shutdown::Shutdown;
use crate::upstream::{UpstreamError, UpstreamLink};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("cannot bind listening address {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

impl RelayError {
    /// Process exit code for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            RelayError::Config(_) => 2,
            RelayError::Bind { .. } => 3,
            RelayError::Upstream(_) | RelayError::Serve(_) => 1,
        }
    }
}

pub struct Relay {
    config: RelayConfig,
    link: Arc<UpstreamLink>,
    router: Arc<MessageRouter>,
    shutdown: Shutdown,
}

impl Relay {
    pub fn new(config: RelayConfig) -> Self {
        let gate = AuthGate::new(config.password.as_str());
        let link = Arc::new(UpstreamLink::new(
            config.backend_url.clone(),
            config.reconnect_delay,
        ));
        let router = Arc::new(MessageRouter::new(
            gate,
            SessionRegistry::new(),
            link.clone(),
        ));

        // The router owns the link; the link only holds a weak handle back.
        let weak = Arc::downgrade(&router);
        link.on_event(move |event| {
            if let Some(router) = weak.upgrade() {
                router.handle_link_event(event);
            }
        });

        Self {
            config,
            link,
            router,
            shutdown: Shutdown::new(),
        }
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.router
    }

    /// Handle that stops the relay when triggered.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Bind the listening socket without serving yet.
    pub async fn bind(self) -> Result<BoundRelay, RelayError> {
        let addr = self.config.bind;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        Ok(BoundRelay {
            relay: self,
            listener,
        })
    }
}

pub struct BoundRelay {
    relay: Relay,
    listener: TcpListener,
}

impl BoundRelay {
    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        self.listener.local_addr().map_err(RelayError::Serve)
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.relay.shutdown_handle()
    }

    pub fn router(&self) -> &Arc<MessageRouter> {
        self.relay.router()
    }

    /// Start the upstream link and serve until shutdown.
    pub async fn serve(self) -> Result<(), RelayError> {
        let BoundRelay { relay, listener } = self;
        let Relay {
            config,
            link,
            router,
            shutdown,
        } = relay;

        link.start(shutdown.clone())?;
        tracing::info!(backend = %link.url(), "upstream link started");

        let state = AppState::new(router, shutdown.clone(), config.max_connections);
        let app = api::router(
            state,
            RouterConfig {
                allowed_origins: config.allowed_origins.clone(),
            },
        );

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "relay listening");
        }

        let graceful = shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { graceful.wait().await })
            .await
            .map_err(RelayError::Serve)?;

        link.join().await;
        tracing::info!("relay stopped");
        Ok(())
    }
}
