//! Protocol core: authorizes, forwards and fans out events.
//!
//! Downstream connections hand every text frame to
//! [`MessageRouter::handle_client_text`]. Session-control events from authorized
//! connections go upstream unchanged; everything else is dropped without a
//! reply. The upstream link feeds [`MessageRouter::handle_link_event`], which
//! broadcasts backend output to every authorized connection and status
//! changes to every connection.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::auth::AuthGate;
use crate::connection::ConnectionId;
use crate::protocol::{ClientEvent, ControlEvent, ServerEvent};
use crate::registry::SessionRegistry;
use crate::upstream::{LinkEvent, LinkState, Upstream};

/// What the connection task should do after an event was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    /// Authentication failed; close the transport.
    Close,
}

pub struct MessageRouter {
    gate: AuthGate,
    sessions: SessionRegistry,
    upstream: Arc<dyn Upstream>,
    peers: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<ServerEvent>>>,
}

impl MessageRouter {
    pub fn new(gate: AuthGate, sessions: SessionRegistry, upstream: Arc<dyn Upstream>) -> Self {
        Self {
            gate,
            sessions,
            upstream,
            peers: RwLock::new(HashMap::new()),
        }
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn backend_connected(&self) -> bool {
        self.upstream.state() == LinkState::Connected
    }

    pub fn peer_count(&self) -> usize {
        self.peers.read().len()
    }

    /// Register a new downstream connection and return its outbound queue.
    ///
    /// The queue immediately holds a `backend_status` snapshot.
    pub fn attach(&self, conn: ConnectionId) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        // Snapshot under the write lock so no status broadcast slips between
        // the snapshot and the insert.
        let mut peers = self.peers.write();
        let _ = tx.send(ServerEvent::BackendStatus {
            connected: self.backend_connected(),
        });
        peers.insert(conn, tx);
        drop(peers);
        tracing::debug!(conn = %conn, "downstream attached");
        rx
    }

    /// Forget a downstream connection. Idempotent.
    pub fn detach(&self, conn: ConnectionId) {
        self.peers.write().remove(&conn);
        self.gate.forget(conn);
        tracing::debug!(conn = %conn, "downstream detached");
    }

    /// Handle one raw text frame from `conn`. Malformed frames are dropped.
    pub fn handle_client_text(&self, conn: ConnectionId, text: &str) -> Disposition {
        match ClientEvent::parse(text) {
            Ok(event) => self.handle_client_event(conn, event),
            Err(e) => {
                tracing::debug!(conn = %conn, error = %e, "dropping malformed frame");
                Disposition::Continue
            }
        }
    }

    pub fn handle_client_event(&self, conn: ConnectionId, event: ClientEvent) -> Disposition {
        let control = match event {
            ClientEvent::Authenticate(credentials) => {
                return self.authenticate(conn, &credentials.password);
            }
            other => match other.into_control() {
                Some(control) => control,
                None => return Disposition::Continue,
            },
        };

        if !self.gate.is_authenticated(conn) {
            tracing::debug!(
                conn = %conn,
                event = control.name(),
                "ignoring event from unauthenticated connection"
            );
            return Disposition::Continue;
        }

        // Only the lifecycle events touch the registry; input, resize and
        // signal are forwarded whether or not the session is known.
        match &control {
            ControlEvent::NewSession(p) => {
                if !self.sessions.add(&p.session_id) {
                    tracing::debug!(session = %p.session_id, "session id already registered");
                }
            }
            ControlEvent::CloseSession(p) => {
                self.sessions.remove(&p.session_id);
            }
            _ => {}
        }

        self.upstream.send(control);
        Disposition::Continue
    }

    fn authenticate(&self, conn: ConnectionId, password: &str) -> Disposition {
        match self.gate.authenticate(conn, password) {
            Ok(_) => {
                tracing::info!(conn = %conn, "downstream authenticated");
                self.send_to(conn, ServerEvent::AuthSuccess);
                Disposition::Continue
            }
            Err(rejected) => {
                tracing::warn!(conn = %conn, "downstream authentication rejected");
                self.send_to(
                    conn,
                    ServerEvent::AuthFailed {
                        message: rejected.reason,
                    },
                );
                Disposition::Close
            }
        }
    }

    /// Entry point for everything the upstream link reports.
    pub fn handle_link_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::Status { connected } => {
                self.broadcast_all(ServerEvent::BackendStatus { connected });
            }
            LinkEvent::Backend(event) => {
                self.broadcast_authenticated(ServerEvent::from(event));
            }
        }
    }

    fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        if let Some(tx) = self.peers.read().get(&conn) {
            let _ = tx.send(event);
        }
    }

    fn broadcast_all(&self, event: ServerEvent) {
        for tx in self.peers.read().values() {
            let _ = tx.send(event.clone());
        }
    }

    /// Output is not scoped to the connection that opened the session: every
    /// authenticated connection sees every session's output.
    fn broadcast_authenticated(&self, event: ServerEvent) {
        for (conn, tx) in self.peers.read().iter() {
            if self.gate.is_authenticated(*conn) {
                let _ = tx.send(event.clone());
            }
        }
    }
}
