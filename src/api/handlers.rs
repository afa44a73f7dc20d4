use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    Json,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::connection::ConnectionId;
use crate::protocol::ServerEvent;
use crate::router::Disposition;

use super::error::ApiError;
use super::AppState;

#[derive(Serialize)]
pub(super) struct BackendHealth {
    connected: bool,
}

#[derive(Serialize)]
pub(super) struct HealthResponse {
    status: &'static str,
    backend: BackendHealth,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend: BackendHealth {
            connected: state.router.backend_connected(),
        },
    })
}

/// One slot of the downstream connection cap, released on drop.
pub(super) struct ConnectionSlot {
    count: Arc<AtomicUsize>,
}

impl ConnectionSlot {
    fn acquire(count: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        let current = count.fetch_add(1, Ordering::AcqRel);
        if current >= max {
            count.fetch_sub(1, Ordering::Release);
            return None;
        }
        Some(Self {
            count: count.clone(),
        })
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::Release);
    }
}

pub(super) async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let slot = ConnectionSlot::acquire(&state.connections, state.max_connections).ok_or_else(|| {
        tracing::warn!(max = state.max_connections, "downstream connection cap reached");
        ApiError::TooManyConnections
    })?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, slot)))
}

type WsSink = SplitSink<WebSocket, Message>;

async fn send_event(ws_tx: &mut WsSink, event: &ServerEvent) -> bool {
    match event.to_json() {
        Ok(json) => ws_tx.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode server event");
            true
        }
    }
}

/// Flush whatever the router already queued, then close with `code`.
async fn close_with(
    ws_tx: &mut WsSink,
    outbound: &mut mpsc::UnboundedReceiver<ServerEvent>,
    code: u16,
    reason: &'static str,
) {
    while let Ok(event) = outbound.try_recv() {
        if !send_event(ws_tx, &event).await {
            return;
        }
    }
    let close_frame = CloseFrame {
        code,
        reason: reason.into(),
    };
    let _ = ws_tx.send(Message::Close(Some(close_frame))).await;
    let _ = ws_tx.flush().await;
}

async fn handle_socket(socket: WebSocket, state: AppState, _slot: ConnectionSlot) {
    let conn = ConnectionId::new();
    let router = state.router.clone();
    let mut outbound = router.attach(conn);
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Router -> WebSocket
            event = outbound.recv() => {
                match event {
                    Some(event) => {
                        if !send_event(&mut ws_tx, &event).await {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // WebSocket -> router
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if router.handle_client_text(conn, text.as_str()) == Disposition::Close {
                            close_with(
                                &mut ws_tx,
                                &mut outbound,
                                close_code::POLICY,
                                "authentication failed",
                            )
                            .await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Binary is not part of the protocol; Ping/Pong handled by axum
                    Some(Err(e)) => {
                        tracing::debug!(conn = %conn, error = %e, "downstream read error");
                        break;
                    }
                }
            }

            _ = state.shutdown.wait() => {
                tracing::debug!(conn = %conn, "closing downstream for shutdown");
                close_with(
                    &mut ws_tx,
                    &mut outbound,
                    close_code::NORMAL,
                    "server shutting down",
                )
                .await;
                break;
            }
        }
    }

    router.detach(conn);
    // _slot is dropped here, releasing the connection cap slot
}
