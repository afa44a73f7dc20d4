use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::MaybeTlsStream;

use crate::protocol::{BackendEvent, ControlEvent};
use crate::shutdown::Shutdown;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PING_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
}

/// Everything the link reports to its handler, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Emitted on every transition into `Connected` or `Disconnected`.
    Status { connected: bool },
    Backend(BackendEvent),
}

pub type EventHandler = Arc<dyn Fn(LinkEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream link already started")]
    AlreadyStarted,
}

/// The outbound half the router forwards control events into.
pub trait Upstream: Send + Sync {
    /// Forward `event`, or drop it silently when the link is not connected.
    fn send(&self, event: ControlEvent);
    fn state(&self) -> LinkState;
}

/// The single outbound WebSocket connection to the terminal backend.
///
/// [`UpstreamLink::start`] spawns a task that:
/// - connects to the backend URL
/// - on success: reports `Status { connected: true }` and pumps frames both
///   ways, pinging every 30s
/// - on failure or disconnect: reports `Status { connected: false }`, waits
///   the fixed reconnect delay and tries again, without limit
///
/// Control events are never queued across a disconnect: [`Upstream::send`]
/// drops them unless the link is connected, and each accepted event is
/// tagged with the connection generation it was accepted for, so nothing
/// buffered for a dead connection is written to its successor.
pub struct UpstreamLink {
    url: String,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<LinkState>>,
    generation: Arc<AtomicU64>,
    outbound_tx: mpsc::UnboundedSender<(u64, ControlEvent)>,
    outbound_rx: Mutex<Option<mpsc::UnboundedReceiver<(u64, ControlEvent)>>>,
    handler: Arc<RwLock<Option<EventHandler>>>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UpstreamLink {
    pub fn new(url: impl Into<String>, reconnect_delay: Duration) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            reconnect_delay,
            state: Arc::new(state),
            generation: Arc::new(AtomicU64::new(0)),
            outbound_tx,
            outbound_rx: Mutex::new(Some(outbound_rx)),
            handler: Arc::new(RwLock::new(None)),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Register the handler for status changes and backend events,
    /// replacing any previous one.
    pub fn on_event(&self, handler: impl Fn(LinkEvent) + Send + Sync + 'static) {
        *self.handler.write() = Some(Arc::new(handler));
    }

    /// Watch the connection state without consuming events.
    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Spawn the connection task. Only the first call does anything.
    pub fn start(&self, shutdown: Shutdown) -> Result<(), UpstreamError> {
        let outbound_rx = self
            .outbound_rx
            .lock()
            .take()
            .ok_or(UpstreamError::AlreadyStarted)?;
        let task = tokio::spawn(connection_loop(LoopContext {
            url: self.url.clone(),
            reconnect_delay: self.reconnect_delay,
            state: self.state.clone(),
            generation: self.generation.clone(),
            handler: self.handler.clone(),
            outbound_rx,
            shutdown,
        }));
        *self.task.lock() = Some(task);
        Ok(())
    }

    /// Wait for the connection task to finish after shutdown.
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Upstream for UpstreamLink {
    fn send(&self, event: ControlEvent) {
        if *self.state.borrow() != LinkState::Connected {
            tracing::debug!(
                event = event.name(),
                session = %event.session_id(),
                "upstream offline, dropping control event"
            );
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        // The receiver only goes away once the task has exited.
        let _ = self.outbound_tx.send((generation, event));
    }

    fn state(&self) -> LinkState {
        *self.state.borrow()
    }
}

struct LoopContext {
    url: String,
    reconnect_delay: Duration,
    state: Arc<watch::Sender<LinkState>>,
    generation: Arc<AtomicU64>,
    handler: Arc<RwLock<Option<EventHandler>>>,
    outbound_rx: mpsc::UnboundedReceiver<(u64, ControlEvent)>,
    shutdown: Shutdown,
}

impl LoopContext {
    fn emit(&self, event: LinkEvent) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(event);
        }
    }

    fn transition(&self, next: LinkState) {
        if next == LinkState::Connected {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
        self.state.send_replace(next);
        match next {
            LinkState::Connected => self.emit(LinkEvent::Status { connected: true }),
            LinkState::Disconnected => self.emit(LinkEvent::Status { connected: false }),
            LinkState::Connecting => {}
        }
    }
}

async fn connection_loop(mut ctx: LoopContext) {
    loop {
        if ctx.shutdown.is_triggered() {
            return;
        }

        ctx.transition(LinkState::Connecting);

        let attempt = tokio::select! {
            result = tokio::time::timeout(
                CONNECT_TIMEOUT,
                tokio_tungstenite::connect_async(ctx.url.as_str()),
            ) => result,
            _ = ctx.shutdown.wait() => {
                ctx.state.send_replace(LinkState::Disconnected);
                return;
            }
        };

        match attempt {
            Ok(Ok((ws_stream, _))) => {
                tracing::info!(backend = %ctx.url, "upstream connected");
                ctx.transition(LinkState::Connected);

                run_connection(ws_stream, &mut ctx).await;

                if ctx.shutdown.is_triggered() {
                    ctx.state.send_replace(LinkState::Disconnected);
                    return;
                }
                tracing::warn!(backend = %ctx.url, "upstream disconnected");
                ctx.transition(LinkState::Disconnected);
            }
            Ok(Err(e)) => {
                tracing::debug!(backend = %ctx.url, error = %e, "upstream connection failed");
                ctx.transition(LinkState::Disconnected);
            }
            Err(_) => {
                tracing::debug!(backend = %ctx.url, "upstream connection timed out");
                ctx.transition(LinkState::Disconnected);
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(ctx.reconnect_delay) => {}
            _ = ctx.shutdown.wait() => { return; }
        }
    }
}

async fn run_connection(ws_stream: WsStream, ctx: &mut LoopContext) {
    let (mut sink, mut stream) = ws_stream.split();
    let current = ctx.generation.load(Ordering::Acquire);
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.tick().await; // Skip the first immediate tick.

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match BackendEvent::parse(text.as_str()) {
                        Ok(event) => ctx.emit(LinkEvent::Backend(event)),
                        Err(e) => tracing::debug!(error = %e, "ignoring backend frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "upstream read error");
                        break;
                    }
                }
            }
            queued = ctx.outbound_rx.recv() => {
                let Some((generation, event)) = queued else { break };
                if generation != current {
                    tracing::debug!(
                        event = event.name(),
                        "discarding control event accepted for a previous connection"
                    );
                    continue;
                }
                match event.to_json() {
                    Ok(json) => {
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to encode control event"),
                }
            }
            _ = ping_interval.tick() => {
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            _ = ctx.shutdown.wait() => {
                let _ = sink.send(Message::Close(None)).await;
                break;
            }
        }
    }
}
