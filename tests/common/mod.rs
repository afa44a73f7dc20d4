#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{
    accept_async, connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use ttyrelay::config::{ConfigOverrides, RelayConfig};
use ttyrelay::relay::{Relay, RelayError};
use ttyrelay::router::MessageRouter;
use ttyrelay::shutdown::Shutdown;

pub const PASSWORD: &str = "correct horse";
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);
pub const RECONNECT_DELAY_MS: u64 = 100;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Handle to one relay connection accepted by [`FakeBackend`].
pub struct BackendConn {
    tx: mpsc::UnboundedSender<Option<String>>,
}

impl BackendConn {
    pub fn send(&self, value: Value) {
        let _ = self.tx.send(Some(value.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.tx.send(Some(text.to_string()));
    }

    /// Drop the TCP connection without a close handshake.
    pub fn drop_connection(&self) {
        let _ = self.tx.send(None);
    }
}

/// Terminal backend stand-in that records every frame the relay sends it.
pub struct FakeBackend {
    pub addr: SocketAddr,
    connections: mpsc::UnboundedReceiver<BackendConn>,
    received: mpsc::UnboundedReceiver<Value>,
}

impl FakeBackend {
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, connections) = mpsc::unbounded_channel();
        let (recv_tx, received) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let Ok(ws) = accept_async(stream).await else {
                    continue;
                };
                let (tx, rx) = mpsc::unbounded_channel();
                if conn_tx.send(BackendConn { tx }).is_err() {
                    return;
                }
                tokio::spawn(serve_backend_conn(ws, rx, recv_tx.clone()));
            }
        });

        Self {
            addr,
            connections,
            received,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.addr)
    }

    /// Wait for the relay to open its next upstream connection.
    pub async fn next_connection(&mut self) -> BackendConn {
        timeout(RECV_TIMEOUT, self.connections.recv())
            .await
            .expect("relay did not connect to backend")
            .expect("backend listener stopped")
    }

    /// Next event the relay forwarded upstream.
    pub async fn recv(&mut self) -> Value {
        timeout(RECV_TIMEOUT, self.received.recv())
            .await
            .expect("backend received nothing")
            .expect("backend channel closed")
    }

    /// Assert nothing reaches the backend for `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(value)) = timeout(wait, self.received.recv()).await {
            panic!("backend unexpectedly received {value}");
        }
    }
}

async fn serve_backend_conn(
    ws: WebSocketStream<TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<Option<String>>,
    received: mpsc::UnboundedSender<Value>,
) {
    let (mut tx, mut rx) = ws.split();
    let mut handle_alive = true;
    loop {
        tokio::select! {
            out = outbound.recv(), if handle_alive => match out {
                Some(Some(text)) => {
                    if tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(None) => break,
                None => handle_alive = false,
            },
            msg = rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = received.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

pub struct TestRelay {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub router: Arc<MessageRouter>,
    pub handle: JoinHandle<Result<(), RelayError>>,
}

impl TestRelay {
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }
}

pub async fn start_relay(backend_url: &str) -> TestRelay {
    start_relay_with(backend_url, ConfigOverrides::default()).await
}

pub async fn start_relay_with(backend_url: &str, overrides: ConfigOverrides) -> TestRelay {
    let overrides = ConfigOverrides {
        bind: Some("127.0.0.1:0".parse().unwrap()),
        backend: Some(backend_url.to_string()),
        password: Some(PASSWORD.to_string()),
        reconnect_delay_ms: Some(RECONNECT_DELAY_MS),
        ..overrides
    };
    let config = RelayConfig::resolve(None, overrides).unwrap();
    let bound = Relay::new(config).bind().await.unwrap();
    let addr = bound.local_addr().unwrap();
    let shutdown = bound.shutdown_handle();
    let router = bound.router().clone();
    let handle = tokio::spawn(bound.serve());
    TestRelay {
        addr,
        shutdown,
        router,
        handle,
    }
}

pub async fn connect(relay: &TestRelay) -> Client {
    let (client, _) = timeout(RECV_TIMEOUT, connect_async(relay.ws_url()))
        .await
        .expect("connect timed out")
        .expect("connect failed");
    client
}

pub async fn send(client: &mut Client, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data });
    client
        .send(Message::Text(frame.to_string().into()))
        .await
        .unwrap();
}

/// Next frame from the relay, text decoded as JSON.
pub async fn recv_message(client: &mut Client) -> Message {
    loop {
        let msg = timeout(RECV_TIMEOUT, client.next())
            .await
            .expect("client received nothing")
            .expect("stream ended")
            .expect("read error");
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return other,
        }
    }
}

/// Skip frames until an event named `name` arrives and return it.
pub async fn recv_event(client: &mut Client, name: &str) -> Value {
    loop {
        match recv_message(client).await {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == name {
                    return value;
                }
            }
            Message::Close(frame) => panic!("closed while waiting for {name}: {frame:?}"),
            _ => {}
        }
    }
}

/// Wait until the relay reports `backend_status` with the given state.
pub async fn wait_backend_status(client: &mut Client, connected: bool) {
    loop {
        let event = recv_event(client, "backend_status").await;
        if event["data"]["connected"] == connected {
            return;
        }
    }
}

pub async fn authenticate(client: &mut Client) {
    send(client, "authenticate", json!({ "password": PASSWORD })).await;
    recv_event(client, "auth_success").await;
}

/// Connect, authenticate and wait until the backend link is up.
pub async fn ready_client(relay: &TestRelay) -> Client {
    let mut client = connect(relay).await;
    wait_backend_status(&mut client, true).await;
    authenticate(&mut client).await;
    client
}

/// Assert no event named `name` arrives within `wait`.
pub async fn expect_no_event(client: &mut Client, name: &str, wait: Duration) {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            return;
        }
        match timeout(remaining, client.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: Value = serde_json::from_str(text.as_str()).unwrap();
                if value["event"] == name {
                    panic!("unexpected {name} event: {value}");
                }
            }
            Ok(Some(Ok(_))) => {}
            Ok(_) => return,
        }
    }
}
