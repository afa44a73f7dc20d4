//! JSON event protocol spoken on both sides of the relay.
//!
//! Every WebSocket text frame carries one envelope:
//!
//! ```json
//! { "event": "input", "data": { "sessionId": "s1", "data": "ls\n" } }
//! ```
//!
//! `data` is omitted for events without a payload (`auth_success`).
//! Downstream clients send [`ClientEvent`]s, the relay forwards the
//! session-control subset upstream as [`ControlEvent`]s, the backend answers
//! with [`BackendEvent`]s and the relay talks back to clients with
//! [`ServerEvent`]s.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Payload of `authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub password: String,
}

/// Payload of `new_session` and `close_session`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: String,
}

/// Payload of `input` (downstream) and `output` (upstream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resize {
    pub session_id: String,
    pub rows: u16,
    pub cols: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub session_id: String,
    pub signal: String,
}

/// Events accepted from a downstream (browser) connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Authenticate(Credentials),
    NewSession(SessionRef),
    Input(SessionData),
    Resize(Resize),
    Signal(Signal),
    CloseSession(SessionRef),
}

impl ClientEvent {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    /// The session-control part of this event, or `None` for `authenticate`.
    pub fn into_control(self) -> Option<ControlEvent> {
        match self {
            ClientEvent::Authenticate(_) => None,
            ClientEvent::NewSession(p) => Some(ControlEvent::NewSession(p)),
            ClientEvent::Input(p) => Some(ControlEvent::Input(p)),
            ClientEvent::Resize(p) => Some(ControlEvent::Resize(p)),
            ClientEvent::Signal(p) => Some(ControlEvent::Signal(p)),
            ClientEvent::CloseSession(p) => Some(ControlEvent::CloseSession(p)),
        }
    }
}

/// Session-control events forwarded to the terminal backend, using the same
/// names and payloads the client sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ControlEvent {
    NewSession(SessionRef),
    Input(SessionData),
    Resize(Resize),
    Signal(Signal),
    CloseSession(SessionRef),
}

impl ControlEvent {
    pub fn session_id(&self) -> &str {
        match self {
            ControlEvent::NewSession(p) | ControlEvent::CloseSession(p) => &p.session_id,
            ControlEvent::Input(p) => &p.session_id,
            ControlEvent::Resize(p) => &p.session_id,
            ControlEvent::Signal(p) => &p.session_id,
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::NewSession(_) => "new_session",
            ControlEvent::Input(_) => "input",
            ControlEvent::Resize(_) => "resize",
            ControlEvent::Signal(_) => "signal",
            ControlEvent::CloseSession(_) => "close_session",
        }
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Events emitted by the terminal backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum BackendEvent {
    Output(SessionData),
}

impl BackendEvent {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Events the relay sends to downstream connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    AuthSuccess,
    AuthFailed { message: String },
    Output(SessionData),
    BackendStatus { connected: bool },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<BackendEvent> for ServerEvent {
    fn from(event: BackendEvent) -> Self {
        match event {
            BackendEvent::Output(p) => ServerEvent::Output(p),
        }
    }
}
