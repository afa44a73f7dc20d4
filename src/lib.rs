//! ttyrelay - a password-gated WebSocket relay for terminal sessions.
//!
//! Downstream clients connect over WebSocket, authenticate with a shared
//! password and exchange terminal session events. A single upstream link
//! carries their control events to the terminal backend and brings session
//! output back, which the router fans out to every authenticated client.

pub mod api;
pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod router;
pub mod shutdown;
pub mod upstream;
