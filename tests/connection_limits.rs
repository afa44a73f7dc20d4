//! HTTP surface of the relay: health, connection cap and origin checks.

mod common;

use common::*;
use std::time::Duration;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::StatusCode, Error as WsError},
};
use ttyrelay::config::ConfigOverrides;

#[tokio::test]
async fn connections_beyond_the_cap_are_refused() {
    let backend = FakeBackend::spawn().await;
    let relay = start_relay_with(
        &backend.url(),
        ConfigOverrides {
            max_connections: Some(1),
            ..Default::default()
        },
    )
    .await;

    let first = connect(&relay).await;
    match connect_async(relay.ws_url()).await {
        Err(WsError::Http(response)) => {
            assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE)
        }
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("second connection should be refused"),
    }

    // Closing the first connection frees its slot.
    drop(first);
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    loop {
        if connect_async(relay.ws_url()).await.is_ok() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "slot never released");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn disallowed_origin_is_forbidden() {
    let backend = FakeBackend::spawn().await;
    let relay = start_relay_with(
        &backend.url(),
        ConfigOverrides {
            allowed_origins: vec!["https://term.example".into()],
            ..Default::default()
        },
    )
    .await;

    let mut request = relay.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", "https://evil.example".parse().unwrap());
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("foreign origin should be refused"),
    }

    let mut request = relay.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("origin", "https://term.example".parse().unwrap());
    assert!(connect_async(request).await.is_ok());
}

#[tokio::test]
async fn health_reflects_the_upstream_link() {
    let mut backend = FakeBackend::spawn().await;
    let relay = start_relay(&backend.url()).await;
    let _upstream = backend.next_connection().await;

    let mut client = connect(&relay).await;
    wait_backend_status(&mut client, true).await;

    let body = http_get(relay.addr, "/health").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["backend"]["connected"], true);
}

/// Minimal HTTP/1.1 GET returning the response body.
async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let (head, body) = response.split_once("\r\n\r\n").unwrap();
    assert!(head.starts_with("HTTP/1.1 200"), "unexpected response: {head}");
    body.to_string()
}
