//! WebSocket transport tests over loopback

use hbf_transport::{
    Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    WebSocketConfig, WebSocketServer, WebSocketTransport,
};
use std::time::{Duration, Instant};
use tokio::time::timeout;

async fn next_message<R: TransportReceiver>(rx: &mut R) -> Option<String> {
    loop {
        match timeout(Duration::from_secs(2), rx.recv()).await.ok()?? {
            TransportEvent::Message(text) => return Some(text),
            TransportEvent::Connected => continue,
            _ => return None,
        }
    }
}

#[tokio::test]
async fn test_text_frames_both_directions() {
    let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();
    assert!(!server.is_secure());

    let accept = tokio::spawn(async move { server.accept().await.unwrap() });

    let (client_tx, mut client_rx) = WebSocketTransport::connect(&format!("ws://{}", addr))
        .await
        .unwrap();
    let (server_tx, mut server_rx, peer) = accept.await.unwrap();
    assert!(peer.ip().is_loopback());

    client_tx.send(r#"{"type":"authenticate"}"#.into()).await.unwrap();
    assert_eq!(
        next_message(&mut server_rx).await.as_deref(),
        Some(r#"{"type":"authenticate"}"#)
    );

    server_tx.send("hello".into()).await.unwrap();
    assert_eq!(next_message(&mut client_rx).await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_client_close_reports_disconnect() {
    let mut server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    let accept = tokio::spawn(async move { server.accept().await.unwrap() });
    let (client_tx, _client_rx) = WebSocketTransport::connect(&format!("ws://{}", addr))
        .await
        .unwrap();
    let (_server_tx, mut server_rx, _) = accept.await.unwrap();

    client_tx.close().await.unwrap();
    assert!(!client_tx.is_connected());

    let mut disconnected = false;
    while let Ok(Some(event)) = timeout(Duration::from_secs(2), server_rx.recv()).await {
        if matches!(event, TransportEvent::Disconnected { .. }) {
            disconnected = true;
            break;
        }
    }
    assert!(disconnected);
}

#[tokio::test]
async fn test_idle_socket_does_not_hold_up_the_listener() {
    let server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let mut server = server.with_config(WebSocketConfig {
        handshake_timeout: Duration::from_secs(30),
        ..Default::default()
    });
    let addr = server.local_addr().unwrap();

    // Plain TCP, never upgrades
    let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let accept = tokio::spawn(async move { server.accept().await.unwrap() });
    let started = Instant::now();
    let (client_tx, _client_rx) = WebSocketTransport::connect(&format!("ws://{}", addr))
        .await
        .unwrap();
    let (server_tx, _server_rx, _) = timeout(Duration::from_secs(2), accept)
        .await
        .expect("accept held up by the idle socket")
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(client_tx.is_connected());
    assert!(server_tx.is_connected());
}

#[tokio::test]
async fn test_stalled_handshake_is_never_accepted() {
    let server = WebSocketServer::bind("127.0.0.1:0").await.unwrap();
    let mut server = server.with_config(WebSocketConfig {
        handshake_timeout: Duration::from_millis(100),
        ..Default::default()
    });
    let addr = server.local_addr().unwrap();

    let _idle = tokio::net::TcpStream::connect(addr).await.unwrap();

    assert!(timeout(Duration::from_millis(500), server.accept())
        .await
        .is_err());
}
