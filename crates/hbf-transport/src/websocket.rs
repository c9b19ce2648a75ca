//! WebSocket transport implementation

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage, WebSocketStream};
use tracing::{debug, info, warn};

#[cfg(feature = "tls")]
use tokio_rustls::TlsAcceptor;

use crate::error::{Result, TransportError};
use crate::traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};

/// Handshakes that finished but were not yet picked up by `accept`
const READY_QUEUE: usize = 32;

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Frames buffered per connection before `send` waits and `try_send` fails
    pub send_queue: usize,
    /// Upper bound for the TLS + WebSocket handshake of one client
    pub handshake_timeout: Duration,
    /// Upper bound for writing one frame to the socket; the connection is
    /// dropped when it is exceeded
    pub write_timeout: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            send_queue: 100,
            handshake_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(5),
        }
    }
}

/// WebSocket client transport
pub struct WebSocketTransport;

/// WebSocket sender
pub struct WebSocketSender {
    tx: mpsc::Sender<WsMessage>,
    connected: Arc<Mutex<bool>>,
}

#[async_trait]
impl TransportSender for WebSocketSender {
    async fn send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn try_send(&self, text: String) -> Result<()> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        self.tx.try_send(WsMessage::Text(text)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
        })
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    async fn close(&self) -> Result<()> {
        // A full queue means the peer stopped reading; skip the close frame
        let _ = self.tx.try_send(WsMessage::Close(None));
        *self.connected.lock() = false;
        Ok(())
    }
}

/// WebSocket receiver
pub struct WebSocketReceiver {
    rx: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
impl TransportReceiver for WebSocketReceiver {
    async fn recv(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Split an upgraded stream into a writer task and a reader task
fn spawn_connection<S>(
    ws_stream: WebSocketStream<S>,
    config: &WebSocketConfig,
) -> (WebSocketSender, WebSocketReceiver)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, mut read) = ws_stream.split();

    let (send_tx, mut send_rx) = mpsc::channel::<WsMessage>(config.send_queue);
    let write_timeout = config.write_timeout;
    let (event_tx, event_rx) = mpsc::channel::<TransportEvent>(100);

    let connected = Arc::new(Mutex::new(true));
    let connected_write = connected.clone();
    let connected_read = connected.clone();

    // Writer
    tokio::spawn(async move {
        while let Some(msg) = send_rx.recv().await {
            match tokio::time::timeout(write_timeout, write.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    debug!("WebSocket write error: {}", e);
                    break;
                }
                Err(_) => {
                    warn!("WebSocket write timed out after {:?}", write_timeout);
                    break;
                }
            }
        }
        *connected_write.lock() = false;
    });

    // Reader
    tokio::spawn(async move {
        let _ = event_tx.send(TransportEvent::Connected).await;

        while let Some(result) = read.next().await {
            match result {
                Ok(WsMessage::Text(text)) => {
                    if event_tx.send(TransportEvent::Message(text)).await.is_err() {
                        break;
                    }
                }
                Ok(WsMessage::Binary(data)) => match String::from_utf8(data) {
                    Ok(text) => {
                        if event_tx.send(TransportEvent::Message(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let _ = event_tx
                            .send(TransportEvent::Error("binary frame is not UTF-8".into()))
                            .await;
                    }
                },
                Ok(WsMessage::Close(frame)) => {
                    let reason = frame.map(|f| f.reason.to_string());
                    let _ = event_tx.send(TransportEvent::Disconnected { reason }).await;
                    break;
                }
                // Pong replies are queued by tungstenite itself
                Ok(_) => {}
                Err(e) => {
                    let _ = event_tx
                        .send(TransportEvent::Disconnected {
                            reason: Some(e.to_string()),
                        })
                        .await;
                    break;
                }
            }
        }

        *connected_read.lock() = false;
    });

    let sender = WebSocketSender {
        tx: send_tx,
        connected,
    };
    let receiver = WebSocketReceiver { rx: event_rx };

    (sender, receiver)
}

#[async_trait]
impl Transport for WebSocketTransport {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn connect(url: &str) -> Result<(Self::Sender, Self::Receiver)> {
        info!("Connecting to WebSocket: {}", url);

        let (ws_stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        debug!("WebSocket connected, response: {:?}", response.status());

        Ok(spawn_connection(ws_stream, &WebSocketConfig::default()))
    }
}

/// TLS + WebSocket upgrade of one accepted TCP stream
#[derive(Clone)]
struct Handshaker {
    config: WebSocketConfig,
    #[cfg(feature = "tls")]
    tls: Option<TlsAcceptor>,
}

impl Handshaker {
    async fn upgrade(&self, stream: TcpStream) -> Result<(WebSocketSender, WebSocketReceiver)> {
        #[cfg(feature = "tls")]
        if let Some(acceptor) = &self.tls {
            let tls_stream = acceptor
                .accept(stream)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            let ws_stream = tokio_tungstenite::accept_async(tls_stream).await?;
            return Ok(spawn_connection(ws_stream, &self.config));
        }

        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        Ok(spawn_connection(ws_stream, &self.config))
    }
}

type Accepted = (WebSocketSender, WebSocketReceiver, SocketAddr);

/// WebSocket server
///
/// Handshakes run on their own tasks, so a client that connects and never
/// upgrades does not hold up anyone else on the listener.
pub struct WebSocketServer {
    listener: TcpListener,
    handshaker: Handshaker,
    ready_tx: mpsc::Sender<Accepted>,
    ready_rx: mpsc::Receiver<Accepted>,
}

impl WebSocketServer {
    pub async fn bind(addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", addr, e)))?;

        info!("WebSocket server listening on {}", addr);

        let (ready_tx, ready_rx) = mpsc::channel(READY_QUEUE);
        Ok(Self {
            listener,
            handshaker: Handshaker {
                config: WebSocketConfig::default(),
                #[cfg(feature = "tls")]
                tls: None,
            },
            ready_tx,
            ready_rx,
        })
    }

    pub fn with_config(mut self, config: WebSocketConfig) -> Self {
        self.handshaker.config = config;
        self
    }

    /// Terminate TLS on every accepted connection
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.handshaker.tls = Some(acceptor);
        self
    }

    /// Whether accepted connections are TLS wrapped
    pub fn is_secure(&self) -> bool {
        #[cfg(feature = "tls")]
        {
            self.handshaker.tls.is_some()
        }
        #[cfg(not(feature = "tls"))]
        {
            false
        }
    }

    fn spawn_handshake(&self, stream: TcpStream, addr: SocketAddr) {
        let handshaker = self.handshaker.clone();
        let ready = self.ready_tx.clone();

        tokio::spawn(async move {
            let timeout = handshaker.config.handshake_timeout;
            match tokio::time::timeout(timeout, handshaker.upgrade(stream)).await {
                Ok(Ok((sender, receiver))) => {
                    info!("WebSocket client connected from {}", addr);
                    let _ = ready.send((sender, receiver, addr)).await;
                }
                Ok(Err(e)) => warn!("WebSocket handshake with {} failed: {}", addr, e),
                Err(_) => warn!("WebSocket handshake with {} timed out", addr),
            }
        });
    }
}

#[async_trait]
impl TransportServer for WebSocketServer {
    type Sender = WebSocketSender;
    type Receiver = WebSocketReceiver;

    async fn accept(&mut self) -> Result<(Self::Sender, Self::Receiver, SocketAddr)> {
        loop {
            tokio::select! {
                Some(accepted) = self.ready_rx.recv() => return Ok(accepted),
                accepted = self.listener.accept() => {
                    let (stream, addr) = accepted?;
                    debug!("Accepted TCP connection from {}", addr);
                    self.spawn_handshake(stream, addr);
                }
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(TransportError::Io)
    }
}
