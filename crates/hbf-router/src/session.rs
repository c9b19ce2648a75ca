//! Connection registry entries

use hbf_transport::TransportSender;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::Privilege;
use crate::error::Result;
use crate::messages::ServerMessage;

/// Connection identifier
pub type ConnectionId = String;

/// A connected WebSocket client
pub struct Connection {
    pub id: ConnectionId,
    pub addr: SocketAddr,
    pub privilege: Privilege,
    pub connected_at: Instant,
    sender: Arc<dyn TransportSender>,
    /// Fires on gateway shutdown or when the connection is dropped
    shutdown: CancellationToken,
}

impl Connection {
    pub fn new(
        sender: Arc<dyn TransportSender>,
        addr: SocketAddr,
        privilege: Privilege,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            addr,
            privilege,
            connected_at: Instant::now(),
            sender,
            shutdown,
        }
    }

    /// Send an already serialized frame
    pub async fn send_text(&self, text: String) -> Result<()> {
        self.sender.send(text).await?;
        Ok(())
    }

    pub async fn send(&self, message: &ServerMessage) -> Result<()> {
        self.send_text(message.to_json()?).await
    }

    /// Queue a frame without waiting on the peer
    pub fn try_send_text(&self, text: String) -> Result<()> {
        self.sender.try_send(text)?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.sender.is_connected() && !self.shutdown.is_cancelled()
    }

    /// Ask the connection task to close and unregister this connection
    pub fn disconnect(&self) {
        self.shutdown.cancel();
    }

    pub async fn closing(&self) {
        self.shutdown.cancelled().await
    }

    pub async fn close(&self) {
        let _ = self.sender.close().await;
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("privilege", &self.privilege)
            .finish()
    }
}
