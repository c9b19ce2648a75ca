//! WebSocket gateway
//!
//! Serves the internal (privileged) and external (unprivileged) listeners,
//! dispatches client requests to the state coordinator and fans coordinator
//! batches out to every connected client.

use dashmap::DashMap;
use hbf_core::{ErrorCode, StateCoordinator, StateUpdate, TopicValue, WebSocketConfig};
use hbf_transport::{
    TlsAcceptor, TransportEvent, TransportReceiver, TransportSender, TransportServer,
    WebSocketServer,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::{authorize, authorize_privileged, AuthContext, Authorization, Privilege};
use crate::error::Result;
use crate::messages::{ClientMessage, Nodes, ServerMessage};
use crate::session::{Connection, ConnectionId};
use crate::tokens::{IssuedToken, TokenStore};

#[derive(Clone)]
pub struct Gateway {
    config: Arc<WebSocketConfig>,
    coordinator: Arc<StateCoordinator>,
    /// Active connections
    connections: Arc<DashMap<ConnectionId, Arc<Connection>>>,
    tokens: Arc<TokenStore>,
    /// Troll block: unprivileged clients may not change state while set
    block_unprivileged: Arc<AtomicBool>,
}

impl Gateway {
    pub fn new(config: WebSocketConfig, coordinator: Arc<StateCoordinator>) -> Self {
        let tokens = TokenStore::new(Duration::from_secs(config.token_validity_seconds));
        Self {
            config: Arc::new(config),
            coordinator,
            connections: Arc::new(DashMap::new()),
            tokens: Arc::new(tokens),
            block_unprivileged: Arc::new(AtomicBool::new(false)),
        }
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Bind both listeners and serve them until `cancel` fires.
    ///
    /// `tls` wraps the external listener only.
    pub async fn serve(&self, tls: Option<TlsAcceptor>, cancel: CancellationToken) -> Result<()> {
        let internal = WebSocketServer::bind(&self.config.internal_addr()).await?;
        let mut external = WebSocketServer::bind(&self.config.external_addr()).await?;

        if let Some(acceptor) = tls {
            external = external.with_tls(acceptor);
        }

        if !external.is_secure() {
            warn!("External listener is not using TLS");
        }

        tokio::try_join!(
            self.serve_on(internal, Privilege::Privileged, cancel.clone()),
            self.serve_on(external, Privilege::Unprivileged, cancel),
        )?;

        Ok(())
    }

    /// Accept connections from any [`TransportServer`] until `cancel` fires
    pub async fn serve_on<S>(
        &self,
        mut server: S,
        privilege: Privilege,
        cancel: CancellationToken,
    ) -> Result<()>
    where
        S: TransportServer + 'static,
        S::Sender: 'static,
        S::Receiver: 'static,
    {
        info!(
            "Gateway accepting {:?} connections on {:?}",
            privilege,
            server.local_addr().ok()
        );

        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = server.accept() => accepted,
            };

            match accepted {
                Ok((sender, receiver, addr)) => {
                    self.handle_connection(Arc::new(sender), receiver, addr, privilege, cancel.clone());
                }
                Err(e) => {
                    warn!("Accept error on {:?} listener: {}", privilege, e);
                }
            }
        }

        info!("Gateway stopped accepting {:?} connections", privilege);
        Ok(())
    }

    /// Run one connection to completion on its own task
    fn handle_connection(
        &self,
        sender: Arc<dyn TransportSender>,
        receiver: impl TransportReceiver + 'static,
        addr: SocketAddr,
        privilege: Privilege,
        cancel: CancellationToken,
    ) {
        let gateway = self.clone();

        tokio::spawn(async move {
            let connection = Arc::new(Connection::new(
                sender,
                addr,
                privilege,
                cancel.child_token(),
            ));
            gateway.register(connection.clone());

            // A dropped connection may be stuck sending to its own peer
            tokio::select! {
                _ = connection.closing() => {}
                _ = gateway.converse(&connection, receiver) => {}
            }

            connection.close().await;
            gateway.unregister(&connection.id);
        });
    }

    /// Greet the client, then answer its frames until it goes away
    async fn converse(&self, connection: &Connection, mut receiver: impl TransportReceiver) {
        let addr = connection.addr;

        if let Err(e) = self.greet(connection).await {
            warn!("Could not greet {}: {}", addr, e);
        }

        loop {
            match receiver.recv().await {
                Some(TransportEvent::Message(text)) => {
                    for reply in self.handle_message(connection.privilege, &text).await {
                        if let Err(e) = connection.send(&reply).await {
                            error!("Send error to {}: {}", addr, e);
                            return;
                        }
                    }
                }
                Some(TransportEvent::Error(e)) => {
                    warn!("Bad frame from {}: {}", addr, e);
                    if connection
                        .send(&ServerMessage::error(ErrorCode::BadRequest))
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Some(TransportEvent::Disconnected { reason }) => {
                    info!("Client {} disconnected: {:?}", addr, reason);
                    return;
                }
                Some(TransportEvent::Connected) => {}
                None => return,
            }
        }
    }

    fn register(&self, connection: Arc<Connection>) {
        debug!(
            "Registered {:?} connection {} from {}",
            connection.privilege, connection.id, connection.addr
        );
        self.connections.insert(connection.id.clone(), connection);
    }

    fn unregister(&self, id: &ConnectionId) {
        if let Some((_, connection)) = self.connections.remove(id) {
            debug!("Removed connection {} from {}", id, connection.addr);
        }
        self.tokens.sweep();
    }

    /// Privileged clients start with a snapshot; everyone gets `client_info`
    async fn greet(&self, connection: &Connection) -> Result<()> {
        if connection.privilege.is_privileged() {
            connection.send(&self.state_message()).await?;
        }
        connection.send(&self.client_info(connection.addr)).await
    }

    // =========================================================================
    // Requests
    // =========================================================================

    /// Handle one client frame, returning the replies for that client
    pub async fn handle_message(&self, privilege: Privilege, raw: &str) -> Vec<ServerMessage> {
        let message = match ClientMessage::from_json(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!("Malformed message: {}", e);
                return vec![ServerMessage::error(ErrorCode::BadRequest)];
            }
        };

        debug!("Received {} from {:?} client", message.kind(), privilege);

        match message {
            ClientMessage::Authenticate { username, password } => {
                match self.authenticate(&username, &password) {
                    Some(issued) => self.authenticated_replies(issued),
                    None => {
                        warn!("Failed authentication for user {}", username);
                        vec![]
                    }
                }
            }
            ClientMessage::RefreshToken { token } => match self.tokens.refresh(&token) {
                Some(issued) => self.authenticated_replies(issued),
                None => vec![ServerMessage::error(ErrorCode::Unauthorized)],
            },
            ClientMessage::StateUpdate { updates, token } => {
                match authorize(privilege, token.as_deref(), &self.tokens, self.is_blocked()) {
                    Authorization::Authorized(context) => {
                        self.apply_updates(&context, updates).await;
                        vec![]
                    }
                    Authorization::Denied(code) => vec![ServerMessage::error(code)],
                }
            }
            ClientMessage::UpdateTrollBlock { block_unprivileged } => {
                match authorize_privileged(privilege) {
                    Authorization::Authorized(_) => {
                        self.set_blocked(block_unprivileged);
                        vec![]
                    }
                    Authorization::Denied(code) => vec![ServerMessage::error(code)],
                }
            }
            ClientMessage::Unknown => {
                warn!("Unknown message type: {}", raw);
                vec![ServerMessage::error(ErrorCode::BadRequest)]
            }
        }
    }

    fn authenticate(&self, username: &str, password: &str) -> Option<IssuedToken> {
        let known = self.config.users.get(username)?;
        if known != password {
            return None;
        }

        let issued = self.tokens.mint(username);
        debug!(
            "Authenticated user {}, token expires at {}",
            username, issued.expires_at
        );
        Some(issued)
    }

    fn authenticated_replies(&self, issued: IssuedToken) -> Vec<ServerMessage> {
        vec![
            ServerMessage::Authenticated {
                token: issued.token,
                expires_at: issued.expires_at,
            },
            self.state_message(),
        ]
    }

    async fn apply_updates(&self, context: &AuthContext, updates: Nodes<Value>) {
        let pairs = integer_updates(updates.nodes);
        debug!("Applying {} updates as {:?}", pairs.len(), context);
        let summary = self.coordinator.process_batch(pairs).await;
        debug!("State update from WebSocket: {:?}", summary);
    }

    // =========================================================================
    // Broadcast
    // =========================================================================

    /// Forward coordinator batches to every client until `cancel` fires
    pub async fn run_broadcast(
        &self,
        mut batches: mpsc::Receiver<Vec<StateUpdate>>,
        cancel: CancellationToken,
    ) {
        info!("Started WebSocket broadcast loop");

        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => break,
                batch = batches.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };
            let delivered = self.broadcast(&batch);
            debug!("Broadcast {} updates to {} clients", batch.len(), delivered);
        }

        info!("WebSocket broadcast loop finished");
    }

    /// Queue one batch on every connection, returning how many took it.
    ///
    /// Never waits on a peer. A connection whose send queue is full or
    /// closed is dropped; its own task unregisters it.
    pub fn broadcast(&self, updates: &[StateUpdate]) -> usize {
        let text = match ServerMessage::state_update(updates).to_json() {
            Ok(text) => text,
            Err(e) => {
                error!("Could not encode state update: {}", e);
                return 0;
            }
        };

        let mut delivered = 0;
        for entry in self.connections.iter() {
            let connection = entry.value();
            if !connection.is_connected() {
                continue;
            }

            match connection.try_send_text(text.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!("Dropping client {} after failed broadcast: {}", connection.addr, e);
                    connection.disconnect();
                }
            }
        }
        delivered
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Full snapshot plus the lockout flag
    pub fn state_message(&self) -> ServerMessage {
        ServerMessage::State {
            state: Nodes {
                nodes: self.coordinator.snapshot(),
            },
            block_unprivileged: self.is_blocked(),
        }
    }

    pub fn client_info(&self, addr: SocketAddr) -> ServerMessage {
        let external_scheme = if self.config.tls_enabled() { "wss" } else { "ws" };
        ServerMessage::ClientInfo {
            client_ip: addr.ip().to_string(),
            privileged_address: format!("ws://{}", self.config.internal_addr()),
            unprivileged_address: format!("{}://{}", external_scheme, self.config.external_addr()),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.block_unprivileged.load(Ordering::SeqCst)
    }

    pub fn set_blocked(&self, blocked: bool) {
        self.block_unprivileged.store(blocked, Ordering::SeqCst);
        info!("Updated block_unprivileged = {}", blocked);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    pub fn coordinator(&self) -> &Arc<StateCoordinator> {
        &self.coordinator
    }
}

/// Keep the integer entries of a client update, dropping the rest
fn integer_updates(nodes: BTreeMap<String, Value>) -> Vec<(String, TopicValue)> {
    nodes
        .into_iter()
        .filter_map(|(topic, value)| match value.as_i64() {
            Some(value) => Some((topic, value)),
            None => {
                warn!("Ignoring non-integer value {} for {}", value, topic);
                None
            }
        })
        .collect()
}
