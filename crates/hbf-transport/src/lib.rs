//! Hauptbahnhof Transport
//!
//! Text-frame WebSocket transport used by the gateway. Both listeners of the
//! hub are [`WebSocketServer`]s; the external one terminates TLS when the
//! `tls` feature is enabled and a certificate is configured.

pub mod error;
pub mod traits;
pub mod websocket;

#[cfg(feature = "tls")]
pub mod tls;

pub use error::{Result, TransportError};
pub use traits::{Transport, TransportEvent, TransportReceiver, TransportSender, TransportServer};
pub use websocket::{
    WebSocketConfig, WebSocketReceiver, WebSocketSender, WebSocketServer, WebSocketTransport,
};

#[cfg(feature = "tls")]
pub use tls::load_tls_acceptor;
#[cfg(feature = "tls")]
pub use tokio_rustls::TlsAcceptor;
