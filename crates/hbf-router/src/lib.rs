//! Hauptbahnhof WebSocket Gateway
//!
//! Two WebSocket listeners in front of the state coordinator:
//! - the internal listener is trusted and receives a full snapshot on connect
//! - the external listener requires a token for every state change and can
//!   be locked out by a privileged client
//!
//! Every coordinator batch is broadcast to all connected clients.

pub mod auth;
pub mod error;
pub mod gateway;
pub mod messages;
pub mod session;
pub mod tokens;

pub use auth::{authorize, AuthContext, Authorization, Privilege};
pub use error::{Result, RouterError};
pub use gateway::Gateway;
pub use messages::{ClientMessage, Nodes, ServerMessage};
pub use session::{Connection, ConnectionId};
pub use tokens::{IssuedToken, TokenStore};
