//! WebSocket message types
//!
//! Every frame is a JSON object discriminated by its `type` field.

use hbf_core::{ErrorCode, StateUpdate, TopicValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Result;

/// `{"nodes": {topic: value}}`, the payload of state snapshots and updates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nodes<V> {
    pub nodes: BTreeMap<String, V>,
}

impl<V> Default for Nodes<V> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

/// Client -> server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Authenticate {
        username: String,
        password: String,
    },
    RefreshToken {
        token: String,
    },
    /// Values stay raw JSON so a single bad entry can be dropped on its own
    StateUpdate {
        #[serde(default)]
        updates: Nodes<serde_json::Value>,
        #[serde(default)]
        token: Option<String>,
    },
    UpdateTrollBlock {
        block_unprivileged: bool,
    },
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Wire name of the message type, safe to log
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Authenticate { .. } => "authenticate",
            ClientMessage::RefreshToken { .. } => "refresh_token",
            ClientMessage::StateUpdate { .. } => "state_update",
            ClientMessage::UpdateTrollBlock { .. } => "update_troll_block",
            ClientMessage::Unknown => "unknown",
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated {
        token: String,
        /// Unix seconds
        expires_at: u64,
    },
    State {
        state: Nodes<TopicValue>,
        block_unprivileged: bool,
    },
    StateUpdate {
        updates: Nodes<TopicValue>,
    },
    ClientInfo {
        client_ip: String,
        privileged_address: String,
        unprivileged_address: String,
    },
    Error {
        code: u16,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode) -> Self {
        ServerMessage::Error {
            code: code.as_u16(),
        }
    }

    /// One broadcast frame for a whole coordinator batch
    pub fn state_update(updates: &[StateUpdate]) -> Self {
        let nodes = updates
            .iter()
            .map(|update| (update.topic.clone(), update.value))
            .collect();
        ServerMessage::StateUpdate {
            updates: Nodes { nodes },
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
