//! Hauptbahnhof Core
//!
//! The state synchronization engine of the hackerspace hub.
//!
//! This crate provides:
//! - Device nodes and their wire formats ([`Node`])
//! - The virtual topic translation graph ([`Translation`])
//! - The coordinator applying updates and deciding what to announce
//!   ([`StateCoordinator`])
//! - Hub configuration ([`HubConfig`])

pub mod config;
pub mod error;
pub mod node;
pub mod state;
pub mod translation;
pub mod types;

pub use config::{HubConfig, MqttConfig, NodeConfig, WebSocketConfig};
pub use error::{Error, ErrorCode, Result};
pub use node::{Node, NodeId, NodeKind};
pub use state::{AppliedChanges, BatchSummary, CoordinatorOutputs, StateCoordinator};
pub use translation::{Translation, MAX_RECURSION_DEPTH};
pub use types::{MqttUpdate, StateUpdate, TopicValue};
