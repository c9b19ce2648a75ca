//! Hauptbahnhof MQTT Bridge
//!
//! Connects the state coordinator to the MQTT broker: inbound integer
//! publishes become coordinator updates, coordinator republishes become
//! outbound MQTT messages.

pub mod error;
pub mod events;
pub mod mqtt;

pub use error::{BridgeError, Result};
pub use events::BridgeEvent;
pub use mqtt::{handle_publish, parse_payload, publish_update, MqttBridge};
