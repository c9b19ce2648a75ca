//! Value objects flowing out of the state coordinator

use serde::{Deserialize, Serialize};

/// Integer value carried by every control topic
pub type TopicValue = i64;

/// One externally visible value change, announced to WebSocket clients
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateUpdate {
    pub topic: String,
    pub value: TopicValue,
}

impl StateUpdate {
    pub fn new(topic: impl Into<String>, value: TopicValue) -> Self {
        Self {
            topic: topic.into(),
            value,
        }
    }
}

/// One outbound re-publish to the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttUpdate {
    pub topic: String,
    pub payload: String,
}

impl MqttUpdate {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}
