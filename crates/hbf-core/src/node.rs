//! Device nodes
//!
//! A node aggregates the state of one physical device. Fine grained input
//! topics (one dimmer channel, one lock) map to slots of the node's state
//! vector; the whole vector is re-published on the node's own topic.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::config::NodeConfig;
use crate::types::TopicValue;
use crate::{Error, Result};

/// Number of channels on a dimmer driver
pub const DFNODE_CHANNELS: usize = 8;

/// Stable handle of a node inside the coordinator's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// Wire format variant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// Serializes as `{"<espid>": [s0, .., s7]}`
    DfNode { espid: String },
    /// Serializes as `ON` / `OFF`
    DeLock,
}

impl NodeKind {
    fn slots(&self) -> usize {
        match self {
            NodeKind::DfNode { .. } => DFNODE_CHANNELS,
            NodeKind::DeLock => 1,
        }
    }
}

/// Aggregated state of one device
#[derive(Debug, Clone)]
pub struct Node {
    topic: String,
    kind: NodeKind,
    mappings: BTreeMap<String, usize>,
    state: Vec<TopicValue>,
}

impl Node {
    /// Create a node, rejecting mappings that point outside the state vector
    pub fn new(
        topic: impl Into<String>,
        kind: NodeKind,
        mappings: BTreeMap<String, usize>,
    ) -> Result<Self> {
        let topic = topic.into();
        let len = kind.slots();

        if let Some((input, index)) = mappings.iter().find(|(_, index)| **index >= len) {
            return Err(Error::Config(format!(
                "node {}: mapping {} -> {} out of range for {} slots",
                topic, input, index, len
            )));
        }

        Ok(Self {
            topic,
            kind,
            mappings,
            state: vec![0; len],
        })
    }

    pub fn dfnode(
        topic: impl Into<String>,
        espid: impl Into<String>,
        mappings: BTreeMap<String, usize>,
    ) -> Result<Self> {
        Self::new(
            topic,
            NodeKind::DfNode {
                espid: espid.into(),
            },
            mappings,
        )
    }

    pub fn delock(topic: impl Into<String>, mappings: BTreeMap<String, usize>) -> Result<Self> {
        Self::new(topic, NodeKind::DeLock, mappings)
    }

    pub fn from_config(config: &NodeConfig) -> Result<Self> {
        match config {
            NodeConfig::Dfnode {
                topic,
                espid,
                mappings,
            } => Self::dfnode(topic.clone(), espid.clone(), mappings.clone()),
            NodeConfig::Delock { topic, mappings } => Self::delock(topic.clone(), mappings.clone()),
        }
    }

    /// Canonical publish topic
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn state(&self) -> &[TopicValue] {
        &self.state
    }

    /// Input topics in mapping order
    pub fn input_topics(&self) -> impl Iterator<Item = &str> {
        self.mappings.keys().map(String::as_str)
    }

    /// Whether `topic` is one of this node's inputs
    pub fn maps(&self, topic: &str) -> bool {
        self.mappings.contains_key(topic)
    }

    /// Write `value` into the slot mapped by `topic`.
    ///
    /// Returns false, without touching the state, if the topic is not mapped.
    pub fn set_state_for_topic(&mut self, topic: &str, value: TopicValue) -> bool {
        match self.mappings.get(topic) {
            Some(&index) => match self.state.get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    true
                }
                None => false,
            },
            None => false,
        }
    }

    pub fn state_for_topic(&self, topic: &str) -> Result<TopicValue> {
        let index = *self
            .mappings
            .get(topic)
            .ok_or_else(|| Error::NotFound(topic.to_string()))?;

        self.state.get(index).copied().ok_or(Error::OutOfRange {
            index,
            len: self.state.len(),
        })
    }

    /// Payload published on [`Node::topic`]
    pub fn state_as_wire_message(&self) -> String {
        match &self.kind {
            NodeKind::DfNode { espid } => {
                let mut payload = Map::new();
                payload.insert(espid.clone(), json!(self.state));
                Value::Object(payload).to_string()
            }
            NodeKind::DeLock => {
                if self.state.first().copied().unwrap_or_default() == 0 {
                    "OFF".to_string()
                } else {
                    "ON".to_string()
                }
            }
        }
    }

    /// Per input topic projection of the state vector
    pub fn to_dict(&self) -> BTreeMap<String, TopicValue> {
        self.mappings
            .iter()
            .filter_map(|(topic, &index)| self.state.get(index).map(|v| (topic.clone(), *v)))
            .collect()
    }
}

/// Build the node arena from configuration
pub fn build_nodes(configs: &[NodeConfig]) -> Result<Vec<Node>> {
    configs.iter().map(Node::from_config).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mappings(pairs: &[(&str, usize)]) -> BTreeMap<String, usize> {
        pairs.iter().map(|(t, i)| (t.to_string(), *i)).collect()
    }

    #[test]
    fn test_dfnode_wire_message() {
        let mut node = Node::dfnode(
            "/esp/1",
            "a1b2",
            mappings(&[("/haspa/licht/1/c", 0), ("/haspa/licht/1/w", 7)]),
        )
        .unwrap();

        assert!(node.set_state_for_topic("/haspa/licht/1/w", 1023));
        assert_eq!(
            node.state_as_wire_message(),
            r#"{"a1b2":[0,0,0,0,0,0,0,1023]}"#
        );
    }

    #[test]
    fn test_delock_wire_message() {
        let mut node = Node::delock("/lock/door", mappings(&[("/haspa/tuer", 0)])).unwrap();
        assert_eq!(node.state_as_wire_message(), "OFF");

        node.set_state_for_topic("/haspa/tuer", 5);
        assert_eq!(node.state_as_wire_message(), "ON");

        node.set_state_for_topic("/haspa/tuer", 0);
        assert_eq!(node.state_as_wire_message(), "OFF");
    }

    #[test]
    fn test_unmapped_topic_is_ignored() {
        let mut node = Node::delock("/lock", mappings(&[("/haspa/tuer", 0)])).unwrap();
        assert!(!node.set_state_for_topic("/haspa/fenster", 1));
        assert_eq!(node.state(), &[0]);
    }

    #[test]
    fn test_state_for_topic_not_found() {
        let node = Node::delock("/lock", mappings(&[("/haspa/tuer", 0)])).unwrap();
        assert!(matches!(
            node.state_for_topic("/nope"),
            Err(Error::NotFound(t)) if t == "/nope"
        ));
    }

    #[test]
    fn test_out_of_range_mapping_rejected() {
        let result = Node::dfnode("/esp/1", "x", mappings(&[("/haspa/licht/9", 8)]));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
