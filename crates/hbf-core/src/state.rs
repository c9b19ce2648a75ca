//! State coordinator
//!
//! The single authority applying value changes to nodes. Every change enters
//! through [`StateCoordinator::apply_topic_value`] or
//! [`StateCoordinator::process_batch`]; the coordinator decides which nodes
//! must be re-published on MQTT and which updates must be broadcast to
//! WebSocket clients, and queues both exactly once per batch.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::node::{build_nodes, Node, NodeId};
use crate::translation::Translation;
use crate::types::{MqttUpdate, StateUpdate, TopicValue};
use crate::Result;

/// Outcome of applying one `(topic, value)` pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    /// One entry per concrete topic that was accepted by at least one node
    pub updates: Vec<StateUpdate>,
    /// Nodes whose wire message must be re-published
    pub nodes: BTreeSet<NodeId>,
}

impl AppliedChanges {
    fn merge(&mut self, other: AppliedChanges) {
        self.updates.extend(other.updates);
        self.nodes.extend(other.nodes);
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.nodes.is_empty()
    }
}

/// What a batch ended up announcing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Distinct topics in the WebSocket broadcast
    pub state_updates: usize,
    /// MQTT messages queued, one per changed node
    pub republished: usize,
    /// Pairs dropped because their translation failed
    pub dropped: usize,
}

/// Receiving ends of the coordinator's outbound queues
pub struct CoordinatorOutputs {
    /// Drained by the MQTT bridge
    pub mqtt_rx: mpsc::Receiver<MqttUpdate>,
    /// Drained by the WebSocket gateway; one entry per batch
    pub ws_rx: mpsc::Receiver<Vec<StateUpdate>>,
}

pub struct StateCoordinator {
    nodes: Mutex<Vec<Node>>,
    translation: Translation,
    kill_switch_topic: Option<String>,
    /// Serializes batches so announcements leave in apply order
    announce: tokio::sync::Mutex<()>,
    mqtt_tx: mpsc::Sender<MqttUpdate>,
    ws_tx: mpsc::Sender<Vec<StateUpdate>>,
}

impl StateCoordinator {
    pub fn new(
        nodes: Vec<Node>,
        translation: Translation,
        kill_switch_topic: Option<String>,
        queue_capacity: usize,
    ) -> (Self, CoordinatorOutputs) {
        let (mqtt_tx, mqtt_rx) = mpsc::channel(queue_capacity);
        let (ws_tx, ws_rx) = mpsc::channel(queue_capacity);

        let coordinator = Self {
            nodes: Mutex::new(nodes),
            translation,
            kill_switch_topic,
            announce: tokio::sync::Mutex::new(()),
            mqtt_tx,
            ws_tx,
        };

        (coordinator, CoordinatorOutputs { mqtt_rx, ws_rx })
    }

    pub fn from_config(config: &HubConfig) -> Result<(Self, CoordinatorOutputs)> {
        let nodes = build_nodes(&config.nodes)?;
        let translation = Translation::new(config.translation.clone());

        info!(
            "Coordinator managing {} nodes, {} translated topics",
            nodes.len(),
            translation.len()
        );

        Ok(Self::new(
            nodes,
            translation,
            config.kill_switch_topic.clone(),
            config.queue_capacity,
        ))
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Apply one value without announcing it.
    ///
    /// Fails with `RecursionExceeded` before touching any node if the topic
    /// expands too deep.
    pub fn apply_topic_value(&self, topic: &str, value: TopicValue) -> Result<AppliedChanges> {
        let mut nodes = self.nodes.lock();
        self.apply_locked(&mut nodes, topic, value)
    }

    fn apply_locked(
        &self,
        nodes: &mut [Node],
        topic: &str,
        value: TopicValue,
    ) -> Result<AppliedChanges> {
        if value == 0 && self.kill_switch_topic.as_deref() == Some(topic) {
            debug!("Kill switch {} triggered", topic);
            return Ok(Self::switch_off_all(nodes));
        }

        match self.translation.translate(topic)? {
            None => Ok(Self::apply_concrete(nodes, topic, value)),
            Some(expanded) => {
                let mut changes = AppliedChanges::default();
                for target in &expanded {
                    changes.merge(self.apply_locked(nodes, target, value)?);
                }
                Ok(changes)
            }
        }
    }

    fn apply_concrete(nodes: &mut [Node], topic: &str, value: TopicValue) -> AppliedChanges {
        let mut changes = AppliedChanges::default();

        for (index, node) in nodes.iter_mut().enumerate() {
            if node.set_state_for_topic(topic, value) {
                changes.nodes.insert(NodeId(index));
            }
        }

        if changes.nodes.is_empty() {
            debug!("No node mapped for topic {}", topic);
        } else {
            changes.updates.push(StateUpdate::new(topic, value));
        }
        changes
    }

    fn switch_off_all(nodes: &mut [Node]) -> AppliedChanges {
        let mut changes = AppliedChanges::default();

        for (index, node) in nodes.iter_mut().enumerate() {
            let inputs: Vec<String> = node.input_topics().map(str::to_string).collect();
            for input in inputs {
                node.set_state_for_topic(&input, 0);
                changes.updates.push(StateUpdate::new(input, 0));
            }
            changes.nodes.insert(NodeId(index));
        }
        changes
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Apply a whole batch, then announce it once.
    ///
    /// Exactly one MQTT message is queued per distinct changed node and one
    /// WebSocket batch carrying every update of the input. Pairs that fail to
    /// translate are logged and dropped; the rest of the batch still applies.
    pub async fn process_batch<I, S>(&self, pairs: I) -> BatchSummary
    where
        I: IntoIterator<Item = (S, TopicValue)>,
        S: AsRef<str>,
    {
        let _announce = self.announce.lock().await;

        let (updates, republish, dropped) = {
            let mut nodes = self.nodes.lock();
            let mut merged: BTreeMap<String, TopicValue> = BTreeMap::new();
            let mut changed: BTreeSet<NodeId> = BTreeSet::new();
            let mut dropped = 0;

            for (topic, value) in pairs {
                let topic = topic.as_ref();
                match self.apply_locked(&mut nodes, topic, value) {
                    Ok(changes) => {
                        for update in changes.updates {
                            merged.insert(update.topic, update.value);
                        }
                        changed.extend(changes.nodes);
                    }
                    Err(e) => {
                        warn!("Dropping update {} = {}: {}", topic, value, e);
                        dropped += 1;
                    }
                }
            }

            let republish: Vec<MqttUpdate> = changed
                .iter()
                .map(|id| {
                    let node = &nodes[id.0];
                    MqttUpdate::new(node.topic(), node.state_as_wire_message())
                })
                .collect();
            let updates: Vec<StateUpdate> = merged
                .into_iter()
                .map(|(topic, value)| StateUpdate { topic, value })
                .collect();

            (updates, republish, dropped)
        };

        let summary = BatchSummary {
            state_updates: updates.len(),
            republished: republish.len(),
            dropped,
        };

        for update in republish {
            if self.mqtt_tx.send(update).await.is_err() {
                debug!("MQTT queue closed, dropping republish");
                break;
            }
        }

        if !updates.is_empty() && self.ws_tx.send(updates).await.is_err() {
            debug!("WebSocket queue closed, dropping state update batch");
        }

        summary
    }

    /// Apply and announce a single value
    pub async fn update_topic(&self, topic: &str, value: TopicValue) -> BatchSummary {
        self.process_batch([(topic, value)]).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current value of every mapped topic of every node
    pub fn snapshot(&self) -> BTreeMap<String, TopicValue> {
        let nodes = self.nodes.lock();
        let mut snapshot = BTreeMap::new();
        for node in nodes.iter() {
            snapshot.extend(node.to_dict());
        }
        snapshot
    }

    /// Every topic the MQTT bridge has to subscribe to
    pub fn subscription_topics(&self) -> Vec<String> {
        let nodes = self.nodes.lock();
        let mut topics: BTreeSet<String> = self.translation.topics().into_iter().collect();
        for node in nodes.iter() {
            topics.extend(node.input_topics().map(str::to_string));
        }
        if let Some(kill) = &self.kill_switch_topic {
            topics.insert(kill.clone());
        }
        topics.into_iter().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.lock().len()
    }

    /// Copy of a node, for diagnostics
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.nodes.lock().get(id.0).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> (StateCoordinator, CoordinatorOutputs) {
        let node = Node::dfnode(
            "/esp/1",
            "e1",
            [("/haspa/licht/c".to_string(), 0), ("/haspa/licht/w".to_string(), 1)]
                .into_iter()
                .collect(),
        )
        .unwrap();
        let translation = Translation::new(
            [(
                "/haspa/licht".to_string(),
                vec!["/haspa/licht/c".to_string(), "/haspa/licht/w".to_string()],
            )]
            .into_iter()
            .collect(),
        );
        StateCoordinator::new(vec![node], translation, Some("/haspa/licht".into()), 16)
    }

    #[test]
    fn test_apply_concrete_topic() {
        let (coordinator, _outputs) = coordinator();
        let changes = coordinator.apply_topic_value("/haspa/licht/w", 300).unwrap();

        assert_eq!(changes.updates, vec![StateUpdate::new("/haspa/licht/w", 300)]);
        assert_eq!(changes.nodes.len(), 1);
        assert_eq!(coordinator.snapshot()["/haspa/licht/w"], 300);
    }

    #[test]
    fn test_apply_unknown_topic_changes_nothing() {
        let (coordinator, _outputs) = coordinator();
        let changes = coordinator.apply_topic_value("/haspa/nothing", 1).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn test_subscription_topics() {
        let (coordinator, _outputs) = coordinator();
        assert_eq!(
            coordinator.subscription_topics(),
            vec!["/haspa/licht", "/haspa/licht/c", "/haspa/licht/w"]
        );
    }
}
