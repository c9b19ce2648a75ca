//! MQTT bridge
//!
//! Two loops share one [`AsyncClient`]:
//! - the event loop polls the broker connection, (re)subscribes on every
//!   ConnAck and feeds validated integer publishes into the coordinator
//! - the drain loop turns queued [`MqttUpdate`]s into QoS 0 publishes
//!
//! The drain only ever uses `try_publish`, so a full request queue drops an
//! update instead of blocking the coordinator while the event loop is busy
//! inside it.

use hbf_core::{BatchSummary, Error as CoreError, MqttConfig, MqttUpdate, StateCoordinator, TopicValue};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS, SubscribeFilter};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{BridgeError, Result};
use crate::events::BridgeEvent;

/// Requests the client may queue before `try_publish` starts dropping
const REQUEST_CAPACITY: usize = 100;

/// Parse an inbound MQTT payload as a non-negative base-10 integer.
///
/// Only ASCII digits are accepted: no sign, no whitespace.
pub fn parse_payload(topic: &str, payload: &[u8]) -> hbf_core::Result<TopicValue> {
    let text = std::str::from_utf8(payload).map_err(|_| CoreError::Validation {
        topic: topic.to_string(),
        reason: "payload is not UTF-8".to_string(),
    })?;

    let invalid = || CoreError::Validation {
        topic: topic.to_string(),
        reason: format!("{:?} is not a non-negative integer", text),
    };

    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    text.parse::<TopicValue>().map_err(|_| invalid())
}

/// MQTT side of the hub
pub struct MqttBridge {
    config: MqttConfig,
    coordinator: Arc<StateCoordinator>,
    client: AsyncClient,
    eventloop: EventLoop,
    events: mpsc::Sender<BridgeEvent>,
}

impl MqttBridge {
    /// Create the bridge; nothing connects until [`run`](Self::run) is polled.
    pub fn new(
        config: MqttConfig,
        coordinator: Arc<StateCoordinator>,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs as u64));

        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (events, events_rx) = mpsc::channel(16);

        let bridge = Self {
            config,
            coordinator,
            client,
            eventloop,
            events,
        };
        (bridge, events_rx)
    }

    /// Run the event loop and the drain loop until `cancel` fires.
    ///
    /// Updates still queued in `updates` at that point are dropped.
    pub async fn run(self, updates: mpsc::Receiver<MqttUpdate>, cancel: CancellationToken) {
        info!(
            "MQTT bridge connecting to {}:{}",
            self.config.host, self.config.port
        );

        let drain = drain_updates(self.client.clone(), updates, cancel.clone());
        let poll = poll_broker(
            self.eventloop,
            self.client,
            self.coordinator,
            self.events,
            Duration::from_secs(self.config.reconnect_delay_secs),
            cancel,
        );

        tokio::join!(poll, drain);
        info!("MQTT bridge stopped");
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Validate one inbound publish and hand it to the coordinator
pub async fn handle_publish(
    coordinator: &StateCoordinator,
    topic: &str,
    payload: &[u8],
) -> Result<BatchSummary> {
    let value = parse_payload(topic, payload)?;
    debug!("MQTT received {} = {}", topic, value);
    Ok(coordinator.update_topic(topic, value).await)
}

fn subscribe_all(client: &AsyncClient, topics: Vec<String>) -> Result<()> {
    if topics.is_empty() {
        warn!("No topics to subscribe to");
        return Ok(());
    }

    let count = topics.len();
    let filters = topics
        .into_iter()
        .map(|topic| SubscribeFilter::new(topic, QoS::AtMostOnce));

    client
        .try_subscribe_many(filters)
        .map_err(|e| BridgeError::Subscribe(e.to_string()))?;

    debug!("MQTT subscribing to {} topics", count);
    Ok(())
}

async fn poll_broker(
    mut eventloop: EventLoop,
    client: AsyncClient,
    coordinator: Arc<StateCoordinator>,
    events: mpsc::Sender<BridgeEvent>,
    reconnect_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!("MQTT connected to broker");
                if let Err(e) = subscribe_all(&client, coordinator.subscription_topics()) {
                    error!("MQTT {}", e);
                }
                let _ = events.try_send(BridgeEvent::Connected);
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if let Err(e) = handle_publish(&coordinator, &publish.topic, &publish.payload).await {
                    warn!("Dropping MQTT message: {}", e);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                warn!("MQTT disconnected by broker");
                let _ = events.try_send(BridgeEvent::Disconnected {
                    reason: Some("broker disconnect".to_string()),
                });
            }
            Ok(_) => {}
            Err(e) => {
                let e = BridgeError::from(e);
                error!("MQTT {}, retrying in {:?}", e, reconnect_delay);
                let _ = events.try_send(BridgeEvent::Disconnected {
                    reason: Some(e.to_string()),
                });

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(reconnect_delay) => {}
                }
            }
        }
    }

    let _ = client.try_disconnect();
}

// =============================================================================
// Outbound
// =============================================================================

/// Publish one update without waiting on the event loop
pub fn publish_update(client: &AsyncClient, update: MqttUpdate) -> Result<()> {
    debug!("MQTT publish {} <- {}", update.topic, update.payload);
    client
        .try_publish(update.topic, QoS::AtMostOnce, false, update.payload.into_bytes())
        .map_err(BridgeError::from)
}

async fn drain_updates(
    client: AsyncClient,
    mut updates: mpsc::Receiver<MqttUpdate>,
    cancel: CancellationToken,
) {
    loop {
        let update = tokio::select! {
            _ = cancel.cancelled() => break,
            update = updates.recv() => match update {
                Some(update) => update,
                None => break,
            },
        };

        if let Err(e) = publish_update(&client, update) {
            error!("MQTT {}", e);
        }
    }

    debug!("MQTT drain loop finished");
}
