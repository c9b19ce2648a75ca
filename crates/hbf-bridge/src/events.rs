//! Bridge status events

/// Broker connection status, reported for logging
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// ConnAck received, subscriptions requested
    Connected,
    /// Broker connection lost or closed
    Disconnected { reason: Option<String> },
}
