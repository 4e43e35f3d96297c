//! Transport layer for shadow traffic
//!
//! The engine is transport-agnostic: anything that can connect, subscribe,
//! publish and deliver inbound events through a channel can carry the shadow
//! protocol. The MQTT implementation lives in [`mqtt`]; tests run against an
//! in-memory implementation.

use tokio::sync::mpsc;

pub mod mqtt;

/// Delivery guarantee for publishes and subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    /// Map a config value (0, 1, 2) to a QoS level.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QosLevel::AtMostOnce),
            1 => Some(QosLevel::AtLeastOnce),
            2 => Some(QosLevel::ExactlyOnce),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

/// Events a transport delivers to the engine's dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The broker acknowledged the connection. Re-delivered after every
    /// successful reconnect so the engine can re-establish subscriptions.
    Connected,
    /// The connection dropped; the transport keeps reconnecting on its own.
    ConnectionLost { reason: String },
    /// An inbound message on a subscribed topic.
    Message { topic: String, payload: Vec<u8> },
}

/// Contract a transport must fulfil to carry the shadow protocol.
///
/// Implementations own connection management, including automatic reconnect.
/// Inbound traffic and connection transitions flow through the channel handed
/// over in [`set_event_sender`](ShadowTransport::set_event_sender); the engine
/// never polls the transport.
#[async_trait::async_trait]
pub trait ShadowTransport: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Hand the transport the sender half of the engine's event channel.
    /// Must be called before `connect`.
    fn set_event_sender(&self, sender: mpsc::Sender<TransportEvent>);

    /// Begin connecting to the broker. Completion is signalled with a
    /// [`TransportEvent::Connected`] event, not by this call returning.
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Disconnect and stop reconnecting.
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Subscribe to a set of topics at the given QoS.
    async fn subscribe_many(&self, topics: &[String], qos: QosLevel) -> Result<(), Self::Error>;

    /// Publish a payload to a topic at the given QoS.
    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QosLevel)
    -> Result<(), Self::Error>;
}

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::MqttTransport;
