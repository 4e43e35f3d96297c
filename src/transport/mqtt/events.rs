//! Pure routing of rumqttc events
//!
//! Maps the broker event stream onto the few transitions the shadow engine
//! cares about. Keeping this a pure function makes the supervisor loop in
//! `client` a thin I/O shell.

use rumqttc::v5::Event;

/// Routing decision for one broker event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck received; the session is usable.
    ConnectionAcknowledged,
    /// Inbound message on a subscribed topic.
    MessageReceived { topic: String, payload: Vec<u8> },
    /// The broker closed the connection.
    Disconnected,
    /// Anything else (SubAck, PingResp, outgoing traffic): no engine action.
    Ignored,
}

/// Classify a broker event.
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(incoming) => {
            use rumqttc::v5::mqttbytes::v5::Packet;
            match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived {
                    topic: String::from_utf8_lossy(&publish.topic).to_string(),
                    payload: publish.payload.to_vec(),
                },
                Packet::Disconnect(_) => EventRoute::Disconnected,
                _ => EventRoute::Ignored,
            }
        }
        Event::Outgoing(_) => EventRoute::Ignored,
    }
}
