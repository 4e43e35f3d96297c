//! MQTT transport built on rumqttc
//!
//! Split the way the rest of the crate is: pure pieces ([`connection`] for
//! option building and backoff, [`events`] for event classification) and the
//! I/O shell ([`client`]) that ties them to a live broker session.

pub mod client;
pub mod connection;
pub mod events;

pub use client::MqttTransport;
pub use connection::{configure_mqtt_options, MqttTransportError, ReconnectConfig};
pub use events::{route_event, EventRoute};
