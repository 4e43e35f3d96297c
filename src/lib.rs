//! Device Shadow client
//!
//! An async client for a cloud IoT device-shadow service carried over MQTT.
//! A shadow is a server-hosted JSON document describing a device's reported
//! and desired state. This crate lets a device publish reported state, fetch
//! or delete its shadow, and react to desired-state deltas pushed by the
//! cloud, with every operation correlated over a fixed family of topics by a
//! client-generated request id.
//!
//! # Quick Start
//!
//! ```no_run
//! use device_shadow::{ShadowAck, ShadowClient, ShadowConfig};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), device_shadow::ShadowError> {
//! let config = ShadowConfig::new("mqtt://broker.example.com:1883");
//! let mut client = ShadowClient::new("dev1", config).await?;
//! client.connect().await?;
//!
//! // React to desired-state changes for one property.
//! client.register_delta(Some("brightness"), |_key, value| {
//!     println!("cloud wants brightness {value}");
//!     Ok(())
//! })?;
//!
//! // Report state; the callback fires exactly once.
//! client
//!     .update(json!({"power": "on"}), 5, |action, ack| match ack {
//!         ShadowAck::Accepted { .. } => println!("{action} accepted"),
//!         ShadowAck::Rejected { code, message } => eprintln!("{action} rejected: {code} {message}"),
//!         ShadowAck::Timeout => eprintln!("{action} timed out"),
//!     })
//!     .await?;
//!
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Concurrency
//!
//! Request callbacks run on the client's dispatcher task (replies) or the
//! process-wide reaper thread (timeouts); delta handlers run on the
//! dispatcher task, serially, in registration order. Callbacks must not call
//! back into blocking operations on the same client.

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod shadow;
pub mod testing;
pub mod transport;

pub use config::ShadowConfig;
pub use error::{ShadowError, ShadowResult};
pub use protocol::{DeltaRejection, ShadowAck, ShadowAction, TopicContract};
pub use shadow::{SessionState, ShadowClient};
pub use transport::{MqttTransport, QosLevel, ShadowTransport, TransportEvent};
