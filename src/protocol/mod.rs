//! Shadow protocol definitions
//!
//! The topic contract for a device and the JSON payloads exchanged on it.

pub mod messages;
pub mod topics;

pub use messages::{
    ActionRequest, DeltaMessage, DeltaRejectedMessage, DeltaRejection, Rejection, ShadowAck,
    ShadowAction, UpdateRequest,
};
pub use topics::{validate_device_name, InboundRoute, TopicContract, TOPIC_PREFIX};
