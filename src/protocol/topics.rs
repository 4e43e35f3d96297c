//! Shadow topic contract and device name validation
//!
//! All shadow traffic for a device flows over eleven fixed topics under
//! `baidu/iot/shadow/<deviceName>/`. The contract computes them once at
//! client creation so the dispatcher classifies inbound topics against
//! immutable strings instead of composing them per message.

use crate::protocol::messages::ShadowAction;
use thiserror::Error;

/// Topic namespace every shadow topic lives under.
pub const TOPIC_PREFIX: &str = "baidu/iot/shadow";

/// Number of topics subscribed to at connect time.
pub const SUBSCRIPTION_COUNT: usize = 7;

/// The eleven topics used to talk to a single device's shadow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicContract {
    pub update: String,
    pub update_accepted: String,
    pub update_rejected: String,
    pub get: String,
    pub get_accepted: String,
    pub get_rejected: String,
    pub delete: String,
    pub delete_accepted: String,
    pub delete_rejected: String,
    pub delta: String,
    pub delta_rejected: String,
}

/// Where an inbound message should be routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundRoute {
    /// Desired-state delta pushed by the cloud
    Delta,
    /// Reply to a correlated request
    Reply {
        action: ShadowAction,
        rejected: bool,
    },
}

impl TopicContract {
    /// Derive the topic family for a device.
    pub fn new(device_name: &str) -> Self {
        let base = format!("{TOPIC_PREFIX}/{device_name}");
        Self {
            update: format!("{base}/update"),
            update_accepted: format!("{base}/update/accepted"),
            update_rejected: format!("{base}/update/rejected"),
            get: format!("{base}/get"),
            get_accepted: format!("{base}/get/accepted"),
            get_rejected: format!("{base}/get/rejected"),
            delete: format!("{base}/delete"),
            delete_accepted: format!("{base}/delete/accepted"),
            delete_rejected: format!("{base}/delete/rejected"),
            delta: format!("{base}/delta"),
            delta_rejected: format!("{base}/delta/rejected"),
        }
    }

    /// The seven topics subscribed to at connect time: every accepted and
    /// rejected reply topic plus `delta`.
    pub fn subscriptions(&self) -> [&str; SUBSCRIPTION_COUNT] {
        [
            &self.update_accepted,
            &self.update_rejected,
            &self.get_accepted,
            &self.get_rejected,
            &self.delete_accepted,
            &self.delete_rejected,
            &self.delta,
        ]
    }

    /// Topic a request for `action` is published on.
    pub fn publish_topic(&self, action: ShadowAction) -> &str {
        match action {
            ShadowAction::Update => &self.update,
            ShadowAction::Get => &self.get,
            ShadowAction::Delete => &self.delete,
        }
    }

    /// Classify an inbound topic.
    ///
    /// Matching is case-insensitive prefix matching, longest contract topic
    /// first, so `…/update/accepted` never routes as a bare `…/update`.
    /// Topics outside the contract return `None`.
    pub fn classify(&self, topic: &str) -> Option<InboundRoute> {
        use ShadowAction::{Delete, Get, Update};

        let replies: [(&str, ShadowAction, bool); 6] = [
            (&self.update_accepted, Update, false),
            (&self.update_rejected, Update, true),
            (&self.get_accepted, Get, false),
            (&self.get_rejected, Get, true),
            (&self.delete_accepted, Delete, false),
            (&self.delete_rejected, Delete, true),
        ];
        for (known, action, rejected) in replies {
            if topic_matches(known, topic) {
                return Some(InboundRoute::Reply { action, rejected });
            }
        }
        if topic_matches(&self.delta, topic) {
            return Some(InboundRoute::Delta);
        }
        None
    }
}

/// Case-insensitive prefix match of an inbound topic against a contract topic.
/// Compared as bytes; an inbound topic is attacker-controlled and need not be
/// well-formed UTF-8 at any particular boundary.
fn topic_matches(known: &str, topic: &str) -> bool {
    let (known, topic) = (known.as_bytes(), topic.as_bytes());
    topic.len() >= known.len() && topic[..known.len()].eq_ignore_ascii_case(known)
}

/// Device name validation errors
#[derive(Debug, Error, PartialEq)]
pub enum DeviceNameError {
    #[error("device name cannot be empty")]
    Empty,
    #[error("device name contains invalid character: '{0}'")]
    InvalidChar(char),
}

/// Validate a device name.
///
/// The name is embedded in topic strings and doubles as the MQTT client id,
/// so it is restricted to `[a-zA-Z0-9._-]`.
pub fn validate_device_name(name: &str) -> Result<(), DeviceNameError> {
    if name.is_empty() {
        return Err(DeviceNameError::Empty);
    }
    for ch in name.chars() {
        if !ch.is_ascii_alphanumeric() && ch != '.' && ch != '_' && ch != '-' {
            return Err(DeviceNameError::InvalidChar(ch));
        }
    }
    Ok(())
}
