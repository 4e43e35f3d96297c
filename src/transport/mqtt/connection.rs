//! Connection configuration for the MQTT transport
//!
//! Pure helpers: broker URL parsing, rumqttc option construction and the
//! reconnect backoff schedule. Everything here is testable without a broker.

use crate::config::ShadowConfig;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttTransportError {
    #[error("invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Backoff schedule for automatic reconnection.
///
/// Attempts walk the pattern, then stay at `sustained_delay`. Reconnection
/// never gives up; a shadow client rides out broker outages and lets
/// individual requests time out instead.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay pattern in milliseconds for the first attempts
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay in milliseconds for a 1-based attempt number.
    pub fn backoff_delay(&self, attempt: u32) -> u64 {
        let index = attempt.saturating_sub(1) as usize;
        match self.backoff_pattern.get(index) {
            Some(delay) => *delay,
            None => self.sustained_delay,
        }
    }
}

/// Build rumqttc options from the client config.
///
/// The device name is the MQTT client id; the cloud identifies a device's
/// session by it. Credentials are resolved from the environment variables
/// named in the config at call time.
pub fn configure_mqtt_options(
    device_name: &str,
    config: &ShadowConfig,
) -> Result<MqttOptions, MqttTransportError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttTransportError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttTransportError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let mut mqtt_options = MqttOptions::new(device_name, host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(true);

    Ok(mqtt_options)
}
