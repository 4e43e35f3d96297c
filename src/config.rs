//! Client configuration
//!
//! Configuration is loaded from a TOML file or built in code. Broker
//! credentials are never stored inline; the config names environment
//! variables and the values are resolved at connect time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration for a shadow client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShadowConfig {
    /// Broker URL with scheme and optional port (`mqtt://` or `mqtts://`)
    pub broker_url: String,
    /// Environment variable containing the broker username
    pub username_env: Option<String>,
    /// Environment variable containing the broker password
    pub password_env: Option<String>,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// How long `connect` waits for the session to become ready
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// How long the dispatcher waits for the subscription set to be confirmed
    #[serde(default = "default_subscribe_timeout_secs")]
    pub subscribe_timeout_secs: u64,
    /// QoS for both publishes and subscriptions (0, 1 or 2)
    #[serde(default = "default_qos")]
    pub qos: u8,
    /// Process-wide bound on live clients
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Admission-control bound on uncompleted requests per client
    #[serde(default = "default_max_in_flight_messages")]
    pub max_in_flight_messages: usize,
    /// Bound on registered delta handlers per client
    #[serde(default = "default_max_delta_handlers")]
    pub max_delta_handlers: usize,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_subscribe_timeout_secs() -> u64 {
    10
}

fn default_qos() -> u8 {
    1
}

fn default_max_clients() -> usize {
    16
}

fn default_max_in_flight_messages() -> usize {
    64
}

fn default_max_delta_handlers() -> usize {
    32
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid QoS {0}: must be 0, 1 or 2")]
    InvalidQos(u8),
    #[error("{0} must be greater than zero")]
    ZeroCapacity(&'static str),
}

impl ShadowConfig {
    /// Build a config with defaults for everything but the broker URL.
    pub fn new<S: Into<String>>(broker_url: S) -> Self {
        Self {
            broker_url: broker_url.into(),
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            subscribe_timeout_secs: default_subscribe_timeout_secs(),
            qos: default_qos(),
            max_clients: default_max_clients(),
            max_in_flight_messages: default_max_in_flight_messages(),
            max_delta_handlers: default_max_delta_handlers(),
        }
    }

    /// Load configuration from a TOML file and validate it.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: ShadowConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate knobs that serde cannot check on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.qos > 2 {
            return Err(ConfigError::InvalidQos(self.qos));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroCapacity("max_clients"));
        }
        if self.max_in_flight_messages == 0 {
            return Err(ConfigError::ZeroCapacity("max_in_flight_messages"));
        }
        if self.max_delta_handlers == 0 {
            return Err(ConfigError::ZeroCapacity("max_delta_handlers"));
        }
        Ok(())
    }

    /// Resolve the broker username from its environment variable, if configured.
    pub fn username(&self) -> Option<String> {
        resolve_env(self.username_env.as_ref())
    }

    /// Resolve the broker password from its environment variable, if configured.
    pub fn password(&self) -> Option<String> {
        resolve_env(self.password_env.as_ref())
    }
}

fn resolve_env(name: Option<&String>) -> Option<String> {
    name.and_then(|n| std::env::var(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ShadowConfig::new("mqtt://localhost:1883");
        assert_eq!(config.keep_alive_secs, 60);
        assert_eq!(config.connect_timeout_secs, 30);
        assert_eq!(config.subscribe_timeout_secs, 10);
        assert_eq!(config.qos, 1);
        assert_eq!(config.max_clients, 16);
        assert_eq!(config.max_in_flight_messages, 64);
        assert_eq!(config.max_delta_handlers, 32);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_minimal_toml() {
        let toml_content = r#"
broker_url = "mqtt://localhost:1883"
"#;
        let config: ShadowConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.broker_url, "mqtt://localhost:1883");
        assert_eq!(config.qos, 1);
        assert!(config.username_env.is_none());
    }

    #[test]
    fn test_full_toml() {
        let toml_content = r#"
broker_url = "mqtts://broker.example.com:8883"
username_env = "SHADOW_USERNAME"
password_env = "SHADOW_PASSWORD"
keep_alive_secs = 30
connect_timeout_secs = 15
subscribe_timeout_secs = 5
qos = 2
max_clients = 4
max_in_flight_messages = 8
max_delta_handlers = 4
"#;
        let config: ShadowConfig = toml::from_str(toml_content).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.qos, 2);
        assert_eq!(config.max_in_flight_messages, 8);
        assert_eq!(config.username_env.as_deref(), Some("SHADOW_USERNAME"));
    }

    #[test]
    fn test_invalid_qos_rejected() {
        let mut config = ShadowConfig::new("mqtt://localhost:1883");
        config.qos = 3;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidQos(3))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = ShadowConfig::new("mqtt://localhost:1883");
        config.max_in_flight_messages = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroCapacity("max_in_flight_messages"))
        ));
    }

    #[test]
    fn test_credentials_resolved_from_env() {
        unsafe {
            std::env::set_var("SHADOW_TEST_USER", "device-1");
            std::env::set_var("SHADOW_TEST_PASS", "hunter2");
        }

        let mut config = ShadowConfig::new("mqtt://localhost:1883");
        config.username_env = Some("SHADOW_TEST_USER".to_string());
        config.password_env = Some("SHADOW_TEST_PASS".to_string());

        assert_eq!(config.username().as_deref(), Some("device-1"));
        assert_eq!(config.password().as_deref(), Some("hunter2"));

        unsafe {
            std::env::remove_var("SHADOW_TEST_USER");
            std::env::remove_var("SHADOW_TEST_PASS");
        }
    }

    #[test]
    fn test_unset_env_resolves_to_none() {
        let mut config = ShadowConfig::new("mqtt://localhost:1883");
        config.username_env = Some("SHADOW_TEST_MISSING_VAR".to_string());
        assert!(config.username().is_none());
    }
}
