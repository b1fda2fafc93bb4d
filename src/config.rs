//! Configuration model.
//!
//! The bridge reads a TOML file naming the scales to service, the plugins
//! to activate, and per-plugin settings:
//!
//! ```toml
//! level = "info"
//! plugins = ["mqtt"]
//!
//! [[devices]]
//! mac_address = "E4:12:09:6B:2F:51"
//! alias = "bathroom"
//!
//! [[persons]]
//! slot = 1
//! height_cm = 180.0
//!
//! [mqtt]
//! host = "broker.local"
//! prefix = "medisana/bs440"
//! retain = true
//! qos = 1
//! ```
//!
//! Anything beyond deserialization defaults is the operator's problem;
//! semantic validation of broker reachability and the like happens where
//! the values are used.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration for the bridge process.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Scales to service.
    pub devices: Vec<DeviceConfig>,

    /// Log verbosity, an `EnvFilter` directive ("info", "debug", ...).
    #[serde(default = "default_level")]
    pub level: String,

    /// Names of the plugins to activate, in configuration order.
    #[serde(default)]
    pub plugins: Vec<String>,

    /// Person slots with a known height, for BMI.
    #[serde(default)]
    pub persons: Vec<PersonConfig>,

    /// MQTT plugin settings.
    pub mqtt: Option<MqttConfig>,

    /// CSV plugin settings.
    pub csv: Option<CsvConfig>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            context: format!("cannot read {}: {}", path.display(), e),
        })?;

        let config: Config = toml::from_str(&raw).map_err(|e| Error::Config {
            context: format!("cannot parse {}: {}", path.display(), e),
        })?;

        if config.devices.is_empty() {
            return Err(Error::Config {
                context: "no devices configured".to_string(),
            });
        }

        Ok(config)
    }

    /// Configured heights by person slot.
    pub fn person_heights(&self) -> HashMap<u8, f64> {
        self.persons
            .iter()
            .map(|p| (p.slot, p.height_cm))
            .collect()
    }
}

/// One scale to service.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// BLE MAC address of the scale.
    pub mac_address: String,

    /// Friendly name for logs.
    #[serde(default)]
    pub alias: Option<String>,
}

impl DeviceConfig {
    /// The name used for this device in logs.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.mac_address)
    }
}

/// Height configuration for one person slot.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonConfig {
    /// Person slot on the scale (1-8).
    pub slot: u8,
    /// Height in centimeters.
    pub height_cm: f64,
}

/// MQTT plugin settings.
#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    /// Broker hostname.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    /// Username, if the broker requires authentication.
    #[serde(default)]
    pub username: Option<String>,

    /// Password, if the broker requires authentication.
    #[serde(default)]
    pub password: Option<String>,

    /// Topic prefix for published measurements.
    #[serde(default = "default_mqtt_prefix")]
    pub prefix: String,

    /// Whether to publish with the retain flag set.
    #[serde(default = "default_mqtt_retain")]
    pub retain: bool,

    /// Quality of service level (0, 1 or 2).
    #[serde(default)]
    pub qos: u8,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            prefix: default_mqtt_prefix(),
            retain: default_mqtt_retain(),
            qos: 0,
        }
    }
}

/// CSV plugin settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CsvConfig {
    /// File measurements are appended to.
    pub path: PathBuf,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_prefix() -> String {
    "medisana/bs440".to_string()
}

fn default_mqtt_retain() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [[devices]]
            mac_address = "E4:12:09:6B:2F:51"
            "#,
        )
        .unwrap();

        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.level, "info");
        assert!(config.plugins.is_empty());
        assert!(config.mqtt.is_none());
    }

    #[test]
    fn test_full_config() {
        let config: Config = toml::from_str(
            r#"
            level = "debug"
            plugins = ["mqtt", "csv"]

            [[devices]]
            mac_address = "E4:12:09:6B:2F:51"
            alias = "bathroom"

            [[devices]]
            mac_address = "C0:26:DF:00:11:22"

            [[persons]]
            slot = 1
            height_cm = 180.0

            [mqtt]
            host = "broker.local"
            port = 8883
            username = "scale"
            password = "secret"
            qos = 1
            retain = false

            [csv]
            path = "/var/lib/scale/measurements.csv"
            "#,
        )
        .unwrap();

        assert_eq!(config.devices[0].display_name(), "bathroom");
        assert_eq!(config.devices[1].display_name(), "C0:26:DF:00:11:22");
        assert_eq!(config.plugins, vec!["mqtt", "csv"]);
        assert_eq!(config.person_heights().get(&1), Some(&180.0));

        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.host, "broker.local");
        assert_eq!(mqtt.port, 8883);
        assert_eq!(mqtt.qos, 1);
        assert!(!mqtt.retain);
    }

    #[test]
    fn test_mqtt_defaults() {
        let mqtt = MqttConfig::default();
        assert_eq!(mqtt.host, "localhost");
        assert_eq!(mqtt.port, 1883);
        assert_eq!(mqtt.prefix, "medisana/bs440");
        assert!(mqtt.retain);
        assert_eq!(mqtt.qos, 0);
    }
}
