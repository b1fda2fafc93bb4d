//! Output plugins.
//!
//! A plugin is an output sink for decoded measurements. Sinks implement
//! the single [`Plugin`] capability; the dispatcher and the protocol
//! layers never change when a new sink type is added. Plugins are
//! selected by name at startup through [`build_plugins`], a static
//! registry, no runtime module loading.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::config::Config;
use crate::data::Measurement;
use crate::error::{Error, Result};

pub mod csv;
pub mod dispatcher;
pub mod mqtt;

pub use csv::CsvPlugin;
pub use dispatcher::PluginDispatcher;
pub use mqtt::MqttPlugin;

/// Errors produced by a plugin's publish operation.
///
/// Always isolated: a failing plugin is logged and the remaining plugins
/// still receive the measurement.
#[derive(Error, Debug)]
pub enum PluginError {
    /// The MQTT client rejected the publish.
    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The measurement could not be serialized.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Any other sink-specific failure.
    #[error("{0}")]
    Other(String),
}

/// The output-sink capability.
///
/// Implementations are shared across all device sessions and must accept
/// concurrent `publish` calls.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs and the configuration's `plugins` list.
    fn name(&self) -> &'static str;

    /// Deliver one measurement to the sink.
    async fn publish(&self, measurement: &Measurement) -> std::result::Result<(), PluginError>;
}

/// Instantiate the plugins named in the configuration.
///
/// Unknown plugin names and missing plugin sections are configuration
/// errors; an empty `plugins` list is allowed (measurements are decoded
/// and logged but go nowhere).
pub fn build_plugins(config: &Config) -> Result<Vec<Arc<dyn Plugin>>> {
    let mut plugins: Vec<Arc<dyn Plugin>> = Vec::with_capacity(config.plugins.len());

    for name in &config.plugins {
        let plugin: Arc<dyn Plugin> = match name.as_str() {
            "mqtt" => {
                let mqtt_config = config.mqtt.clone().unwrap_or_default();
                Arc::new(MqttPlugin::new(mqtt_config))
            }
            "csv" => {
                let csv_config = config.csv.clone().ok_or_else(|| Error::Config {
                    context: "csv plugin enabled but [csv] section missing".to_string(),
                })?;
                Arc::new(CsvPlugin::new(csv_config))
            }
            other => {
                return Err(Error::Config {
                    context: format!("unknown plugin: {}", other),
                })
            }
        };

        info!("Loaded plugin: {}", plugin.name());
        plugins.push(plugin);
    }

    Ok(plugins)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_plugins(plugins: &[&str]) -> Config {
        let toml = format!(
            r#"
            plugins = [{}]

            [[devices]]
            mac_address = "E4:12:09:6B:2F:51"

            [csv]
            path = "/tmp/measurements.csv"
            "#,
            plugins
                .iter()
                .map(|p| format!("\"{}\"", p))
                .collect::<Vec<_>>()
                .join(", ")
        );
        toml::from_str(&toml).unwrap()
    }

    // The MQTT plugin spawns its connection task at construction, so the
    // registry tests need a runtime.
    #[tokio::test]
    async fn test_registry_builds_known_plugins() {
        let plugins = build_plugins(&config_with_plugins(&["mqtt", "csv"])).unwrap();
        assert_eq!(plugins.len(), 2);
        assert_eq!(plugins[0].name(), "mqtt");
        assert_eq!(plugins[1].name(), "csv");
    }

    #[test]
    fn test_registry_rejects_unknown_plugin() {
        let err = match build_plugins(&config_with_plugins(&["googlefit"])) {
            Ok(_) => panic!("expected build_plugins to reject unknown plugin"),
            Err(e) => e,
        };
        assert!(err.is_fatal_configuration());
    }

    #[test]
    fn test_empty_plugin_list_is_allowed() {
        let plugins = build_plugins(&config_with_plugins(&[])).unwrap();
        assert!(plugins.is_empty());
    }
}
