//! MQTT output plugin.
//!
//! Publishes measurements to `{prefix}/person{id}/weight` and, when body
//! composition is present, `{prefix}/person{id}/body`, as JSON payloads.
//! The underlying client maintains the broker connection in a background
//! task and queues publishes while reconnecting.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use tracing::{debug, info, trace, warn};

use crate::config::MqttConfig;
use crate::data::Measurement;
use crate::plugins::{Plugin, PluginError};

/// Client identifier presented to the broker.
const CLIENT_ID: &str = "medisana-rust-ble";

/// Capacity of the client's outgoing request queue.
const REQUEST_QUEUE_CAPACITY: usize = 32;

/// MQTT sink for decoded measurements.
pub struct MqttPlugin {
    client: AsyncClient,
    prefix: String,
    retain: bool,
    qos: QoS,
}

impl MqttPlugin {
    /// Create the plugin and start its broker connection task.
    pub fn new(config: MqttConfig) -> Self {
        let mut options = MqttOptions::new(CLIENT_ID, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);

        info!(
            "MQTT plugin connecting to {}:{} (prefix {})",
            config.host, config.port, config.prefix
        );

        // The event loop drives connection, keep-alive and reconnects;
        // polling it is what makes the client make progress.
        tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(event) => trace!("MQTT event: {:?}", event),
                    Err(e) => {
                        warn!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        });

        Self {
            client,
            prefix: config.prefix,
            retain: config.retain,
            qos: qos_from_level(config.qos),
        }
    }

    async fn publish_json(
        &self,
        topic: String,
        payload: serde_json::Value,
    ) -> Result<(), PluginError> {
        debug!("Publishing to {}", topic);

        self.client
            .publish(topic, self.qos, self.retain, payload.to_string())
            .await?;

        Ok(())
    }
}

#[async_trait]
impl Plugin for MqttPlugin {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn publish(&self, measurement: &Measurement) -> Result<(), PluginError> {
        let weight_topic = format!("{}/person{}/weight", self.prefix, measurement.person);
        let weight_payload = json!({
            "person": measurement.person,
            "timestamp": measurement.timestamp,
            "weight": measurement.weight_kg,
            "stabilized": measurement.stabilized,
            "bmi": measurement.bmi,
        });

        self.publish_json(weight_topic, weight_payload).await?;

        if measurement.has_body_composition() {
            let body_topic = format!("{}/person{}/body", self.prefix, measurement.person);
            let body_payload = json!({
                "person": measurement.person,
                "timestamp": measurement.timestamp,
                "kcal": measurement.kcal,
                "fat": measurement.fat_percent,
                "tbw": measurement.water_percent,
                "muscle": measurement.muscle_percent,
                "bone": measurement.bone_kg,
            });

            self.publish_json(body_topic, body_payload).await?;
        }

        Ok(())
    }
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        other => {
            warn!("Invalid MQTT QoS {}, falling back to 0", other);
            QoS::AtMostOnce
        }
    }
}
