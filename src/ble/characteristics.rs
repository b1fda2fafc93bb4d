//! GATT characteristic handling.
//!
//! Provides functionality for reading, writing, and subscribing to BLE
//! characteristics on a connected scale, and fans incoming indications
//! into a broadcast channel the session loop consumes.

use btleplug::api::{Characteristic, Peripheral as _, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::ble::uuids::*;
use crate::error::{Error, Result};

/// Notification event from a characteristic.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    /// UUID of the characteristic that sent the notification.
    pub characteristic_uuid: Uuid,
    /// The notification data.
    pub data: Vec<u8>,
}

/// Handler for GATT characteristics on a connected scale.
pub struct CharacteristicHandler {
    /// The peripheral to communicate with.
    peripheral: Peripheral,
    /// Cached characteristics by UUID.
    characteristics: Arc<RwLock<HashMap<Uuid, Characteristic>>>,
    /// Channel for notification events.
    notification_tx: broadcast::Sender<NotificationEvent>,
    /// Whether we're currently listening for notifications.
    is_listening: Arc<RwLock<bool>>,
    /// Handle to the notification listener task.
    listener_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl CharacteristicHandler {
    /// Create a new characteristic handler for a peripheral.
    ///
    /// Note: Services must be discovered before using this handler.
    pub fn new(peripheral: Peripheral) -> Self {
        let (notification_tx, _) = broadcast::channel(256);

        Self {
            peripheral,
            characteristics: Arc::new(RwLock::new(HashMap::new())),
            notification_tx,
            is_listening: Arc::new(RwLock::new(false)),
            listener_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Discover and cache all characteristics.
    ///
    /// Fails with [`Error::ServiceNotFound`] if the weight-scale service is
    /// absent: the device is not a scale this crate can talk to, which is
    /// a configuration problem rather than a transient one.
    pub fn discover_characteristics(&self) -> Result<()> {
        let services = self.peripheral.services();

        let has_weight_service = services
            .iter()
            .any(|service| is_weight_scale_service(&service.uuid));

        if !has_weight_service {
            return Err(Error::ServiceNotFound {
                uuid: WEIGHT_SCALE_SERVICE_UUID.to_string(),
            });
        }

        let mut chars = self.characteristics.write();
        chars.clear();

        for service in services {
            for characteristic in service.characteristics {
                trace!(
                    "Found characteristic: {} in service {}",
                    characteristic.uuid,
                    service.uuid
                );
                chars.insert(characteristic.uuid, characteristic);
            }
        }

        debug!("Discovered {} characteristics", chars.len());

        if !chars.contains_key(&COMMAND_CHARACTERISTIC_UUID) {
            return Err(Error::CharacteristicNotFound {
                uuid: COMMAND_CHARACTERISTIC_UUID.to_string(),
            });
        }

        Ok(())
    }

    /// Check if a characteristic exists.
    pub fn has_characteristic(&self, uuid: &Uuid) -> bool {
        self.characteristics.read().contains_key(uuid)
    }

    /// Read a characteristic value.
    pub async fn read(&self, uuid: &Uuid) -> Result<Vec<u8>> {
        let characteristic = self.get(uuid)?;

        let data = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Read {} bytes from characteristic {}", data.len(), uuid);

        Ok(data)
    }

    /// Write to a characteristic.
    pub async fn write(&self, uuid: &Uuid, data: &[u8], with_response: bool) -> Result<()> {
        let characteristic = self.get(uuid)?;

        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        self.peripheral
            .write(&characteristic, data, write_type)
            .await
            .map_err(Error::Bluetooth)?;

        trace!("Wrote {} bytes to characteristic {}", data.len(), uuid);

        Ok(())
    }

    /// Subscribe to indications from a characteristic.
    pub async fn subscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.get(uuid)?;

        self.peripheral
            .subscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Subscribed to indications from {}", uuid);

        Ok(())
    }

    /// Unsubscribe from a characteristic.
    pub async fn unsubscribe(&self, uuid: &Uuid) -> Result<()> {
        let characteristic = self.get(uuid)?;

        self.peripheral
            .unsubscribe(&characteristic)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Unsubscribed from {}", uuid);

        Ok(())
    }

    /// Start listening for notifications.
    ///
    /// Notifications are forwarded through the channel returned by
    /// [`subscribe_notifications`](Self::subscribe_notifications).
    pub async fn start_notifications(&self) -> Result<()> {
        if *self.is_listening.read() {
            return Ok(());
        }

        *self.is_listening.write() = true;

        let peripheral = self.peripheral.clone();
        let is_listening = self.is_listening.clone();
        let notification_tx = self.notification_tx.clone();

        let handle = tokio::spawn(async move {
            let mut notifications = match peripheral.notifications().await {
                Ok(n) => n,
                Err(e) => {
                    error!("Failed to get notifications stream: {}", e);
                    return;
                }
            };

            while *is_listening.read() {
                tokio::select! {
                    Some(notification) = notifications.next() => {
                        trace!(
                            "Indication from {}: {:02X?}",
                            notification.uuid,
                            &notification.value
                        );

                        let _ = notification_tx.send(NotificationEvent {
                            characteristic_uuid: notification.uuid,
                            data: notification.value,
                        });
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {
                        // Check if we should stop
                        if !*is_listening.read() {
                            break;
                        }
                    }
                }
            }

            debug!("Notification listener stopped");
        });

        *self.listener_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop listening for notifications.
    pub async fn stop_notifications(&self) {
        *self.is_listening.write() = false;

        let handle = self.listener_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Get a receiver for notification events.
    pub fn subscribe_notifications(&self) -> broadcast::Receiver<NotificationEvent> {
        self.notification_tx.subscribe()
    }

    /// Write a command to the scale's command characteristic.
    pub async fn write_command(&self, command: &[u8]) -> Result<()> {
        self.write(&COMMAND_CHARACTERISTIC_UUID, command, true).await
    }

    /// Subscribe to every record characteristic the device exposes.
    ///
    /// At least one must be present; a scale without any record
    /// characteristic cannot deliver measurements.
    pub async fn subscribe_record_indications(&self) -> Result<()> {
        let mut subscribed = 0;

        for uuid in RECORD_CHARACTERISTICS {
            if self.has_characteristic(&uuid) {
                self.subscribe(&uuid).await?;
                subscribed += 1;
            }
        }

        if subscribed == 0 {
            return Err(Error::CharacteristicNotFound {
                uuid: WEIGHT_RECORD_UUID.to_string(),
            });
        }

        debug!("Subscribed to {} record characteristics", subscribed);

        Ok(())
    }

    /// Read a string value from a characteristic.
    pub async fn read_string(&self, uuid: &Uuid) -> Result<String> {
        let data = self.read(uuid).await?;
        String::from_utf8(data).map_err(|_| Error::Protocol {
            context: format!("Invalid UTF-8 in characteristic {}", uuid),
        })
    }

    /// Read the manufacturer name, if the device exposes one.
    pub async fn read_manufacturer_name(&self) -> Result<String> {
        self.read_string(&MANUFACTURER_NAME_UUID).await
    }

    /// Read the model number, if the device exposes one.
    pub async fn read_model_number(&self) -> Result<String> {
        self.read_string(&MODEL_NUMBER_UUID).await
    }

    /// Read the firmware revision, if the device exposes one.
    pub async fn read_firmware_revision(&self) -> Result<String> {
        self.read_string(&FIRMWARE_REVISION_UUID).await
    }

    fn get(&self, uuid: &Uuid) -> Result<Characteristic> {
        self.characteristics
            .read()
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: uuid.to_string(),
            })
    }
}

impl Drop for CharacteristicHandler {
    fn drop(&mut self) {
        *self.is_listening.write() = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notification_event_clone() {
        let event = NotificationEvent {
            characteristic_uuid: WEIGHT_RECORD_UUID,
            data: vec![1, 2, 3],
        };
        let cloned = event.clone();
        assert_eq!(event.characteristic_uuid, cloned.characteristic_uuid);
        assert_eq!(event.data, cloned.data);
    }
}
