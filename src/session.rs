//! Per-device protocol session.
//!
//! Drives one connection to a scale through the full exchange: connect,
//! locate the weight service, synchronize the clock, request the stored
//! records, reassemble and decode the incoming frames, dispatch the
//! decoded measurements, and acknowledge the transfer so the scale clears
//! its history.
//!
//! The clock must be written before records are requested: record
//! timestamps are offsets against the device epoch, and the scale anchors
//! them to the clock it was last given.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use btleplug::platform::Peripheral;

use crate::ble::characteristics::CharacteristicHandler;
use crate::ble::connection::ScaleLink;
use crate::ble::uuids::is_record_characteristic;
use crate::config::DeviceConfig;
use crate::data::SyncSession;
use crate::error::{Error, Result};
use crate::plugins::PluginDispatcher;
use crate::protocol::frames::{
    acknowledge_command, request_records_command, set_time_command,
};
use crate::protocol::reassembler::RawFrame;
use crate::protocol::{Decoded, MeasurementDecoder, PacketReassembler};

/// Deadline for establishing the GATT link.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Deadline for individual GATT operations (writes, subscriptions).
pub const GATT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long to wait for the next indication before giving up on the
/// transfer.
pub const NOTIFICATION_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection attempt yet.
    Idle,
    /// GATT link established.
    Connected,
    /// Required service and characteristics located.
    ServiceDiscovered,
    /// Scale clock written.
    TimeSynced,
    /// Waiting for record indications.
    AwaitingData,
    /// A frame is partially buffered.
    Reassembling,
    /// Dispatching and acknowledging received records.
    Completing,
    /// Link released; terminal.
    Disconnected,
    /// Session failed; terminal, retried by the connection manager.
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Connected => "Connected",
            Self::ServiceDiscovered => "ServiceDiscovered",
            Self::TimeSynced => "TimeSynced",
            Self::AwaitingData => "AwaitingData",
            Self::Reassembling => "Reassembling",
            Self::Completing => "Completing",
            Self::Disconnected => "Disconnected",
            Self::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of a finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    /// Address of the scale the session talked to.
    pub address: String,
    /// Measurements dispatched to the plugins.
    pub dispatched: usize,
    /// Whether the scale acknowledged the transfer.
    ///
    /// An unacknowledged session is retried as a whole; the scale will
    /// resend its history, and duplicate delivery is accepted over loss.
    pub acknowledged: bool,
    /// Whether the session was cut short by shutdown.
    pub interrupted: bool,
}

/// The ordered handshake written to the command characteristic.
///
/// Kept as data so the sequencing invariant (clock before records) is
/// visible and testable in one place.
pub fn handshake_commands(now: DateTime<Utc>) -> [Vec<u8>; 2] {
    [set_time_command(now), request_records_command()]
}

/// One protocol session against one scale.
pub struct ScaleSession {
    link: ScaleLink,
    device_name: String,
    heights: HashMap<u8, f64>,
    state: SessionState,
    shutdown: watch::Receiver<bool>,
}

impl ScaleSession {
    /// Create a session for an already-located peripheral.
    pub fn new(
        peripheral: Peripheral,
        device: &DeviceConfig,
        heights: HashMap<u8, f64>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            link: ScaleLink::new(peripheral, device.mac_address.clone()),
            device_name: device.display_name().to_string(),
            heights,
            state: SessionState::Idle,
            shutdown,
        }
    }

    /// Current protocol state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion.
    ///
    /// Every decoded measurement is dispatched exactly once, before the
    /// link is released. Errors leave the session in [`SessionState::Error`]
    /// and bubble up to the connection manager's backoff; the link is
    /// released either way.
    pub async fn run(&mut self, dispatcher: &PluginDispatcher) -> Result<SessionSummary> {
        let result = self.drive(dispatcher).await;

        if result.is_err() {
            self.state = SessionState::Error;
        }

        // Release the link whatever happened; failures here are logged
        // only, the session outcome is already decided.
        if let Err(e) = self.link.disconnect().await {
            debug!("Disconnect from {} failed: {}", self.device_name, e);
        }

        if result.is_ok() {
            self.state = SessionState::Disconnected;
        }

        result
    }

    async fn drive(&mut self, dispatcher: &PluginDispatcher) -> Result<SessionSummary> {
        // Connect and discover services.
        timeout(CONNECT_TIMEOUT, self.link.connect())
            .await
            .map_err(|_| Error::Timeout {
                operation: "connect",
            })??;
        self.state = SessionState::Connected;

        // Locate the weight service and command characteristic. Failure
        // here is a configuration problem, not a transient one.
        let handler = CharacteristicHandler::new(self.link.peripheral().clone());
        handler.discover_characteristics()?;
        self.state = SessionState::ServiceDiscovered;

        if let Ok(Ok(model)) = timeout(GATT_TIMEOUT, handler.read_model_number()).await {
            debug!("Scale {} reports model {}", self.device_name, model);
        }

        timeout(GATT_TIMEOUT, handler.subscribe_record_indications())
            .await
            .map_err(|_| Error::Timeout {
                operation: "subscribe",
            })??;

        handler.start_notifications().await?;
        let mut notifications = handler.subscribe_notifications();

        // Clock first, then the record request.
        let synced_at = Utc::now();
        let [set_time, request_records] = handshake_commands(synced_at);

        timeout(GATT_TIMEOUT, handler.write_command(&set_time))
            .await
            .map_err(|_| Error::Timeout {
                operation: "time sync",
            })??;
        self.state = SessionState::TimeSynced;
        info!("Scale {} clock synchronized", self.device_name);

        timeout(GATT_TIMEOUT, handler.write_command(&request_records))
            .await
            .map_err(|_| Error::Timeout {
                operation: "record request",
            })??;
        self.state = SessionState::AwaitingData;

        let decoder = MeasurementDecoder::new(synced_at);
        let mut session = SyncSession::new(self.link.address(), synced_at);

        let completed = self
            .receive_records(&mut notifications, &decoder, &mut session)
            .await?;

        if !completed {
            // Shutdown requested mid-transfer: drop partial data.
            handler.stop_notifications().await;
            return Ok(SessionSummary {
                address: self.link.address().to_string(),
                dispatched: 0,
                acknowledged: false,
                interrupted: true,
            });
        }

        // Dispatch before acknowledging; a lost ack only costs a duplicate
        // transfer next session.
        self.state = SessionState::Completing;

        let measurements = session.merged(&self.heights);
        for measurement in &measurements {
            dispatcher.dispatch(measurement).await;
        }

        info!(
            "Scale {}: dispatched {} measurements",
            self.device_name,
            measurements.len()
        );

        let ack = acknowledge_command(session.record_count().min(u8::MAX as usize) as u8);
        match timeout(GATT_TIMEOUT, handler.write_command(&ack)).await {
            Ok(Ok(())) => session.mark_acknowledged(),
            Ok(Err(e)) => warn!(
                "Scale {}: acknowledge failed ({}), history will be resent",
                self.device_name, e
            ),
            Err(_) => warn!(
                "Scale {}: acknowledge timed out, history will be resent",
                self.device_name
            ),
        }

        handler.stop_notifications().await;

        Ok(SessionSummary {
            address: self.link.address().to_string(),
            dispatched: measurements.len(),
            acknowledged: session.is_acknowledged(),
            interrupted: false,
        })
    }

    /// Pump indications into the reassembler until end-of-data.
    ///
    /// Returns `false` when shutdown interrupted the transfer.
    async fn receive_records(
        &mut self,
        notifications: &mut broadcast::Receiver<crate::ble::NotificationEvent>,
        decoder: &MeasurementDecoder,
        session: &mut SyncSession,
    ) -> Result<bool> {
        let mut reassembler = PacketReassembler::new();

        loop {
            let event = tokio::select! {
                changed = self.shutdown.changed() => {
                    // A dropped sender counts as shutdown.
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("Shutdown requested, abandoning transfer from {}", self.device_name);
                        return Ok(false);
                    }
                    continue;
                }
                received = timeout(NOTIFICATION_IDLE_TIMEOUT, notifications.recv()) => {
                    match received {
                        Ok(Ok(event)) => event,
                        Ok(Err(broadcast::error::RecvError::Lagged(missed))) => {
                            warn!("Notification channel lagged, {} indications lost", missed);
                            continue;
                        }
                        Ok(Err(broadcast::error::RecvError::Closed)) => {
                            return Err(Error::ConnectionLost);
                        }
                        Err(_elapsed) => {
                            if session.is_empty() {
                                return Err(Error::Timeout {
                                    operation: "record transfer",
                                });
                            }
                            // The scale went quiet after sending records but
                            // before the end marker. Deliver what we have.
                            warn!(
                                "Scale {} went quiet mid-transfer, treating as end of data",
                                self.device_name
                            );
                            return Ok(true);
                        }
                    }
                }
            };

            if !is_record_characteristic(&event.characteristic_uuid) {
                continue;
            }

            // Feed the chunk, then drain any further frames it completed.
            let mut chunk = Some(event.data.as_slice());
            loop {
                let frame = match reassembler.feed(chunk.take().unwrap_or(&[])) {
                    Some(frame) => frame,
                    None => break,
                };

                if ingest_frame(session, decoder, &frame) {
                    return Ok(true);
                }
            }

            self.state = if reassembler.pending() > 0 {
                SessionState::Reassembling
            } else {
                SessionState::AwaitingData
            };
        }
    }
}

/// Decode one frame into the session. Returns `true` on end-of-data.
///
/// Decode failures are per-frame: the scale will not resend this exact
/// byte sequence, so the loss is logged and accepted.
fn ingest_frame(session: &mut SyncSession, decoder: &MeasurementDecoder, frame: &RawFrame) -> bool {
    match decoder.decode(frame) {
        Ok(Decoded::Weight(measurement)) => {
            debug!(
                "Weight record: person {} at {:.1} kg",
                measurement.person, measurement.weight_kg
            );
            session.add_weight(measurement);
        }
        Ok(Decoded::Body(body)) => {
            debug!("Body record: person {} at {}", body.person, body.timestamp);
            session.add_body(body);
        }
        Ok(Decoded::Person(profile)) => {
            debug!("Person record: slot {}", profile.slot);
            session.add_person(profile);
        }
        Ok(Decoded::EndOfData) => {
            debug!("End-of-data marker received");
            return true;
        }
        Err(e) => {
            error!("Dropping undecodable frame {:02X?}: {}", frame, e);
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::checksum::append_checksum;
    use crate::protocol::frames::{
        CMD_ACKNOWLEDGE, CMD_REQUEST_RECORDS, CMD_SET_TIME, DEVICE_EPOCH_OFFSET,
    };
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn reference_time() -> chrono::DateTime<Utc> {
        Utc.timestamp_opt(DEVICE_EPOCH_OFFSET + 365 * 86_400, 0)
            .unwrap()
    }

    #[test]
    fn test_time_sync_precedes_record_request() {
        let [first, second] = handshake_commands(reference_time());
        assert_eq!(first[0], CMD_SET_TIME);
        assert_eq!(second[0], CMD_REQUEST_RECORDS);
    }

    #[test]
    fn test_acknowledge_command_opcode() {
        assert_eq!(acknowledge_command(3), vec![CMD_ACKNOWLEDGE, 3]);
    }

    #[test]
    fn test_ingest_frame_sequence() {
        let decoder = MeasurementDecoder::new(reference_time());
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", reference_time());

        // Stored weight: 71.2 kg, person 1, one day after the epoch.
        let mut weight = vec![0x1D];
        weight.extend_from_slice(&7120u16.to_le_bytes());
        weight.push(0x01);
        weight.push(0x00);
        weight.extend_from_slice(&86_400u32.to_le_bytes());
        weight.extend_from_slice(&[0x00; 4]);
        weight.push(0x01);
        let weight = append_checksum(&weight);

        // Matching body record, same timestamp.
        let mut body = vec![0x6F];
        body.extend_from_slice(&86_400u32.to_le_bytes());
        body.push(0x01);
        body.extend_from_slice(&2313u16.to_le_bytes());
        for value in [191u16, 573, 428, 32] {
            body.extend_from_slice(&value.to_le_bytes());
        }
        let body = append_checksum(&body);

        assert!(!ingest_frame(&mut session, &decoder, &weight));
        assert!(!ingest_frame(&mut session, &decoder, &body));
        assert!(ingest_frame(&mut session, &decoder, &vec![0x21, 0x00]));

        let merged = session.merged(&HashMap::new());
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].weight_kg, 71.2);
        assert_eq!(merged[0].fat_percent, Some(19.1));
    }

    #[test]
    fn test_ingest_frame_drops_corrupt_frame() {
        let decoder = MeasurementDecoder::new(reference_time());
        let mut session = SyncSession::new("aa:bb:cc:dd:ee:ff", reference_time());

        // Live weight frame with a flipped checksum byte.
        let corrupt = vec![0x10, 0x02, 0xC8, 0x01, 0x36];
        assert!(!ingest_frame(&mut session, &decoder, &corrupt));
        assert!(session.is_empty());
    }

    #[test]
    fn test_session_state_display() {
        assert_eq!(format!("{}", SessionState::TimeSynced), "TimeSynced");
        assert_eq!(format!("{}", SessionState::Error), "Error");
    }
}
