//! End-to-end pipeline tests: raw notification bytes through reassembly,
//! decoding, session merge, and plugin dispatch, without BLE hardware.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

use medisana_rust_ble::protocol::checksum::append_checksum;
use medisana_rust_ble::protocol::frames::FRAME_TERMINATOR;
use medisana_rust_ble::{
    Decoded, Measurement, MeasurementDecoder, PacketReassembler, Plugin, PluginDispatcher,
    PluginError, SyncSession,
};

/// Records every publish it receives; optionally fails afterwards.
struct StubPlugin {
    name: &'static str,
    calls: Mutex<Vec<Measurement>>,
    fail: bool,
}

impl StubPlugin {
    fn new(name: &'static str, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            name,
            calls: Mutex::new(Vec::new()),
            fail,
        })
    }
}

#[async_trait]
impl Plugin for StubPlugin {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn publish(&self, measurement: &Measurement) -> Result<(), PluginError> {
        self.calls.lock().push(measurement.clone());
        if self.fail {
            Err(PluginError::Other("stub failure".to_string()))
        } else {
            Ok(())
        }
    }
}

fn sync_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 7, 30, 0).unwrap()
}

/// Run raw notification chunks through the full decode pipeline.
fn decode_chunks(chunks: &[&[u8]]) -> Vec<Measurement> {
    let decoder = MeasurementDecoder::new(sync_time());
    let mut reassembler = PacketReassembler::new();
    let mut session = SyncSession::new("e4:12:09:6b:2f:51", sync_time());

    for chunk in chunks {
        let mut next = Some(*chunk);
        while let Some(frame) = reassembler.feed(next.take().unwrap_or(&[])) {
            match decoder.decode(&frame) {
                Ok(Decoded::Weight(m)) => session.add_weight(m),
                Ok(Decoded::Body(b)) => session.add_body(b),
                Ok(Decoded::Person(p)) => session.add_person(p),
                Ok(Decoded::EndOfData) => break,
                Err(_) => continue,
            }
        }
    }

    session.merged(&HashMap::new())
}

#[tokio::test]
async fn live_weight_frame_reaches_stub_plugin_exactly_once() {
    // Raw frame: type 0x10, weight 712 (71.2 kg), person 1, checksum,
    // terminator.
    let wire = [0x10, 0x02, 0xC8, 0x01, 0x35, FRAME_TERMINATOR];

    let measurements = decode_chunks(&[&wire]);
    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements[0].person, 1);
    assert_eq!(measurements[0].weight_kg, 71.2);

    let stub = StubPlugin::new("stub", false);
    let dispatcher = PluginDispatcher::new(vec![stub.clone()]);

    for measurement in &measurements {
        dispatcher.dispatch(measurement).await;
    }

    let calls = stub.calls.lock();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].weight_kg, 71.2);
    assert_eq!(calls[0].person, 1);
}

#[tokio::test]
async fn fragmented_transfer_merges_weight_and_body() {
    // Stored weight record for person 2, split mid-frame across two
    // notifications.
    let mut weight = vec![0x1D];
    weight.extend_from_slice(&8240u16.to_le_bytes()); // 82.4 kg
    weight.push(0x03); // stabilized + impedance
    weight.push(0x00);
    weight.extend_from_slice(&500_000_000u32.to_le_bytes());
    weight.extend_from_slice(&[0x00; 4]);
    weight.push(0x02);
    let weight = append_checksum(&weight);

    // Matching body record, same timestamp, one chunk.
    let mut body = vec![0x6F];
    body.extend_from_slice(&500_000_000u32.to_le_bytes());
    body.push(0x02);
    body.extend_from_slice(&2313u16.to_le_bytes());
    for value in [191u16, 573, 428, 32] {
        body.extend_from_slice(&value.to_le_bytes());
    }
    let body = append_checksum(&body);

    let end_of_data = [0x21, 0x00];

    let measurements = decode_chunks(&[&weight[..8], &weight[8..], &body, &end_of_data]);

    assert_eq!(measurements.len(), 1);
    let m = &measurements[0];
    assert_eq!(m.person, 2);
    assert_eq!(m.weight_kg, 82.4);
    assert!(m.stabilized);
    assert_eq!(m.fat_percent, Some(19.1));
    assert_eq!(m.water_percent, Some(57.3));
    assert_eq!(m.muscle_percent, Some(42.8));
    assert_eq!(m.bone_kg, Some(3.2));
    assert_eq!(m.kcal, Some(2313));
}

#[tokio::test]
async fn corrupted_frame_is_dropped_and_transfer_continues() {
    let good = [0x10, 0x02, 0xC8, 0x01, 0x35];
    let corrupted = [0x10, 0x03, 0x20, 0x02, 0x35]; // checksum does not match

    let measurements = decode_chunks(&[&corrupted, &good]);

    assert_eq!(measurements.len(), 1);
    assert_eq!(measurements[0].weight_kg, 71.2);
}

#[tokio::test]
async fn failing_plugin_does_not_starve_the_rest() {
    let wire = [0x10, 0x02, 0xC8, 0x01, 0x35];
    let measurements = decode_chunks(&[&wire]);

    let first = StubPlugin::new("first", true);
    let second = StubPlugin::new("second", false);
    let third = StubPlugin::new("third", false);
    let dispatcher =
        PluginDispatcher::new(vec![first.clone(), second.clone(), third.clone()]);

    for measurement in &measurements {
        dispatcher.dispatch(measurement).await;
    }

    // All three received the call despite the first one failing.
    assert_eq!(first.calls.lock().len(), 1);
    assert_eq!(second.calls.lock().len(), 1);
    assert_eq!(third.calls.lock().len(), 1);
}

#[tokio::test]
async fn duplicate_notification_does_not_duplicate_measurement() {
    let wire = [0x10, 0x02, 0xC8, 0x01, 0x35];

    // The adapter delivers the same indication twice.
    let measurements = decode_chunks(&[&wire, &wire]);

    assert_eq!(measurements.len(), 1);
}
