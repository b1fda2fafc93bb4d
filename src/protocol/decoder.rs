//! Record frame decoding.
//!
//! The only place firmware-specific field offsets and unit conversions
//! live. Everything here works on complete frames as emitted by the
//! [`PacketReassembler`](crate::protocol::PacketReassembler); checksum
//! verification happens before any field is read.
//!
//! Record layouts:
//! - `0x10` live weight: weight u16 big-endian in 0.1 kg units, person.
//! - `0x1D` stored weight: weight u16 little-endian in 10 g units, status
//!   flags (bit 0 = stabilized), u32 LE device-epoch timestamp, person.
//! - `0x6F` body composition: u32 LE device-epoch timestamp, person, then
//!   kcal/fat/water/muscle/bone as u16 LE, the last four masked `0x0FFF`
//!   and scaled by 0.1.
//! - `0x84` person profile: slot, gender, age, height cm, activity.
//! - `0x21` end-of-data marker, empty payload.

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::debug;

use crate::data::measurement::{
    ActivityLevel, BodyComposition, Gender, Measurement, PersonProfile,
};
use crate::protocol::checksum::{calculate_checksum, verify_frame};
use crate::protocol::frames::{device_timestamp_to_utc, FrameType};
use crate::protocol::reassembler::RawFrame;

/// Highest person slot the scale supports.
pub const MAX_PERSON_SLOT: u8 = 8;

/// Clock skew tolerated before a timestamp counts as "in the future".
const FUTURE_TOLERANCE_SECS: i64 = 60;

/// Errors produced while decoding a single frame.
///
/// All of these are per-frame: the frame is dropped and the session
/// continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// The frame was empty.
    #[error("empty frame")]
    EmptyFrame,

    /// The frame type byte is not one this firmware revision sends.
    #[error("unsupported frame type: {0:#04x}")]
    UnsupportedFrameType(u8),

    /// The frame is shorter than its type requires.
    #[error("truncated frame: {actual} of {expected} bytes for type {frame_type:#04x}")]
    TruncatedFrame {
        /// The frame type byte.
        frame_type: u8,
        /// Bytes the type requires.
        expected: usize,
        /// Bytes actually present.
        actual: usize,
    },

    /// The trailing checksum does not match the payload.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the payload.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },

    /// The person slot is outside 1-8.
    #[error("person slot out of range: {0}")]
    InvalidPersonSlot(u8),

    /// The decoded weight is not positive.
    #[error("weight out of range: {0} kg")]
    InvalidWeight(f64),

    /// A percentage field fell outside 0-100.
    #[error("{name} out of range: {value}")]
    PercentageOutOfRange {
        /// Which field was out of range.
        name: &'static str,
        /// The decoded value.
        value: f64,
    },

    /// The timestamp offset does not map to a representable instant.
    #[error("timestamp offset {0} outside representable range")]
    TimestampOutOfRange(u32),

    /// The timestamp is ahead of the session's sync time.
    #[error("timestamp {0} is in the future")]
    TimestampInFuture(DateTime<Utc>),
}

/// A successfully decoded record.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// A weight reading (live or stored).
    Weight(Measurement),
    /// A body-composition record, merged with its weight by the session.
    Body(BodyComposition),
    /// A person profile record.
    Person(PersonProfile),
    /// The end-of-data marker closing a record transfer.
    EndOfData,
}

/// Decodes raw record frames into structured records.
///
/// Created once per session with the instant the scale clock was synced;
/// record timestamps are validated against it so a measurement can never
/// postdate its own sync.
#[derive(Debug, Clone)]
pub struct MeasurementDecoder {
    /// Sync instant used as timestamp base and future bound.
    reference_time: DateTime<Utc>,
}

impl MeasurementDecoder {
    /// Create a decoder anchored at the session's time-sync instant.
    pub fn new(reference_time: DateTime<Utc>) -> Self {
        Self { reference_time }
    }

    /// Decode one complete frame.
    pub fn decode(&self, frame: &RawFrame) -> Result<Decoded, DecodeError> {
        let &type_byte = frame.first().ok_or(DecodeError::EmptyFrame)?;

        let frame_type =
            FrameType::from_raw(type_byte).ok_or(DecodeError::UnsupportedFrameType(type_byte))?;

        let expected = frame_type.frame_len();
        if frame.len() < expected {
            return Err(DecodeError::TruncatedFrame {
                frame_type: type_byte,
                expected,
                actual: frame.len(),
            });
        }

        if !verify_frame(&frame[..expected]) {
            return Err(DecodeError::ChecksumMismatch {
                expected: calculate_checksum(&frame[1..expected - 1]),
                actual: frame[expected - 1],
            });
        }

        match frame_type {
            FrameType::LiveWeight => self.decode_live_weight(frame),
            FrameType::StoredWeight => self.decode_stored_weight(frame),
            FrameType::BodyComposition => self.decode_body_composition(frame),
            FrameType::PersonInfo => decode_person_info(frame),
            FrameType::EndOfData => Ok(Decoded::EndOfData),
        }
    }

    /// Live weight: [type, weight_hi, weight_lo, person, checksum].
    ///
    /// The live frame carries no timestamp; the reading is stamped with
    /// the sync instant.
    fn decode_live_weight(&self, frame: &[u8]) -> Result<Decoded, DecodeError> {
        let raw_weight = u16::from_be_bytes([frame[1], frame[2]]);
        let weight_kg = f64::from(raw_weight) / 10.0;
        let person = validate_person_slot(frame[3])?;

        if weight_kg <= 0.0 {
            return Err(DecodeError::InvalidWeight(weight_kg));
        }

        debug!("Live weight: person {} at {:.1} kg", person, weight_kg);

        Ok(Decoded::Weight(Measurement::new(
            person,
            self.reference_time,
            weight_kg,
        )))
    }

    /// Stored weight: [type, weight u16 LE, flags, pad, timestamp u32 LE,
    /// pad x4, person, checksum]. Weight is in 10 g units.
    fn decode_stored_weight(&self, frame: &[u8]) -> Result<Decoded, DecodeError> {
        let raw_weight = u16::from_le_bytes([frame[1], frame[2]]);
        let weight_kg = f64::from(raw_weight) / 100.0;
        let stabilized = frame[3] & 0x01 != 0;
        let raw_timestamp = u32::from_le_bytes([frame[5], frame[6], frame[7], frame[8]]);
        let person = validate_person_slot(frame[13])?;

        if weight_kg <= 0.0 {
            return Err(DecodeError::InvalidWeight(weight_kg));
        }

        let timestamp = self.validate_timestamp(raw_timestamp)?;

        let mut measurement = Measurement::new(person, timestamp, weight_kg);
        measurement.stabilized = stabilized;

        Ok(Decoded::Weight(measurement))
    }

    /// Body composition: [type, timestamp u32 LE, person, kcal u16 LE,
    /// fat, water, muscle, bone u16 LE, checksum]. The last four are
    /// masked 0x0FFF and carry one decimal.
    fn decode_body_composition(&self, frame: &[u8]) -> Result<Decoded, DecodeError> {
        let raw_timestamp = u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]]);
        let person = validate_person_slot(frame[5])?;
        let kcal = u16::from_le_bytes([frame[6], frame[7]]);

        let nibble_masked =
            |lo: u8, hi: u8| f64::from(u16::from_le_bytes([lo, hi]) & 0x0FFF) / 10.0;

        let fat_percent = nibble_masked(frame[8], frame[9]);
        let water_percent = nibble_masked(frame[10], frame[11]);
        let muscle_percent = nibble_masked(frame[12], frame[13]);
        let bone_kg = nibble_masked(frame[14], frame[15]);

        validate_percentage("fat_percent", fat_percent)?;
        validate_percentage("water_percent", water_percent)?;
        validate_percentage("muscle_percent", muscle_percent)?;

        let timestamp = self.validate_timestamp(raw_timestamp)?;

        Ok(Decoded::Body(BodyComposition {
            person,
            timestamp,
            kcal,
            fat_percent,
            water_percent,
            muscle_percent,
            bone_kg,
        }))
    }

    /// Map a device-epoch offset to UTC and bound it by the sync time.
    ///
    /// A few seconds of skew right after sync is expected and clamps to
    /// the reference; anything further ahead is rejected.
    fn validate_timestamp(&self, raw: u32) -> Result<DateTime<Utc>, DecodeError> {
        let timestamp =
            device_timestamp_to_utc(raw).ok_or(DecodeError::TimestampOutOfRange(raw))?;

        if timestamp > self.reference_time + Duration::seconds(FUTURE_TOLERANCE_SECS) {
            return Err(DecodeError::TimestampInFuture(timestamp));
        }

        Ok(timestamp.min(self.reference_time))
    }
}

/// Person profile: [type, pad, slot, pad, gender, age, height, pad,
/// activity, checksum].
fn decode_person_info(frame: &[u8]) -> Result<Decoded, DecodeError> {
    let slot = validate_person_slot(frame[2])?;
    let gender = if frame[4] == 1 {
        Gender::Male
    } else {
        Gender::Female
    };
    let age = frame[5];
    let height_cm = frame[6];
    let activity = if frame[8] == 3 {
        ActivityLevel::High
    } else {
        ActivityLevel::Normal
    };

    Ok(Decoded::Person(PersonProfile {
        slot,
        gender,
        age,
        height_cm,
        activity,
    }))
}

fn validate_person_slot(slot: u8) -> Result<u8, DecodeError> {
    if (1..=MAX_PERSON_SLOT).contains(&slot) {
        Ok(slot)
    } else {
        Err(DecodeError::InvalidPersonSlot(slot))
    }
}

fn validate_percentage(name: &'static str, value: f64) -> Result<(), DecodeError> {
    if (0.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(DecodeError::PercentageOutOfRange { name, value })
    }
}

/// Body mass index from weight and height, rounded to one decimal.
///
/// Returns `None` for non-positive heights.
pub fn bmi(weight_kg: f64, height_cm: f64) -> Option<f64> {
    if height_cm <= 0.0 {
        return None;
    }

    let height_m = height_cm / 100.0;
    Some((weight_kg / (height_m * height_m) * 10.0).round() / 10.0)
}
