//! Record frame types and command construction.
//!
//! Frame format per the BS440 GATT protocol:
//! - Record frame: Type(1) + Payload(fixed per type) + Checksum(1),
//!   optionally followed by a terminator byte on the wire.
//! - Command (written to the command characteristic): Opcode(1) + Payload.
//!
//! Record timestamps are seconds since the device epoch (2010-01-01 UTC),
//! not the Unix epoch. The clock written during time sync uses the same
//! base, which is why sync must precede any data request.

use chrono::{DateTime, TimeZone, Utc};

/// Offset of the device epoch (2010-01-01T00:00:00Z) from the Unix epoch.
pub const DEVICE_EPOCH_OFFSET: i64 = 1_262_304_000;

/// Terminator byte some firmware revisions append after a record frame.
pub const FRAME_TERMINATOR: u8 = 0xAA;

/// Command opcode: request transmission of stored records.
pub const CMD_REQUEST_RECORDS: u8 = 0x01;
/// Command opcode: set the scale clock.
pub const CMD_SET_TIME: u8 = 0x02;
/// Command opcode: acknowledge received records so they are not resent.
pub const CMD_ACKNOWLEDGE: u8 = 0x04;

/// Record frame types sent by the scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Live weight reading while someone stands on the scale (0x10).
    LiveWeight = 0x10,
    /// Stored weight record with timestamp (0x1D).
    StoredWeight = 0x1D,
    /// End-of-data marker after the last stored record (0x21).
    EndOfData = 0x21,
    /// Body composition record (0x6F).
    BodyComposition = 0x6F,
    /// Person profile record (0x84).
    PersonInfo = 0x84,
}

impl FrameType {
    /// Create from the raw type byte. Returns `None` for unknown types.
    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            0x10 => Some(Self::LiveWeight),
            0x1D => Some(Self::StoredWeight),
            0x21 => Some(Self::EndOfData),
            0x6F => Some(Self::BodyComposition),
            0x84 => Some(Self::PersonInfo),
            _ => None,
        }
    }

    /// Convert to the raw type byte.
    pub fn to_raw(&self) -> u8 {
        *self as u8
    }

    /// Total frame length in bytes, type byte and checksum included.
    pub fn frame_len(&self) -> usize {
        match self {
            Self::LiveWeight => 5,
            Self::StoredWeight => 15,
            Self::EndOfData => 2,
            Self::BodyComposition => 17,
            Self::PersonInfo => 10,
        }
    }
}

/// The largest frame any known type can produce.
pub const MAX_FRAME_LEN: usize = 17;

/// Build the set-time command for the given wall-clock instant.
///
/// The scale expects seconds since its own epoch as a little-endian u32
/// after the opcode. Instants before the device epoch clamp to zero.
pub fn set_time_command(now: DateTime<Utc>) -> Vec<u8> {
    let device_seconds = (now.timestamp() - DEVICE_EPOCH_OFFSET).max(0) as u32;

    let mut command = Vec::with_capacity(5);
    command.push(CMD_SET_TIME);
    command.extend_from_slice(&device_seconds.to_le_bytes());
    command
}

/// Build the request-records command.
pub fn request_records_command() -> Vec<u8> {
    vec![CMD_REQUEST_RECORDS]
}

/// Build the acknowledge command for a number of received records.
pub fn acknowledge_command(record_count: u8) -> Vec<u8> {
    vec![CMD_ACKNOWLEDGE, record_count]
}

/// Convert a device-epoch timestamp offset to UTC.
pub fn device_timestamp_to_utc(offset_seconds: u32) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(DEVICE_EPOCH_OFFSET + i64::from(offset_seconds), 0)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_type_roundtrip() {
        for raw in [0x10, 0x1D, 0x21, 0x6F, 0x84] {
            let frame_type = FrameType::from_raw(raw).unwrap();
            assert_eq!(frame_type.to_raw(), raw);
        }
    }

    #[test]
    fn test_unknown_frame_type() {
        assert_eq!(FrameType::from_raw(0x00), None);
        assert_eq!(FrameType::from_raw(0xFF), None);
    }

    #[test]
    fn test_frame_lengths_bounded() {
        for frame_type in [
            FrameType::LiveWeight,
            FrameType::StoredWeight,
            FrameType::EndOfData,
            FrameType::BodyComposition,
            FrameType::PersonInfo,
        ] {
            assert!(frame_type.frame_len() <= MAX_FRAME_LEN);
            assert!(frame_type.frame_len() >= 2);
        }
    }

    #[test]
    fn test_set_time_command_layout() {
        // One hour past the device epoch.
        let now = Utc.timestamp_opt(DEVICE_EPOCH_OFFSET + 3600, 0).unwrap();
        let command = set_time_command(now);

        assert_eq!(command[0], CMD_SET_TIME);
        assert_eq!(&command[1..], &3600u32.to_le_bytes());
    }

    #[test]
    fn test_set_time_clamps_before_epoch() {
        let before = Utc.timestamp_opt(DEVICE_EPOCH_OFFSET - 10, 0).unwrap();
        let command = set_time_command(before);
        assert_eq!(&command[1..], &0u32.to_le_bytes());
    }

    #[test]
    fn test_device_timestamp_to_utc() {
        let ts = device_timestamp_to_utc(0).unwrap();
        assert_eq!(ts.timestamp(), DEVICE_EPOCH_OFFSET);

        let ts = device_timestamp_to_utc(86_400).unwrap();
        assert_eq!(ts.timestamp(), DEVICE_EPOCH_OFFSET + 86_400);
    }
}
