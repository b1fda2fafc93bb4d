//! Protocol module for the BS440 record wire format.
//!
//! This module contains the implementations for:
//! - Frame checksum calculation
//! - Frame type registry and command construction
//! - Notification packet reassembly
//! - Record frame decoding

pub mod checksum;
pub mod decoder;
pub mod frames;
pub mod reassembler;

pub use checksum::calculate_checksum;
pub use decoder::{bmi, Decoded, DecodeError, MeasurementDecoder};
pub use frames::{FrameType, DEVICE_EPOCH_OFFSET};
pub use reassembler::{PacketReassembler, RawFrame};
