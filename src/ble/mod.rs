//! BLE communication module.
//!
//! This module provides low-level Bluetooth Low Energy functionality for
//! locating and communicating with BS440 scales.

pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod uuids;

pub use characteristics::{CharacteristicHandler, NotificationEvent};
pub use connection::{ConnectionState, ScaleLink};
pub use scanner::BleScanner;
pub use uuids::*;
