// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow derivable impls for clarity
#![allow(clippy::derivable_impls)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # medisana-rust-ble
//!
//! A cross-platform Rust bridge for Medisana BS440 body composition
//! scales: connects over Bluetooth Low Energy, synchronizes the scale
//! clock, retrieves stored and live measurements, and fans them out to
//! pluggable output sinks.
//!
//! ## Features
//!
//! - **Record Sync**: Download every measurement stored since the last
//!   connection, clock-synced so timestamps are correct
//! - **Body Composition**: Weight, fat, water, muscle, bone mass, kcal
//!   and BMI per person slot (1-8)
//! - **Output Plugins**: MQTT and CSV sinks; new sinks implement a single
//!   trait
//! - **Multi-scale Support**: Services any number of configured scales
//!   concurrently, each with independent retry backoff
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use medisana_rust_ble::{
//!     build_plugins, Config, ConnectionManager, PluginDispatcher, Result,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load("bs440.toml")?;
//!
//!     let plugins = build_plugins(&config)?;
//!     let dispatcher = Arc::new(PluginDispatcher::new(plugins));
//!
//!     let manager = ConnectionManager::new(config, dispatcher);
//!     manager.run().await
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod error;
pub mod manager;
pub mod plugins;
pub mod protocol;
pub mod session;

// Re-exports for convenience
pub use config::{Config, CsvConfig, DeviceConfig, MqttConfig, PersonConfig};
pub use error::{Error, Result};
pub use manager::ConnectionManager;
pub use plugins::{build_plugins, Plugin, PluginDispatcher, PluginError};
pub use session::{ScaleSession, SessionState, SessionSummary};

// Re-export commonly used types from submodules
pub use ble::connection::ConnectionState;
pub use data::{BodyComposition, Measurement, PersonProfile, SyncSession};
pub use protocol::{Decoded, DecodeError, MeasurementDecoder, PacketReassembler, RawFrame};
