//! Error types for the medisana-rust-ble crate.

use thiserror::Error;

use crate::protocol::decoder::DecodeError;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// The configured scale was not seen during a scan window.
    #[error("Scale not found: {address}")]
    DeviceNotFound {
        /// The MAC address that was searched for.
        address: String,
    },

    /// Operation requires a connection but the scale is not connected.
    #[error("Scale not connected")]
    NotConnected,

    /// Failed to establish a connection to the scale.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// The connection to the scale was lost mid-session.
    #[error("Connection lost")]
    ConnectionLost,

    /// A BLE operation did not complete within its deadline.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: &'static str,
    },

    /// The scale behaved in a way the protocol does not allow.
    #[error("Protocol violation: {context}")]
    Protocol {
        /// Description of the unexpected behavior.
        context: String,
    },

    /// A frame could not be decoded into a measurement.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Service not found on the device.
    ///
    /// The device does not expose the weight-scale service this crate
    /// speaks. Retrying with the same firmware assumption will not help.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the device.
    #[error("Characteristic not found: {uuid}")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// A configuration value could not be used.
    #[error("Configuration error: {context}")]
    Config {
        /// Description of what was wrong with the configuration.
        context: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the error is expected to clear on its own.
    ///
    /// Transient errors are absorbed by the connection manager's backoff
    /// loop and never escape it.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Bluetooth(_)
                | Self::DeviceNotFound { .. }
                | Self::NotConnected
                | Self::ConnectionFailed { .. }
                | Self::ConnectionLost
                | Self::Timeout { .. }
                | Self::Protocol { .. }
        )
    }

    /// Whether the error indicates a misconfigured device entry.
    ///
    /// A device missing the expected service or characteristic will still
    /// be missing it on the next attempt, so the manager retries these only
    /// at its long interval.
    pub fn is_fatal_configuration(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. }
                | Self::CharacteristicNotFound { .. }
                | Self::Config { .. }
        )
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
