//! BLE scanning functionality.
//!
//! Provides the scanner used to locate configured scales by address. The
//! scale only advertises while someone steps on it, so a scan window that
//! ends without a sighting is an expected, transient outcome.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::StreamExt;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, trace};

use crate::error::{Error, Result};

/// BLE scanner for locating configured scales.
pub struct BleScanner {
    /// The BLE adapter to use for scanning.
    adapter: Adapter,
}

impl BleScanner {
    /// Create a new BLE scanner on the first available adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Create a scanner with a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Scan until the peripheral with the given address appears.
    ///
    /// The scan is stopped before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] when the window elapses without a
    /// sighting.
    pub async fn find_device(&self, address: &str, window: Duration) -> Result<Peripheral> {
        debug!("Scanning for {} ({:?} window)", address, window);

        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(Error::Bluetooth)?;

        let result = timeout(window, self.watch_for(address)).await;

        // Stop scanning regardless of how the wait ended.
        if let Err(e) = self.adapter.stop_scan().await {
            debug!("Failed to stop scan: {}", e);
        }

        match result {
            Ok(found) => found,
            Err(_elapsed) => Err(Error::DeviceNotFound {
                address: address.to_string(),
            }),
        }
    }

    /// Watch adapter events until the target address shows up.
    async fn watch_for(&self, address: &str) -> Result<Peripheral> {
        // The device may already be known to the adapter from a previous
        // scan; check before waiting for fresh advertisements.
        if let Some(peripheral) = self.known_peripheral(address).await? {
            return Ok(peripheral);
        }

        let mut events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };

            let peripheral = match self.adapter.peripheral(&id).await {
                Ok(p) => p,
                Err(e) => {
                    trace!("Failed to get peripheral {:?}: {}", id, e);
                    continue;
                }
            };

            if peripheral_matches(&peripheral, address).await {
                info!("Found scale {}", address);
                return Ok(peripheral);
            }
        }

        Err(Error::DeviceNotFound {
            address: address.to_string(),
        })
    }

    /// Look for the address among peripherals the adapter already knows.
    async fn known_peripheral(&self, address: &str) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await.map_err(Error::Bluetooth)? {
            if peripheral_matches(&peripheral, address).await {
                debug!("Scale {} already known to adapter", address);
                return Ok(Some(peripheral));
            }
        }

        Ok(None)
    }
}

/// Compare a peripheral's address with a configured one, ignoring case.
async fn peripheral_matches(peripheral: &Peripheral, address: &str) -> bool {
    match peripheral.properties().await {
        Ok(Some(properties)) => properties.address.to_string().eq_ignore_ascii_case(address),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_address_comparison_is_case_insensitive() {
        // The comparison itself, without a live adapter.
        assert!("AA:BB:CC:DD:EE:FF".eq_ignore_ascii_case("aa:bb:cc:dd:ee:ff"));
        assert!(!"AA:BB:CC:DD:EE:01".eq_ignore_ascii_case("aa:bb:cc:dd:ee:ff"));
    }
}
