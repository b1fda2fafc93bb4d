//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for BS440 scale communication.

use uuid::Uuid;

// Device Information Service (Standard BLE)
/// Standard BLE Device Information Service UUID.
pub const DEVICE_INFO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_180a_0000_1000_8000_00805f9b34fb);
/// Manufacturer Name characteristic UUID.
pub const MANUFACTURER_NAME_UUID: Uuid = Uuid::from_u128(0x0000_2a29_0000_1000_8000_00805f9b34fb);
/// Model Number characteristic UUID.
pub const MODEL_NUMBER_UUID: Uuid = Uuid::from_u128(0x0000_2a24_0000_1000_8000_00805f9b34fb);
/// Firmware Revision characteristic UUID.
pub const FIRMWARE_REVISION_UUID: Uuid = Uuid::from_u128(0x0000_2a26_0000_1000_8000_00805f9b34fb);

// Weight Scale Service (Medisana custom)
/// BS440 weight scale service UUID.
pub const WEIGHT_SCALE_SERVICE_UUID: Uuid =
    Uuid::from_u128(0x0000_78b2_0000_1000_8000_00805f9b34fb);
/// Command characteristic UUID (write: time sync, record request, ack).
pub const COMMAND_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x0000_8a81_0000_1000_8000_00805f9b34fb);
/// Weight record characteristic UUID (indicate).
pub const WEIGHT_RECORD_UUID: Uuid = Uuid::from_u128(0x0000_8a21_0000_1000_8000_00805f9b34fb);
/// Body composition record characteristic UUID (indicate).
pub const BODY_RECORD_UUID: Uuid = Uuid::from_u128(0x0000_8a22_0000_1000_8000_00805f9b34fb);
/// Person profile record characteristic UUID (indicate).
pub const PERSON_RECORD_UUID: Uuid = Uuid::from_u128(0x0000_8a82_0000_1000_8000_00805f9b34fb);

/// The characteristics that carry record indications during a transfer.
pub const RECORD_CHARACTERISTICS: [Uuid; 3] =
    [WEIGHT_RECORD_UUID, BODY_RECORD_UUID, PERSON_RECORD_UUID];

/// Check if a service UUID is the scale's weight service.
pub fn is_weight_scale_service(uuid: &Uuid) -> bool {
    *uuid == WEIGHT_SCALE_SERVICE_UUID
}

/// Check if a characteristic UUID carries record indications.
pub fn is_record_characteristic(uuid: &Uuid) -> bool {
    RECORD_CHARACTERISTICS.contains(uuid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        let weight_service = WEIGHT_SCALE_SERVICE_UUID.to_string();
        assert!(weight_service.contains("78b2"));

        let command = COMMAND_CHARACTERISTIC_UUID.to_string();
        assert!(command.contains("8a81"));
    }

    #[test]
    fn test_is_weight_scale_service() {
        assert!(is_weight_scale_service(&WEIGHT_SCALE_SERVICE_UUID));
        assert!(!is_weight_scale_service(&DEVICE_INFO_SERVICE_UUID));
    }

    #[test]
    fn test_is_record_characteristic() {
        assert!(is_record_characteristic(&WEIGHT_RECORD_UUID));
        assert!(is_record_characteristic(&BODY_RECORD_UUID));
        assert!(is_record_characteristic(&PERSON_RECORD_UUID));
        assert!(!is_record_characteristic(&COMMAND_CHARACTERISTIC_UUID));
    }
}
