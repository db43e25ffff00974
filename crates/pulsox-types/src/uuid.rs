//! Bluetooth UUIDs for supported pulse-oximeter peripherals.
//!
//! The budget oximeters this crate targets expose a generic vendor serial
//! service (the common `FFE0`/`FFE1` UART-over-GATT pattern) rather than the
//! standard Pulse Oximeter Service, and stream measurement frames as
//! notifications on the `FFE1` characteristic.

use uuid::{Uuid, uuid};

// --- Vendor serial service (JKS50F and compatible) ---

/// Vendor serial service carrying the measurement stream.
pub const OXIMETER_SERVICE: Uuid = uuid!("0000ffe0-0000-1000-8000-00805f9b34fb");

/// Notify characteristic delivering raw measurement frames.
pub const OXIMETER_NOTIFY: Uuid = uuid!("0000ffe1-0000-1000-8000-00805f9b34fb");

// --- Standard BLE Service UUIDs ---

/// Generic Access Profile (GAP) service.
pub const GAP_SERVICE: Uuid = uuid!("00001800-0000-1000-8000-00805f9b34fb");

/// Device name characteristic.
pub const DEVICE_NAME: Uuid = uuid!("00002a00-0000-1000-8000-00805f9b34fb");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_and_notify_share_base() {
        // Both live in the standard Bluetooth base UUID range.
        let service = OXIMETER_SERVICE.as_u128();
        let notify = OXIMETER_NOTIFY.as_u128();
        assert_eq!(service & 0xFFFF_FFFF_FFFF_FFFF_FFFF_FFFF, notify & 0xFFFF_FFFF_FFFF_FFFF_FFFF_FFFF);
        assert_ne!(service, notify);
    }
}
