//! Vendor protocol profiles.
//!
//! Budget pulse oximeters share a family resemblance (marker-delimited
//! frames on a vendor serial characteristic) but differ in marker bytes,
//! framing, checksum algorithm, field offsets, and sentinel values. Those
//! differences are configuration, not code: a [`DeviceProfile`] captures
//! everything the assembler, validator, and decoder need to speak one
//! vendor's dialect, validated against captured frames from real hardware.

use uuid::Uuid;

use pulsox_types::uuids;

/// Checksum algorithm over all frame bytes preceding the checksum byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ChecksumKind {
    /// Sum of preceding bytes, modulo 256.
    Sum,
    /// Sum of preceding bytes plus one, modulo 256 (JKS50F).
    SumPlusOne,
}

impl ChecksumKind {
    /// Compute the checksum over `data` (the frame minus its checksum byte).
    #[must_use]
    pub fn compute(&self, data: &[u8]) -> u8 {
        let sum: u32 = data.iter().map(|&b| b as u32).sum();
        match self {
            ChecksumKind::Sum => (sum & 0xFF) as u8,
            ChecksumKind::SumPlusOne => ((sum + 1) & 0xFF) as u8,
        }
    }
}

/// How a frame's total size is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameLayout {
    /// Every frame is exactly this many bytes, marker and checksum included.
    Fixed(usize),
    /// A one-byte payload length follows the marker; the frame is
    /// `marker + length byte + payload + checksum byte`.
    LengthPrefixed,
}

/// Protocol constants for one oximeter model.
///
/// Profiles are plain data and `const`-constructible so device support can
/// be added without touching the protocol machinery.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    /// Manufacturer name for device registration.
    pub manufacturer: &'static str,
    /// Model name.
    pub model: &'static str,
    /// Fixed-position start marker opening every frame.
    pub marker: &'static [u8],
    /// Frame sizing rule.
    pub layout: FrameLayout,
    /// Checksum algorithm for the trailing byte.
    pub checksum: ChecksumKind,
    /// Offset of the finger-status byte (zero means finger present).
    pub finger_offset: usize,
    /// Offset of the SpO₂ byte.
    pub spo2_offset: usize,
    /// SpO₂ value meaning "no valid reading".
    pub spo2_sentinel: u8,
    /// Highest plausible SpO₂ value.
    pub spo2_max: u8,
    /// Offset of the pulse-rate byte.
    pub pulse_offset: usize,
    /// Pulse value meaning "no valid reading".
    pub pulse_sentinel: u8,
    /// Highest plausible pulse rate in bpm.
    pub pulse_max: u8,
    /// Offset of the two perfusion-index bytes.
    pub pi_offset: usize,
    /// Raw perfusion-index value meaning "no valid reading".
    pub pi_invalid_raw: u16,
    /// Highest plausible perfusion index in percent.
    pub pi_max: f32,
    /// GATT service carrying the measurement stream.
    pub service: Uuid,
    /// Notify characteristic delivering frames.
    pub notify: Uuid,
    /// MAC address OUI prefixes (first six hex digits) of the radio vendor.
    pub supported_ouis: &'static [&'static str],
}

impl DeviceProfile {
    /// Smallest byte count that could be a structurally complete frame.
    #[must_use]
    pub fn min_frame_len(&self) -> usize {
        match self.layout {
            FrameLayout::Fixed(len) => len,
            // Marker, length byte, empty payload, checksum.
            FrameLayout::LengthPrefixed => self.marker.len() + 2,
        }
    }

    /// Largest byte count a single frame can occupy.
    #[must_use]
    pub fn max_frame_len(&self) -> usize {
        match self.layout {
            FrameLayout::Fixed(len) => len,
            FrameLayout::LengthPrefixed => self.marker.len() + 1 + u8::MAX as usize + 1,
        }
    }

    /// Whether a peripheral address plausibly belongs to this device family,
    /// judged by the radio vendor's registered OUI prefixes.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulsox_core::profile::JKS50F;
    ///
    /// assert!(JKS50F.matches_address("E0:4E:7A:12:34:56"));
    /// assert!(!JKS50F.matches_address("00:11:22:33:44:55"));
    /// ```
    #[must_use]
    pub fn matches_address(&self, address: &str) -> bool {
        let normalized: String = address
            .chars()
            .filter(char::is_ascii_hexdigit)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        self.supported_ouis
            .iter()
            .any(|oui| normalized.starts_with(oui))
    }
}

/// JKS50F fingertip pulse oximeter.
///
/// Marker, frame size, checksum, offsets, and sentinels were validated
/// against notification captures from production units. The radio module is
/// a Nanjing Qinheng (WCH) part, hence the OUI list.
pub const JKS50F: DeviceProfile = DeviceProfile {
    manufacturer: "Guangdong Health Medical Technology Co., Ltd.",
    model: "JKS50F",
    marker: &[0xFF, 0x44, 0x01],
    layout: FrameLayout::Fixed(69),
    checksum: ChecksumKind::SumPlusOne,
    finger_offset: 3,
    spo2_offset: 4,
    spo2_sentinel: 127,
    spo2_max: 100,
    pulse_offset: 5,
    pulse_sentinel: 127,
    pulse_max: 250,
    pi_offset: 6,
    pi_invalid_raw: 8191,
    pi_max: 20.0,
    service: uuids::OXIMETER_SERVICE,
    notify: uuids::OXIMETER_NOTIFY,
    supported_ouis: &[
        // Registered OUIs for Nanjing Qinheng Microelectronics Co., Ltd.
        "DC045A", "5414A7", "E04E7A", "0C3D5E", "701988", "C817F5", "50547B", "5C5310",
    ],
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_sum() {
        assert_eq!(ChecksumKind::Sum.compute(&[0x01, 0x02, 0x03]), 0x06);
        assert_eq!(ChecksumKind::Sum.compute(&[0xFF, 0xFF]), 0xFE);
        assert_eq!(ChecksumKind::Sum.compute(&[]), 0x00);
    }

    #[test]
    fn test_checksum_sum_plus_one() {
        assert_eq!(ChecksumKind::SumPlusOne.compute(&[0x01, 0x02, 0x03]), 0x07);
        assert_eq!(ChecksumKind::SumPlusOne.compute(&[0xFF]), 0x00);
    }

    #[test]
    fn test_jks50f_frame_bounds() {
        assert_eq!(JKS50F.min_frame_len(), 69);
        assert_eq!(JKS50F.max_frame_len(), 69);
    }

    #[test]
    fn test_length_prefixed_bounds() {
        let profile = DeviceProfile {
            marker: &[0xAA],
            layout: FrameLayout::LengthPrefixed,
            ..JKS50F
        };
        assert_eq!(profile.min_frame_len(), 3);
        assert_eq!(profile.max_frame_len(), 258);
    }

    #[test]
    fn test_oui_matching() {
        assert!(JKS50F.matches_address("DC:04:5A:00:00:01"));
        assert!(JKS50F.matches_address("dc045a000001"));
        assert!(!JKS50F.matches_address("AB:CD:EF:00:00:01"));
        // macOS exposes a CoreBluetooth UUID instead of a MAC address.
        assert!(!JKS50F.matches_address("6ba7b810-9dad-11d1-80b4-00c04fd430c8"));
    }
}
