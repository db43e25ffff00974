//! Structural frame validation.
//!
//! The assembler emits *candidates*: byte runs that start with the vendor
//! marker and span a plausible frame length. Only the validator promotes a
//! candidate to a [`Frame`], and only after the checksum verifies. Rejection
//! is routine on this class of peripheral (BLE notifications get truncated
//! and corrupted in normal operation), so a rejection is counted and
//! skipped, never raised.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::diagnostics::ProtocolCounters;
use crate::profile::{DeviceProfile, FrameLayout};

/// Why a frame candidate was rejected.
///
/// The checks run in a fixed order (length, declared size, checksum) and
/// the first failure wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RejectionReason {
    /// Candidate is shorter than any structurally complete frame.
    #[error("frame too short: {len} bytes, minimum {min}")]
    TooShort {
        /// Candidate length.
        len: usize,
        /// Minimum structurally complete length.
        min: usize,
    },
    /// Declared frame size disagrees with the bytes actually present.
    #[error("length mismatch: declared {declared} bytes, actual {actual}")]
    LengthMismatch {
        /// Size the frame claims to have.
        declared: usize,
        /// Size it actually has.
        actual: usize,
    },
    /// Trailing checksum byte does not verify.
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Checksum computed over the frame body.
        expected: u8,
        /// Checksum byte carried by the frame.
        actual: u8,
    },
}

/// A checksum-verified protocol frame.
///
/// Only [`FrameValidator::validate`] constructs these, so holding a `Frame`
/// is proof the bytes passed every structural check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Bytes,
    payload_start: usize,
}

impl Frame {
    /// The complete frame, marker and checksum included.
    ///
    /// Field offsets in a [`DeviceProfile`] index into this slice.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The payload between the frame header and the checksum byte.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.bytes[self.payload_start..self.bytes.len() - 1]
    }

    /// The trailing checksum byte.
    #[must_use]
    pub fn checksum(&self) -> u8 {
        self.bytes[self.bytes.len() - 1]
    }

    /// Total frame length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame is empty (never true for a validated frame).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Validates frame candidates against a vendor profile.
pub struct FrameValidator {
    profile: &'static DeviceProfile,
    counters: Arc<ProtocolCounters>,
}

impl FrameValidator {
    /// Create a validator for the given profile, reporting rejections to the
    /// shared counters.
    pub fn new(profile: &'static DeviceProfile, counters: Arc<ProtocolCounters>) -> Self {
        Self { profile, counters }
    }

    /// Check a candidate and promote it to a [`Frame`].
    ///
    /// Checks run in order: minimum length, declared length against actual
    /// length, checksum. The first failing check determines the
    /// [`RejectionReason`]; rejections are counted and must not stop the
    /// caller from processing subsequent candidates.
    pub fn validate(&self, candidate: Bytes) -> Result<Frame, RejectionReason> {
        match self.check(&candidate) {
            Ok(payload_start) => Ok(Frame {
                bytes: candidate,
                payload_start,
            }),
            Err(reason) => {
                debug!(%reason, len = candidate.len(), "rejected frame candidate");
                self.counters.record_rejection(&reason);
                Err(reason)
            }
        }
    }

    fn check(&self, candidate: &[u8]) -> Result<usize, RejectionReason> {
        let min = self.profile.min_frame_len();
        if candidate.len() < min {
            return Err(RejectionReason::TooShort {
                len: candidate.len(),
                min,
            });
        }

        let payload_start = match self.profile.layout {
            FrameLayout::Fixed(expected) => {
                if candidate.len() != expected {
                    return Err(RejectionReason::LengthMismatch {
                        declared: expected,
                        actual: candidate.len(),
                    });
                }
                self.profile.marker.len()
            }
            FrameLayout::LengthPrefixed => {
                let header = self.profile.marker.len() + 1;
                let declared = candidate[self.profile.marker.len()] as usize;
                let actual = candidate.len() - header - 1;
                if declared != actual {
                    return Err(RejectionReason::LengthMismatch { declared, actual });
                }
                header
            }
        };

        let (body, trailer) = candidate.split_at(candidate.len() - 1);
        let expected = self.profile.checksum.compute(body);
        if expected != trailer[0] {
            return Err(RejectionReason::ChecksumMismatch {
                expected,
                actual: trailer[0],
            });
        }

        Ok(payload_start)
    }
}

/// Build a valid fixed-layout JKS50F frame with the given vitals.
///
/// Shared by the assembler, decoder, and coordinator unit tests.
#[cfg(test)]
pub(crate) fn jks50f_frame(finger: u8, spo2: u8, pulse: u8, pi_raw: u16) -> Vec<u8> {
    use crate::profile::ChecksumKind;

    let mut frame = vec![0u8; 69];
    frame[..3].copy_from_slice(&[0xFF, 0x44, 0x01]);
    frame[3] = finger;
    frame[4] = spo2;
    frame[5] = pulse;
    frame[6] = (pi_raw & 0x7F) as u8;
    frame[7] = ((pi_raw >> 7) & 0x3F) as u8;
    frame[68] = ChecksumKind::SumPlusOne.compute(&frame[..68]);
    frame
}

/// Length-prefixed test profile exercising the generic framing path.
#[cfg(test)]
pub(crate) static LP_PROFILE: DeviceProfile = DeviceProfile {
    manufacturer: "Test",
    model: "LP-1",
    marker: &[0xAA],
    layout: FrameLayout::LengthPrefixed,
    checksum: crate::profile::ChecksumKind::Sum,
    finger_offset: 2,
    spo2_offset: 3,
    spo2_sentinel: 127,
    spo2_max: 100,
    pulse_offset: 4,
    pulse_sentinel: 127,
    pulse_max: 250,
    pi_offset: 5,
    pi_invalid_raw: 8191,
    pi_max: 20.0,
    service: pulsox_types::uuids::OXIMETER_SERVICE,
    notify: pulsox_types::uuids::OXIMETER_NOTIFY,
    supported_ouis: &[],
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{ChecksumKind, JKS50F};
    use proptest::prelude::*;

    fn validator(profile: &'static DeviceProfile) -> FrameValidator {
        FrameValidator::new(profile, ProtocolCounters::shared())
    }

    /// Build a valid length-prefixed frame around the given payload.
    fn lp_frame(payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![0xAA, payload.len() as u8];
        frame.extend_from_slice(payload);
        let checksum = ChecksumKind::Sum.compute(&frame);
        frame.push(checksum);
        frame
    }

    #[test]
    fn test_valid_fixed_frame() {
        let v = validator(&JKS50F);
        let frame = v
            .validate(Bytes::from(jks50f_frame(0, 98, 72, 420)))
            .unwrap();
        assert_eq!(frame.len(), 69);
        assert_eq!(frame.as_bytes()[4], 98);
        assert_eq!(frame.payload().len(), 65);
    }

    #[test]
    fn test_valid_length_prefixed_frame() {
        let v = validator(&LP_PROFILE);
        let frame = v
            .validate(Bytes::from(lp_frame(&[1, 2, 3, 4, 5])))
            .unwrap();
        assert_eq!(frame.payload(), &[1, 2, 3, 4, 5]);
        assert_eq!(frame.checksum(), frame.as_bytes()[7]);
    }

    #[test]
    fn test_too_short() {
        let v = validator(&LP_PROFILE);
        let err = v.validate(Bytes::from_static(&[0xAA, 0x05])).unwrap_err();
        assert_eq!(err, RejectionReason::TooShort { len: 2, min: 3 });
    }

    #[test]
    fn test_length_mismatch() {
        let v = validator(&LP_PROFILE);
        // Declares five payload bytes but carries four.
        let mut frame = lp_frame(&[1, 2, 3, 4, 5]);
        frame.remove(4);
        let err = v.validate(Bytes::from(frame)).unwrap_err();
        assert!(matches!(
            err,
            RejectionReason::LengthMismatch {
                declared: 5,
                actual: 4
            }
        ));
    }

    #[test]
    fn test_fixed_length_mismatch() {
        let v = validator(&JKS50F);
        let mut frame = jks50f_frame(0, 98, 72, 420);
        frame.push(0x00);
        let err = v.validate(Bytes::from(frame)).unwrap_err();
        assert!(matches!(err, RejectionReason::LengthMismatch { .. }));
    }

    #[test]
    fn test_checksum_off_by_one() {
        let v = validator(&LP_PROFILE);
        let mut frame = lp_frame(&[1, 2, 3, 4, 5]);
        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(1);
        let err = v.validate(Bytes::from(frame)).unwrap_err();
        assert!(matches!(err, RejectionReason::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_rejections_are_counted() {
        let counters = ProtocolCounters::shared();
        let v = FrameValidator::new(&JKS50F, counters.clone());
        let mut frame = jks50f_frame(0, 98, 72, 420);
        frame[68] ^= 0xFF;
        let _ = v.validate(Bytes::from(frame));
        assert_eq!(counters.snapshot().rejected_checksum_mismatch, 1);
    }

    proptest! {
        /// Corrupting any single non-header byte of a valid frame must yield
        /// a rejection; corruption is never silently accepted.
        #[test]
        fn prop_single_byte_corruption_is_rejected(
            idx in 3usize..69,
            flip in 1u8..=255,
            spo2 in 0u8..=100,
            pulse in 30u8..=200,
        ) {
            let mut frame = jks50f_frame(0, spo2, pulse, 500);
            frame[idx] ^= flip;
            let v = validator(&JKS50F);
            let err = v.validate(Bytes::from(frame)).unwrap_err();
            prop_assert!(matches!(err, RejectionReason::ChecksumMismatch { .. }), "expected ChecksumMismatch");
        }

        /// A valid frame always validates, whatever the vitals.
        #[test]
        fn prop_valid_frames_always_pass(
            finger in 0u8..=1,
            spo2: u8,
            pulse: u8,
            pi_raw in 0u16..8192,
        ) {
            let v = validator(&JKS50F);
            let frame = jks50f_frame(finger, spo2, pulse, pi_raw);
            prop_assert!(v.validate(Bytes::from(frame)).is_ok());
        }
    }
}
