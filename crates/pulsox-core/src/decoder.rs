//! Semantic decoding of validated frames.
//!
//! A frame that survives the validator is structurally sound but may still
//! carry nonsense: these devices report sentinel bytes while searching for
//! a pulse, and corruption occasionally survives an additive checksum.
//! Decoding applies the vendor's sentinel conventions and rejects values
//! outside documented physiological ranges instead of publishing them.
//!
//! Decoding is pure: the same frame, profile, and timestamp always produce
//! the same result, which keeps the hot path trivially testable.

use thiserror::Error;
use time::OffsetDateTime;

use pulsox_types::{Reading, SignalQuality};

use crate::profile::DeviceProfile;
use crate::validator::Frame;

/// Why a structurally valid frame could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[non_exhaustive]
pub enum DecodeError {
    /// A field offset points past the end of the frame.
    #[error("frame too short for field '{field}': needs byte {offset}, frame has {len}")]
    Truncated {
        /// Field being extracted.
        field: &'static str,
        /// Offset that was out of bounds.
        offset: usize,
        /// Actual frame length.
        len: usize,
    },
    /// A field value is outside its documented plausible range.
    #[error("value out of range for '{field}': {value}")]
    OutOfRange {
        /// Field that was implausible.
        field: &'static str,
        /// The offending value.
        value: f64,
    },
}

/// Decode one validated frame into a [`Reading`].
///
/// Sentinel bytes become `None`: a searching sensor is "no reading", never
/// "0%". Finger presence comes from the dedicated status byte; values above
/// the profile's plausibility ceilings yield [`DecodeError::OutOfRange`].
pub fn decode_frame(
    frame: &Frame,
    profile: &DeviceProfile,
    captured_at: OffsetDateTime,
) -> Result<Reading, DecodeError> {
    let bytes = frame.as_bytes();
    let field = |offset: usize, field: &'static str| {
        bytes
            .get(offset)
            .copied()
            .ok_or(DecodeError::Truncated {
                field,
                offset,
                len: bytes.len(),
            })
    };

    // Zero in the status byte means a finger is on the sensor.
    let finger_present = field(profile.finger_offset, "finger_status")? == 0;

    let spo2_raw = field(profile.spo2_offset, "spo2")?;
    let spo2 = if spo2_raw == profile.spo2_sentinel {
        None
    } else if spo2_raw > profile.spo2_max {
        return Err(DecodeError::OutOfRange {
            field: "spo2",
            value: spo2_raw as f64,
        });
    } else {
        Some(spo2_raw)
    };

    let pulse_raw = field(profile.pulse_offset, "pulse_rate")?;
    let pulse_rate = if pulse_raw == profile.pulse_sentinel || pulse_raw == 0 {
        None
    } else if pulse_raw > profile.pulse_max {
        return Err(DecodeError::OutOfRange {
            field: "pulse_rate",
            value: pulse_raw as f64,
        });
    } else {
        Some(pulse_raw)
    };

    // Perfusion index spans two bytes: seven value bits in the first, six
    // in the second, in hundredths of a percent.
    let pi_lo = field(profile.pi_offset, "perfusion_index")?;
    let pi_hi = field(profile.pi_offset + 1, "perfusion_index")?;
    let pi_raw = (pi_lo & 0x7F) as u16 | (((pi_hi & 0x3F) as u16) << 7);
    let perfusion_index = if pi_raw == profile.pi_invalid_raw {
        None
    } else {
        let pi = pi_raw as f32 / 100.0;
        if pi > profile.pi_max {
            return Err(DecodeError::OutOfRange {
                field: "perfusion_index",
                value: pi as f64,
            });
        }
        Some(pi)
    };

    Ok(Reading {
        spo2,
        pulse_rate,
        perfusion_index,
        finger_present,
        signal_quality: SignalQuality::derive(finger_present, perfusion_index),
        captured_at,
    })
}
