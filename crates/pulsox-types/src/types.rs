//! Core types for pulse-oximeter readings.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use time::OffsetDateTime;

/// Signal-quality confidence derived from a reading.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new levels
/// in future versions without breaking downstream code.
///
/// # Ordering
///
/// Levels are ordered by confidence: `NoSignal < Weak < Good`.
/// This allows threshold comparisons like
/// `if quality >= SignalQuality::Weak { record(...) }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum SignalQuality {
    /// No usable signal (typically no finger on the sensor).
    NoSignal = 0,
    /// Signal present but weak; values may lag or drop out.
    Weak = 1,
    /// Strong signal with stable perfusion.
    Good = 2,
}

impl SignalQuality {
    /// Derive a confidence level from finger presence and perfusion index.
    ///
    /// Perfusion index is the ratio of pulsatile to static blood flow at the
    /// sensor site; below roughly 0.4% the pulse waveform is close to the
    /// noise floor and SpO₂/pulse values become unreliable.
    ///
    /// # Examples
    ///
    /// ```
    /// use pulsox_types::SignalQuality;
    ///
    /// assert_eq!(SignalQuality::derive(false, Some(5.0)), SignalQuality::NoSignal);
    /// assert_eq!(SignalQuality::derive(true, Some(0.2)), SignalQuality::Weak);
    /// assert_eq!(SignalQuality::derive(true, None), SignalQuality::Weak);
    /// assert_eq!(SignalQuality::derive(true, Some(2.1)), SignalQuality::Good);
    /// ```
    #[must_use]
    pub fn derive(finger_present: bool, perfusion_index: Option<f32>) -> Self {
        if !finger_present {
            return SignalQuality::NoSignal;
        }
        match perfusion_index {
            Some(pi) if pi >= 0.4 => SignalQuality::Good,
            // PI unavailable while the finger is on means the device is
            // still locking onto the waveform.
            _ => SignalQuality::Weak,
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalQuality::NoSignal => write!(f, "No signal"),
            SignalQuality::Weak => write!(f, "Weak"),
            SignalQuality::Good => write!(f, "Good"),
        }
    }
}

/// One decoded physiological snapshot from a pulse oximeter.
///
/// Optional fields are `None` when the device reported its documented
/// "no valid value" sentinel. A sensor searching for a pulse reports
/// sentinels, not zeros, and the distinction matters: 0% SpO₂ is a
/// physiologically alarming value, while `None` just means "no reading".
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Blood-oxygen saturation in percent (0–100).
    pub spo2: Option<u8>,
    /// Pulse rate in beats per minute.
    pub pulse_rate: Option<u8>,
    /// Perfusion index in percent.
    pub perfusion_index: Option<f32>,
    /// Whether a finger is on the sensor, from the device's dedicated
    /// status byte. Never inferred from SpO₂: a device can report a stale
    /// non-zero SpO₂ for a moment after finger removal.
    pub finger_present: bool,
    /// Derived signal confidence.
    pub signal_quality: SignalQuality,
    /// When this snapshot was decoded.
    pub captured_at: OffsetDateTime,
}

impl Reading {
    /// Whether both vital values are present.
    ///
    /// A complete reading has numeric SpO₂ and pulse rate; perfusion index
    /// may still be absent while the device locks on.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.spo2.is_some() && self.pulse_rate.is_some()
    }

    /// A snapshot representing a sensor with no finger attached.
    #[must_use]
    pub fn no_finger(captured_at: OffsetDateTime) -> Self {
        Self {
            spo2: None,
            pulse_rate: None,
            perfusion_index: None,
            finger_present: false,
            signal_quality: SignalQuality::NoSignal,
            captured_at,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.spo2, self.pulse_rate) {
            (Some(spo2), Some(pulse)) => {
                write!(f, "SpO2 {spo2}%, pulse {pulse} bpm")?;
                if let Some(pi) = self.perfusion_index {
                    write!(f, ", PI {pi:.2}%")?;
                }
                Ok(())
            }
            _ if !self.finger_present => write!(f, "no finger"),
            _ => write!(f, "searching"),
        }
    }
}
