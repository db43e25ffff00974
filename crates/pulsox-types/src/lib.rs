//! Platform-agnostic types for BLE pulse-oximeter readings.
//!
//! This crate provides the shared data types used by the protocol layer in
//! `pulsox-core`, kept free of BLE-stack dependencies so they can also be
//! consumed by host integrations and tooling.
//!
//! # Features
//!
//! - [`Reading`]: a decoded physiological snapshot (SpO₂, pulse rate,
//!   perfusion index, finger presence)
//! - [`SignalQuality`]: derived signal confidence
//! - UUID constants for the BLE characteristics the supported devices expose
//!
//! # Example
//!
//! ```
//! use pulsox_types::{Reading, SignalQuality};
//! use time::OffsetDateTime;
//!
//! let reading = Reading {
//!     spo2: Some(98),
//!     pulse_rate: Some(72),
//!     perfusion_index: Some(4.2),
//!     finger_present: true,
//!     signal_quality: SignalQuality::Good,
//!     captured_at: OffsetDateTime::UNIX_EPOCH,
//! };
//! assert!(reading.is_complete());
//! ```

pub mod types;
pub mod uuid;

pub use types::{Reading, SignalQuality};
pub use uuid as uuids;
