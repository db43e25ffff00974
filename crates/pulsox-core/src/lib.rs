//! BLE protocol layer for pulse-oximeter peripherals.
//!
//! This crate turns the raw notification stream of a vendor pulse oximeter
//! into validated physiological readings: blood-oxygen saturation, pulse
//! rate, perfusion index, and finger presence.
//!
//! # Features
//!
//! - **Frame reassembly**: notification chunks are not frame-aligned;
//!   the assembler reconstructs frames across any fragmentation
//! - **Structural validation**: marker, length, and checksum checks with
//!   per-reason rejection counters
//! - **Sentinel-aware decoding**: "searching" sentinels become absent
//!   values, never fake zeros
//! - **Connection management**: exponential-backoff reconnect with strict
//!   single-attempt and session-isolation guarantees
//! - **Coordination**: a periodic update loop publishing the latest
//!   reading, with staleness and failure-threshold degradation
//! - **Diagnostics**: serializable counters and state snapshots
//! - **Mock transport**: full protocol testing without BLE hardware
//!
//! # Supported Devices
//!
//! | Device | Vitals |
//! |--------|--------|
//! | JKS50F | SpO₂, pulse rate, perfusion index, finger presence |
//!
//! Support for a device is a [`profile::DeviceProfile`]: marker bytes,
//! frame layout, checksum algorithm, field offsets, and sentinel values.
//!
//! # Quick Start
//!
//! ```no_run
//! use pulsox_core::ble::BleTransport;
//! use pulsox_core::connection::ConnectionManager;
//! use pulsox_core::coordinator::{CoordinatorOptions, ReadingCoordinator};
//! use pulsox_core::{BackoffPolicy, profile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = BleTransport::new("E0:4E:7A:12:34:56", &profile::JKS50F).await?;
//!     let manager = ConnectionManager::new(transport, &profile::JKS50F, BackoffPolicy::default())?;
//!     let handle = ReadingCoordinator::spawn(manager, CoordinatorOptions::default())?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     match handle.latest_reading() {
//!         Some(reading) => println!("{reading}"),
//!         None => println!("unavailable"),
//!     }
//!
//!     handle.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod assembler;
pub mod backoff;
pub mod ble;
pub mod connection;
pub mod coordinator;
pub mod decoder;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod mock;
pub mod profile;
pub mod transport;
pub mod validator;

// Re-export types from pulsox-types for convenience
pub use pulsox_types::{Reading, SignalQuality};
pub use pulsox_types::uuids;

// Core exports
pub use assembler::FrameAssembler;
pub use backoff::BackoffPolicy;
pub use ble::BleTransport;
pub use connection::{ConnectOutcome, ConnectionManager, ConnectionState};
pub use coordinator::{CoordinatorHandle, CoordinatorOptions, ReadingCoordinator};
pub use decoder::{DecodeError, decode_frame};
pub use diagnostics::{CounterSnapshot, DiagnosticsSnapshot, ProtocolCounters};
pub use error::{ConnectionFailureReason, Error, Result};
pub use events::{DeviceEvent, DeviceId, EventDispatcher, EventReceiver, EventSender};
pub use mock::MockTransport;
pub use profile::{ChecksumKind, DeviceProfile, FrameLayout, JKS50F};
pub use transport::{ChunkPoll, Link, Transport};
pub use validator::{Frame, FrameValidator, RejectionReason};
