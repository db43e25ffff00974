//! Hardware tests for pulsox-core.
//!
//! These tests require a real pulse oximeter in range and should be run
//! with: `cargo test --package pulsox-core -- --ignored --nocapture`
//!
//! Set the PULSOX_DEVICE environment variable to the peripheral address
//! (MAC on Linux/Windows, CoreBluetooth id on macOS):
//! `PULSOX_DEVICE="E0:4E:7A:12:34:56" cargo test -- --ignored`

use std::env;
use std::time::Duration;

use pulsox_core::ble::BleTransport;
use pulsox_core::connection::ConnectionManager;
use pulsox_core::coordinator::{CoordinatorOptions, ReadingCoordinator};
use pulsox_core::{BackoffPolicy, profile};

/// Get the device address from the environment.
fn get_device_address() -> String {
    env::var("PULSOX_DEVICE").expect("set PULSOX_DEVICE to run hardware tests")
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_connect_and_stream_readings() {
    let address = get_device_address();
    println!("Connecting to oximeter: {}", address);

    let transport = BleTransport::new(&address, &profile::JKS50F)
        .await
        .expect("transport setup failed");
    let manager = ConnectionManager::new(transport, &profile::JKS50F, BackoffPolicy::default())
        .expect("manager setup failed");
    let handle =
        ReadingCoordinator::spawn(manager, CoordinatorOptions::default()).expect("spawn failed");

    // Watch the stream for half a minute; a finger on the sensor should
    // produce readings within a few seconds.
    for _ in 0..15 {
        tokio::time::sleep(Duration::from_secs(2)).await;
        match handle.latest_reading() {
            Some(reading) => println!("  {}", reading),
            None => println!("  unavailable ({:?})", handle.connection_state().await),
        }
    }

    let snapshot = handle.diagnostics_snapshot().await;
    println!(
        "frames={} readings={} rejections={} garbage={}",
        snapshot.counters.frames_assembled,
        snapshot.counters.readings_published,
        snapshot.counters.total_rejections(),
        snapshot.counters.garbage_bytes
    );

    handle.shutdown().await;
    println!("Disconnected.");
}
