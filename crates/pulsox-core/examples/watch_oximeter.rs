//! Example: Watching a Pulse Oximeter
//!
//! This example connects to a pulse oximeter, subscribes to its
//! measurement stream, and prints readings as they decode, including
//! finger-off and reconnect behavior.
//!
//! Run with: `cargo run --example watch_oximeter -- <DEVICE_ADDRESS>`

use std::env;
use std::time::Duration;

use pulsox_core::ble::BleTransport;
use pulsox_core::connection::ConnectionManager;
use pulsox_core::coordinator::{CoordinatorOptions, ReadingCoordinator};
use pulsox_core::events::DeviceEvent;
use pulsox_core::{BackoffPolicy, profile};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Get device address from command line
    let args: Vec<String> = env::args().collect();
    let address = if args.len() > 1 {
        args[1].clone()
    } else {
        eprintln!("Usage: {} <DEVICE_ADDRESS>", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} E0:4E:7A:12:34:56", args[0]);
        std::process::exit(1);
    };

    println!("Connecting to {}...", address);

    let transport = BleTransport::new(&address, &profile::JKS50F).await?;
    let manager = ConnectionManager::new(transport, &profile::JKS50F, BackoffPolicy::default())?;
    let handle = ReadingCoordinator::spawn(manager, CoordinatorOptions::default())?;
    let mut events = handle.subscribe_events();

    println!("Watching for readings (Ctrl-C to stop)...");
    println!();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                match event {
                    Ok(DeviceEvent::Connected { device }) => {
                        println!("[connected: {}]", device.address);
                    }
                    Ok(DeviceEvent::Disconnected { reason, .. }) => {
                        println!("[disconnected: {:?}]", reason);
                    }
                    Ok(DeviceEvent::Reading { reading, .. }) => {
                        println!("  {}", reading);
                    }
                    Ok(DeviceEvent::ReconnectScheduled { attempt, delay_ms, .. }) => {
                        println!("[reconnect attempt {} in {} ms]", attempt, delay_ms);
                    }
                    Ok(DeviceEvent::BecameUnavailable { .. }) => {
                        println!("[reading unavailable]");
                    }
                    Ok(_) => {}
                    Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
                }
            }
        }
    }

    println!();
    println!("Shutting down...");
    let snapshot = handle.diagnostics_snapshot().await;
    println!(
        "Session stats: {} frames, {} readings, {} rejections, {} noise bytes",
        snapshot.counters.frames_assembled,
        snapshot.counters.readings_published,
        snapshot.counters.total_rejections(),
        snapshot.counters.garbage_bytes
    );

    handle.shutdown().await;
    Ok(())
}
