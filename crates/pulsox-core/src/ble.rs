//! btleplug-backed [`Transport`] implementation.
//!
//! This is the only module that touches the platform BLE stack. It finds
//! the peripheral by identifier, connects, subscribes to the vendor notify
//! characteristic, and forwards notification payloads into the [`Link`]
//! channel. A disconnect event from the adapter (or the notification
//! stream ending) closes the channel, which is how the rest of the layer
//! learns the link is gone.
//!
//! # Platform notes
//!
//! On Linux and Windows peripherals are identified by MAC address
//! (`AA:BB:CC:DD:EE:FF`); on macOS CoreBluetooth hides the MAC and assigns
//! a per-host UUID, so pass the peripheral id string instead. Both are
//! matched against [`Transport::address`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, trace, warn};

use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, ValueNotification,
};
use btleplug::platform::{Adapter, Manager, Peripheral};

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::profile::DeviceProfile;
use crate::transport::{Link, Transport};

/// How long to let the adapter scan before checking for the peripheral.
const SCAN_SETTLE: Duration = Duration::from_secs(2);

/// Channel capacity for in-flight notification chunks. Frames are tiny and
/// drained every coordinator cycle; this absorbs bursts, not backlog.
const CHUNK_BUFFER: usize = 64;

/// A [`Transport`] over the platform Bluetooth stack.
pub struct BleTransport {
    adapter: Adapter,
    address: String,
    profile: &'static DeviceProfile,
    /// The live connection, if any, with its notify characteristic.
    connected: Mutex<Option<(Peripheral, Characteristic)>>,
}

impl BleTransport {
    /// Create a transport for the peripheral at `address`, using the first
    /// available Bluetooth adapter.
    pub async fn new(address: &str, profile: &'static DeviceProfile) -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(Error::DeviceNotFound(DeviceNotFoundReason::NoAdapter))?;

        if !profile.matches_address(address) {
            // Not fatal: macOS identifiers carry no OUI, and clone devices
            // ship with unregistered radios.
            debug!(
                address,
                model = profile.model,
                "address OUI not registered for this device family"
            );
        }

        Ok(Self {
            adapter,
            address: address.to_string(),
            profile,
            connected: Mutex::new(None),
        })
    }

    /// Scan briefly and locate the peripheral by identifier or MAC address.
    async fn find_peripheral(&self) -> Result<Peripheral> {
        self.adapter
            .start_scan(ScanFilter {
                services: vec![self.profile.service],
            })
            .await?;
        tokio::time::sleep(SCAN_SETTLE).await;
        let peripherals = self.adapter.peripherals().await?;
        let _ = self.adapter.stop_scan().await;

        for peripheral in peripherals {
            if peripheral.id().to_string().eq_ignore_ascii_case(&self.address) {
                return Ok(peripheral);
            }
            if let Ok(Some(properties)) = peripheral.properties().await
                && properties
                    .address
                    .to_string()
                    .eq_ignore_ascii_case(&self.address)
            {
                return Ok(peripheral);
            }
        }
        Err(Error::device_not_found(&self.address))
    }

    /// Locate the notify characteristic on a connected peripheral.
    fn notify_characteristic(&self, peripheral: &Peripheral) -> Result<Characteristic> {
        let characteristics = peripheral.characteristics();
        let service_count = peripheral.services().len();
        characteristics
            .into_iter()
            .find(|c| c.uuid == self.profile.notify && c.properties.contains(CharPropFlags::NOTIFY))
            .ok_or_else(|| {
                Error::characteristic_not_found(self.profile.notify.to_string(), service_count)
            })
    }
}

#[async_trait]
impl Transport for BleTransport {
    async fn open(&self) -> Result<Link> {
        let peripheral = self.find_peripheral().await?;

        if !peripheral.is_connected().await? {
            peripheral.connect().await?;
        }
        peripheral.discover_services().await?;

        let characteristic = self.notify_characteristic(&peripheral)?;
        peripheral.subscribe(&characteristic).await?;

        let mut notifications = peripheral.notifications().await?;
        let mut adapter_events = self.adapter.events().await?;
        let peripheral_id = peripheral.id();
        let notify_uuid = self.profile.notify;
        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);

        // Forward notification payloads until the stream ends or the
        // adapter reports the peripheral gone. Dropping `tx` is the
        // link-loss signal for the rest of the layer.
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    notification = notifications.next() => {
                        match notification {
                            Some(ValueNotification { uuid, value, .. }) => {
                                if uuid != notify_uuid {
                                    continue;
                                }
                                trace!(len = value.len(), "notification chunk");
                                if tx.send(Bytes::from(value)).await.is_err() {
                                    // Receiver gone: session was torn down.
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    event = adapter_events.next() => {
                        match event {
                            Some(CentralEvent::DeviceDisconnected(id)) if id == peripheral_id => {
                                debug!("adapter reported peripheral disconnected");
                                break;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }
        });

        *self.connected.lock().await = Some((peripheral, characteristic));
        Ok(Link::new(rx))
    }

    async fn close(&self) -> Result<()> {
        let Some((peripheral, characteristic)) = self.connected.lock().await.take() else {
            return Ok(());
        };
        if peripheral.is_connected().await.unwrap_or(false) {
            if let Err(error) = peripheral.unsubscribe(&characteristic).await {
                warn!(%error, "unsubscribe failed during teardown");
            }
            peripheral.disconnect().await?;
        }
        Ok(())
    }

    fn address(&self) -> &str {
        &self.address
    }
}
