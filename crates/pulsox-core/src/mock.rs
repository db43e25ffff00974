//! Mock transport implementation for testing.
//!
//! [`MockTransport`] implements the [`Transport`] trait without any BLE
//! hardware, letting tests script connect failures, notification delivery,
//! and link drops.
//!
//! # Features
//!
//! - **Failure injection**: fail the next N connects, or every connect
//! - **Latency simulation**: artificial connect delay
//! - **Chunk scripting**: push arbitrary notification payloads
//! - **Link control**: drop the live link to simulate a peripheral
//!   going away mid-session

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::sync::mpsc;

use crate::error::{ConnectionFailureReason, Error, Result};
use crate::transport::{Link, Transport};

/// Channel capacity for scripted notification chunks.
const CHUNK_BUFFER: usize = 64;

/// A scripted stand-in for a BLE pulse oximeter.
///
/// Cloning is cheap and shares state, so tests can keep one handle for
/// scripting while the connection machinery owns another.
///
/// # Example
///
/// ```
/// use pulsox_core::mock::MockTransport;
/// use pulsox_core::transport::Transport;
///
/// #[tokio::main]
/// async fn main() {
///     let mock = MockTransport::new("AA:BB:CC:DD:EE:FF");
///     let mut link = mock.open().await.unwrap();
///
///     mock.push_chunk(&[0x01, 0x02]).await;
///     assert!(link.recv().await.is_some());
/// }
/// ```
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

struct MockInner {
    address: String,
    /// Number of connects to fail before succeeding.
    remaining_failures: AtomicU32,
    /// Fail every connect while set.
    fail_always: AtomicBool,
    /// Simulated connect latency in milliseconds (0 = no delay).
    connect_latency_ms: AtomicU64,
    open_count: AtomicU32,
    close_count: AtomicU32,
    /// Sender half of the live link, if one is open.
    live: Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("address", &self.inner.address)
            .field("open_count", &self.inner.open_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl MockTransport {
    /// Create a new mock peripheral at the given address.
    pub fn new(address: &str) -> Self {
        Self {
            inner: Arc::new(MockInner {
                address: address.to_string(),
                remaining_failures: AtomicU32::new(0),
                fail_always: AtomicBool::new(false),
                connect_latency_ms: AtomicU64::new(0),
                open_count: AtomicU32::new(0),
                close_count: AtomicU32::new(0),
                live: Mutex::new(None),
            }),
        }
    }

    /// Fail the next `count` connect attempts.
    pub fn fail_next_connects(&self, count: u32) {
        self.inner.remaining_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every connect attempt until cleared.
    pub fn set_fail_always(&self, fail: bool) {
        self.inner.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Simulate connect latency.
    pub fn set_connect_latency(&self, latency: Duration) {
        self.inner
            .connect_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Deliver a notification chunk on the live link.
    ///
    /// Returns `false` if no link is open.
    pub async fn push_chunk(&self, chunk: &[u8]) -> bool {
        let guard = self.inner.live.lock().await;
        match guard.as_ref() {
            Some(sender) => sender
                .send(Bytes::copy_from_slice(chunk))
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Drop the live link, simulating the peripheral going away.
    pub async fn drop_link(&self) {
        self.inner.live.lock().await.take();
    }

    /// Whether a link is currently open.
    pub async fn has_link(&self) -> bool {
        self.inner.live.lock().await.is_some()
    }

    /// Total connect attempts that reached the transport.
    pub fn open_count(&self) -> u32 {
        self.inner.open_count.load(Ordering::SeqCst)
    }

    /// Total close calls.
    pub fn close_count(&self) -> u32 {
        self.inner.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<Link> {
        self.inner.open_count.fetch_add(1, Ordering::SeqCst);

        let latency = self.inner.connect_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        let transient = self
            .inner
            .remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if transient || self.inner.fail_always.load(Ordering::SeqCst) {
            return Err(Error::connection_failed(
                Some(self.inner.address.clone()),
                ConnectionFailureReason::OutOfRange,
            ));
        }

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        *self.inner.live.lock().await = Some(tx);
        Ok(Link::new(rx))
    }

    async fn close(&self) -> Result<()> {
        self.inner.close_count.fetch_add(1, Ordering::SeqCst);
        self.inner.live.lock().await.take();
        Ok(())
    }

    fn address(&self) -> &str {
        &self.inner.address
    }
}
