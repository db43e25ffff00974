//! Transport abstraction over the BLE stack.
//!
//! The protocol layer never talks to a Bluetooth API directly; it talks to
//! a [`Transport`], which knows how to connect to one peripheral and
//! subscribe to its measurement characteristic. That keeps the connection
//! machinery and the decoder chain testable without radio hardware (see
//! [`crate::mock::MockTransport`]) and keeps platform quirks confined to
//! [`crate::ble::BleTransport`].

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

use crate::error::Result;

/// Result of polling a [`Link`] for buffered notification chunks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPoll {
    /// One notification payload, in arrival order.
    Chunk(Bytes),
    /// Nothing buffered right now; the link is still up.
    Empty,
    /// The link is down and no further chunks will arrive.
    Lost,
}

/// An open notification link to a peripheral.
///
/// Chunks arrive on an internal channel fed by the transport. The transport
/// signals link loss by dropping its sender half, so a `Lost` poll result
/// is authoritative; there is no separate disconnect callback to race
/// against.
#[derive(Debug)]
pub struct Link {
    notifications: mpsc::Receiver<Bytes>,
}

impl Link {
    /// Wrap a notification channel produced by a transport.
    pub fn new(notifications: mpsc::Receiver<Bytes>) -> Self {
        Self { notifications }
    }

    /// Non-blocking poll for the next buffered chunk.
    pub fn poll_chunk(&mut self) -> ChunkPoll {
        match self.notifications.try_recv() {
            Ok(chunk) => ChunkPoll::Chunk(chunk),
            Err(TryRecvError::Empty) => ChunkPoll::Empty,
            Err(TryRecvError::Disconnected) => ChunkPoll::Lost,
        }
    }

    /// Await the next chunk; `None` means the link was lost.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.notifications.recv().await
    }
}

/// A BLE stack boundary for one peripheral.
///
/// Implementations own the platform specifics of connecting, subscribing,
/// and tearing down. The contract the protocol layer relies on:
///
/// - [`open`](Self::open) performs connect **and** subscribe, returning a
///   live [`Link`]; a link that cannot deliver notifications is an error,
///   not a half-open success.
/// - Link loss is signalled by closing the link's channel.
/// - [`close`](Self::close) releases the connection handle and is safe to
///   call when already disconnected.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Connect to the peripheral and subscribe to its notify characteristic.
    async fn open(&self) -> Result<Link>;

    /// Stop notifications and release the connection handle.
    async fn close(&self) -> Result<()>;

    /// Peripheral address or platform identifier.
    fn address(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_poll_chunk_states() {
        let (tx, rx) = mpsc::channel(4);
        let mut link = Link::new(rx);

        assert_eq!(link.poll_chunk(), ChunkPoll::Empty);

        tx.send(Bytes::from_static(b"\x01\x02")).await.unwrap();
        assert_eq!(
            link.poll_chunk(),
            ChunkPoll::Chunk(Bytes::from_static(b"\x01\x02"))
        );
        assert_eq!(link.poll_chunk(), ChunkPoll::Empty);

        drop(tx);
        assert_eq!(link.poll_chunk(), ChunkPoll::Lost);
    }

    #[tokio::test]
    async fn test_buffered_chunks_drain_before_loss() {
        let (tx, rx) = mpsc::channel(4);
        let mut link = Link::new(rx);

        tx.send(Bytes::from_static(b"\xAA")).await.unwrap();
        tx.send(Bytes::from_static(b"\xBB")).await.unwrap();
        drop(tx);

        // Chunks delivered before the drop are still readable.
        assert!(matches!(link.poll_chunk(), ChunkPoll::Chunk(_)));
        assert!(matches!(link.poll_chunk(), ChunkPoll::Chunk(_)));
        assert_eq!(link.poll_chunk(), ChunkPoll::Lost);
    }
}
