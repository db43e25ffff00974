//! BLE link lifecycle management.
//!
//! One [`ConnectionManager`] owns one peripheral's link: it connects,
//! subscribes, watches for link loss, and schedules reconnects with
//! exponential backoff. It also owns the per-session [`FrameAssembler`],
//! creating a fresh one for every successful connect and discarding it the
//! moment the link drops, so the assembly buffer can never mix bytes from
//! different connection sessions.
//!
//! The manager never connects on its own initiative; the coordinator drives
//! it by calling [`ensure_connected`](ConnectionManager::ensure_connected)
//! on its cycle. Failure never escalates beyond a state transition: a
//! failed connect extends the backoff window, and the next cycle tries
//! again.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::assembler::FrameAssembler;
use crate::backoff::BackoffPolicy;
use crate::diagnostics::{ConnectionStateKind, ProtocolCounters};
use crate::error::Result;
use crate::events::{DeviceEvent, DeviceId, DisconnectReason, EventDispatcher};
use crate::profile::DeviceProfile;
use crate::transport::{ChunkPoll, Link, Transport};

/// Connection lifecycle state.
///
/// Owned exclusively by [`ConnectionManager`]; everyone else sees read-only
/// snapshots via [`ConnectionManager::current_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no retry pending. Terminal after
    /// [`shutdown`](ConnectionManager::shutdown).
    Disconnected,
    /// Connect attempt in flight.
    Connecting,
    /// Link up, notifications subscribed.
    Connected,
    /// Waiting out a backoff window before the next attempt.
    Backoff {
        /// Failed connect attempts since the last successful connect.
        attempt: u32,
        /// When the next connect attempt is permitted.
        until: Instant,
    },
}

impl ConnectionState {
    /// Whether the link is currently up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// The serializable classification of this state.
    #[must_use]
    pub fn kind(&self) -> ConnectionStateKind {
        match self {
            ConnectionState::Disconnected => ConnectionStateKind::Disconnected,
            ConnectionState::Connecting => ConnectionStateKind::Connecting,
            ConnectionState::Connected => ConnectionStateKind::Connected,
            ConnectionState::Backoff { .. } => ConnectionStateKind::Backoff,
        }
    }
}

/// State owned by one connection session: the live link and the assembler
/// accumulating its bytes. Dropped as a unit on link loss, taking any
/// half-assembled frame with it.
struct Session {
    link: Link,
    assembler: FrameAssembler,
}

/// Outcome of [`ConnectionManager::ensure_connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The link is up (already was, or just came up).
    Connected,
    /// A backoff window is active; no attempt was made.
    WaitingBackoff,
    /// A connect attempt was made and failed; backoff extended.
    Failed,
    /// The manager was shut down; no further attempts will be made.
    ShutDown,
}

/// Owns the BLE link lifecycle for a single peripheral.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    profile: &'static DeviceProfile,
    backoff: BackoffPolicy,
    counters: Arc<ProtocolCounters>,
    events: EventDispatcher,
    state: RwLock<ConnectionState>,
    session: Mutex<Option<Session>>,
    /// Serializes connect attempts: at most one in flight per peripheral.
    connect_gate: Mutex<()>,
    /// Set by shutdown; blocks any further auto-retry.
    shut_down: RwLock<bool>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager for one peripheral.
    pub fn new(transport: T, profile: &'static DeviceProfile, backoff: BackoffPolicy) -> Result<Self> {
        backoff.validate()?;
        Ok(Self {
            transport,
            profile,
            backoff,
            counters: ProtocolCounters::shared(),
            events: EventDispatcher::default(),
            state: RwLock::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
            connect_gate: Mutex::new(()),
            shut_down: RwLock::new(false),
        })
    }

    /// The peripheral address this manager owns.
    pub fn address(&self) -> &str {
        self.transport.address()
    }

    /// The vendor profile in use.
    pub fn profile(&self) -> &'static DeviceProfile {
        self.profile
    }

    /// Shared protocol counters for this session.
    pub fn counters(&self) -> Arc<ProtocolCounters> {
        Arc::clone(&self.counters)
    }

    /// The event dispatcher for this device.
    pub fn events(&self) -> EventDispatcher {
        self.events.clone()
    }

    /// Read-only snapshot of the connection state.
    pub async fn current_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Bytes currently held in the session's assembly buffer.
    pub async fn buffered_bytes(&self) -> usize {
        self.session
            .lock()
            .await
            .as_ref()
            .map_or(0, |s| s.assembler.buffered())
    }

    fn device_id(&self) -> DeviceId {
        DeviceId::with_model(self.transport.address(), self.profile.model)
    }

    /// Drive the state machine toward `Connected`.
    ///
    /// Respects an active backoff window, makes at most one attempt, and
    /// guarantees no two attempts are ever in flight concurrently. A failed
    /// attempt extends the backoff window with the next delay in the
    /// schedule; only a successful connect resets the schedule.
    pub async fn ensure_connected(&self) -> ConnectOutcome {
        if *self.shut_down.read().await {
            return ConnectOutcome::ShutDown;
        }
        match *self.state.read().await {
            ConnectionState::Connected => return ConnectOutcome::Connected,
            ConnectionState::Backoff { until, .. } if Instant::now() < until => {
                return ConnectOutcome::WaitingBackoff;
            }
            _ => {}
        }

        let _gate = self.connect_gate.lock().await;

        // State may have moved while waiting on the gate.
        if *self.shut_down.read().await {
            return ConnectOutcome::ShutDown;
        }
        let prior_attempts = match *self.state.read().await {
            ConnectionState::Connected => return ConnectOutcome::Connected,
            ConnectionState::Backoff { attempt, until } => {
                if Instant::now() < until {
                    return ConnectOutcome::WaitingBackoff;
                }
                attempt
            }
            _ => 0,
        };

        *self.state.write().await = ConnectionState::Connecting;
        debug!(address = self.transport.address(), "connecting");

        match self.transport.open().await {
            Ok(link) => {
                // Fresh assembler per session: no bytes survive a reconnect.
                *self.session.lock().await = Some(Session {
                    link,
                    assembler: FrameAssembler::new(self.profile, Arc::clone(&self.counters)),
                });
                *self.state.write().await = ConnectionState::Connected;
                info!(
                    address = self.transport.address(),
                    "connected, notifications subscribed"
                );
                self.events.send(DeviceEvent::Connected {
                    device: self.device_id(),
                });
                ConnectOutcome::Connected
            }
            Err(error) => {
                let attempt = prior_attempts + 1;
                let delay = self.backoff.applied_delay(attempt - 1);
                *self.state.write().await = ConnectionState::Backoff {
                    attempt,
                    until: Instant::now() + delay,
                };
                warn!(
                    address = self.transport.address(),
                    attempt,
                    ?delay,
                    %error,
                    "connect failed, backing off"
                );
                self.events.send(DeviceEvent::ReconnectScheduled {
                    device: self.device_id(),
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                });
                ConnectOutcome::Failed
            }
        }
    }

    /// Drain buffered notification bytes through the session's assembler,
    /// returning every complete frame candidate.
    ///
    /// Detecting link loss here drops the session (assembly buffer
    /// included), releases the transport handle, and schedules a reconnect.
    /// Frames completed before the loss are still returned.
    pub async fn poll_frames(&self) -> Vec<Bytes> {
        let mut frames = Vec::new();
        let mut lost = false;

        {
            let mut guard = self.session.lock().await;
            let Some(session) = guard.as_mut() else {
                return frames;
            };
            loop {
                match session.link.poll_chunk() {
                    ChunkPoll::Chunk(chunk) => frames.extend(session.assembler.feed(&chunk)),
                    ChunkPoll::Empty => break,
                    ChunkPoll::Lost => {
                        lost = true;
                        break;
                    }
                }
            }
            if lost {
                // The session dies with its link: any half-assembled frame
                // is invalid the moment the connection drops.
                *guard = None;
            }
        }

        if lost {
            self.handle_link_loss().await;
        }
        frames
    }

    async fn handle_link_loss(&self) {
        warn!(address = self.transport.address(), "notification link lost");
        // Release the dead handle so the next open starts clean.
        if let Err(error) = self.transport.close().await {
            debug!(%error, "error releasing connection handle after link loss");
        }
        if *self.shut_down.read().await {
            return;
        }
        let delay = self.backoff.applied_delay(0);
        *self.state.write().await = ConnectionState::Backoff {
            attempt: 0,
            until: Instant::now() + delay,
        };
        self.events.send(DeviceEvent::Disconnected {
            device: self.device_id(),
            reason: DisconnectReason::LinkLost,
        });
    }

    /// Tear the session down for good.
    ///
    /// Unsubscribes and releases the connection handle, abandons any backoff
    /// window, and leaves the terminal `Disconnected` state. Subsequent
    /// [`ensure_connected`](Self::ensure_connected) calls are no-ops.
    pub async fn shutdown(&self) -> Result<()> {
        *self.shut_down.write().await = true;
        self.session.lock().await.take();
        *self.state.write().await = ConnectionState::Disconnected;
        let result = self.transport.close().await;
        info!(address = self.transport.address(), "disconnected");
        self.events.send(DeviceEvent::Disconnected {
            device: self.device_id(),
            reason: DisconnectReason::UserRequested,
        });
        result
    }
}
