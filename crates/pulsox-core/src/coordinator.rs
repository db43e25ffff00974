//! Periodic reading coordination.
//!
//! The coordinator owns the update loop for one device: every cycle it
//! drives the [`ConnectionManager`] toward `Connected`, drains buffered
//! notification bytes through the assembler → validator → decoder chain,
//! and publishes the newest [`Reading`] to observers through a watch
//! channel.
//!
//! Failure is a health signal here, not an error path: rejected frames and
//! implausible values are counted and, past a threshold, degrade the
//! published reading to unavailable while the loop keeps retrying. The
//! staleness policy does the same for a connected-but-silent device, which
//! is every bit as useless to a consumer as a disconnected one.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulsox_types::Reading;

use crate::connection::{ConnectOutcome, ConnectionManager, ConnectionState};
use crate::decoder::decode_frame;
use crate::diagnostics::DiagnosticsSnapshot;
use crate::error::Result;
use crate::events::{DeviceEvent, DeviceId, EventDispatcher, EventReceiver};
use crate::transport::Transport;
use crate::validator::FrameValidator;

/// Options for the coordinator's update cycle.
///
/// Use the builder for convenient configuration:
///
/// ```
/// use std::time::Duration;
/// use pulsox_core::coordinator::CoordinatorOptions;
///
/// let options = CoordinatorOptions::builder()
///     .poll_interval(Duration::from_secs(1))
///     .staleness_window(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    /// How often to run the update cycle.
    /// Default: 2 seconds.
    pub poll_interval: Duration,
    /// Degrade the published reading to unavailable when no frame has
    /// decoded successfully for this long.
    /// Default: 10 seconds.
    pub staleness_window: Duration,
    /// Degrade the published reading to unavailable after this many
    /// consecutive rejected or undecodable frames.
    /// Default: 8.
    pub failure_threshold: u32,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            staleness_window: Duration::from_secs(10),
            failure_threshold: 8,
        }
    }
}

impl CoordinatorOptions {
    /// Create a new builder.
    pub fn builder() -> CoordinatorOptionsBuilder {
        CoordinatorOptionsBuilder::default()
    }

    /// Validate the options and return an error if invalid.
    ///
    /// Checks that:
    /// - `poll_interval` is > 0
    /// - `staleness_window` >= `poll_interval`
    /// - `failure_threshold` is > 0
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(crate::error::Error::invalid_config(
                "poll_interval must be > 0",
            ));
        }
        if self.staleness_window < self.poll_interval {
            return Err(crate::error::Error::invalid_config(
                "staleness_window must be >= poll_interval",
            ));
        }
        if self.failure_threshold == 0 {
            return Err(crate::error::Error::invalid_config(
                "failure_threshold must be > 0",
            ));
        }
        Ok(())
    }
}

/// Builder for [`CoordinatorOptions`].
#[derive(Debug, Clone, Default)]
pub struct CoordinatorOptionsBuilder {
    options: CoordinatorOptions,
}

impl CoordinatorOptionsBuilder {
    /// Set the update cycle interval.
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.options.poll_interval = interval;
        self
    }

    /// Set the staleness window.
    #[must_use]
    pub fn staleness_window(mut self, window: Duration) -> Self {
        self.options.staleness_window = window;
        self
    }

    /// Set the consecutive-failure threshold.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.options.failure_threshold = threshold;
        self
    }

    /// Build the options.
    #[must_use]
    pub fn build(self) -> CoordinatorOptions {
        self.options
    }
}

/// Mutable state shared between the loop task and the handle.
#[derive(Debug, Default)]
struct SharedState {
    last_decode_error: RwLock<Option<String>>,
    last_decoded_at: RwLock<Option<Instant>>,
}

/// The update loop driving one device session.
///
/// Constructed and consumed by [`ReadingCoordinator::spawn`]; external code
/// interacts through the returned [`CoordinatorHandle`].
pub struct ReadingCoordinator<T: Transport> {
    manager: Arc<ConnectionManager<T>>,
    options: CoordinatorOptions,
    validator: FrameValidator,
    events: EventDispatcher,
    shared: Arc<SharedState>,
    latest_tx: watch::Sender<Option<Reading>>,
    consecutive_failures: u32,
}

impl<T: Transport> ReadingCoordinator<T> {
    /// Start the update loop for a device and return its handle.
    ///
    /// The loop runs until [`CoordinatorHandle::shutdown`] is called (or the
    /// handle is dropped), at which point it unsubscribes, abandons any
    /// pending backoff, and releases the connection handle.
    pub fn spawn(
        manager: ConnectionManager<T>,
        options: CoordinatorOptions,
    ) -> Result<CoordinatorHandle<T>> {
        options.validate()?;

        let manager = Arc::new(manager);
        let validator = FrameValidator::new(manager.profile(), manager.counters());
        let events = manager.events();
        let shared = Arc::new(SharedState::default());
        let (latest_tx, latest_rx) = watch::channel(None);
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let coordinator = Self {
            manager: Arc::clone(&manager),
            options: options.clone(),
            validator,
            events,
            shared: Arc::clone(&shared),
            latest_tx,
            consecutive_failures: 0,
        };
        let task = tokio::spawn(coordinator.run(refresh_rx, cancel.clone()));

        Ok(CoordinatorHandle {
            manager,
            latest: latest_rx,
            shared,
            refresh_tx,
            cancel,
            task,
        })
    }

    async fn run(mut self, mut refresh_rx: mpsc::Receiver<()>, cancel: CancellationToken) {
        let mut ticker = interval(self.options.poll_interval);
        info!(
            address = self.manager.address(),
            interval = ?self.options.poll_interval,
            "reading coordinator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = refresh_rx.recv() => {
                    debug!("forced refresh");
                }
            }
            self.cycle().await;
        }

        // Required exit actions: unsubscribe, abandon any backoff window,
        // release the connection handle.
        if let Err(error) = self.manager.shutdown().await {
            warn!(%error, "error releasing connection during shutdown");
        }
        self.latest_tx.send_replace(None);
        info!(address = self.manager.address(), "reading coordinator stopped");
    }

    /// One update cycle: ensure connected, drain, decode, publish.
    async fn cycle(&mut self) {
        if self.manager.ensure_connected().await == ConnectOutcome::ShutDown {
            return;
        }

        let captured_at = OffsetDateTime::now_utc();
        for candidate in self.manager.poll_frames().await {
            match self.validator.validate(candidate) {
                Ok(frame) => {
                    match decode_frame(&frame, self.manager.profile(), captured_at) {
                        Ok(reading) => self.publish(reading).await,
                        Err(error) => {
                            debug!(%error, "frame decoded to implausible values");
                            self.manager.counters().record_decode_error();
                            *self.shared.last_decode_error.write().await =
                                Some(error.to_string());
                            self.consecutive_failures += 1;
                        }
                    }
                }
                // Counted by the validator; rejection is routine.
                Err(_) => self.consecutive_failures += 1,
            }
        }

        self.apply_availability_policy().await;
    }

    async fn publish(&mut self, reading: Reading) {
        debug!(%reading, "decoded reading");
        self.consecutive_failures = 0;
        *self.shared.last_decoded_at.write().await = Some(Instant::now());
        self.manager.counters().record_reading();
        self.events.send(DeviceEvent::Reading {
            device: self.device_id(),
            reading: reading.clone(),
        });
        self.latest_tx.send_replace(Some(reading));
    }

    /// Degrade the published reading to unavailable when the stream has
    /// gone bad: too many consecutive failures, or silence past the
    /// staleness window. Retries continue regardless.
    async fn apply_availability_policy(&mut self) {
        let stale = match *self.shared.last_decoded_at.read().await {
            Some(at) => at.elapsed() > self.options.staleness_window,
            None => true,
        };
        let failing = self.consecutive_failures >= self.options.failure_threshold;

        if (stale || failing) && self.latest_tx.borrow().is_some() {
            info!(stale, failing, "reading degraded to unavailable");
            self.latest_tx.send_replace(None);
            self.events.send(DeviceEvent::BecameUnavailable {
                device: self.device_id(),
            });
        }
    }

    fn device_id(&self) -> DeviceId {
        DeviceId::with_model(self.manager.address(), self.manager.profile().model)
    }
}

/// Handle to a running coordinator.
///
/// This is the boundary the host observer layer sees: the latest reading
/// (or unavailable), a diagnostics snapshot, a refresh trigger, and
/// shutdown.
pub struct CoordinatorHandle<T: Transport> {
    manager: Arc<ConnectionManager<T>>,
    latest: watch::Receiver<Option<Reading>>,
    shared: Arc<SharedState>,
    refresh_tx: mpsc::Sender<()>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T: Transport> CoordinatorHandle<T> {
    /// The most recently published reading, or `None` when unavailable.
    ///
    /// A reading is published whole or not at all; observers never see a
    /// partially-populated value.
    pub fn latest_reading(&self) -> Option<Reading> {
        self.latest.borrow().clone()
    }

    /// Subscribe to reading availability changes.
    ///
    /// The receiver yields the same `Option<Reading>` the polling API
    /// exposes, push-style.
    pub fn subscribe_readings(&self) -> watch::Receiver<Option<Reading>> {
        self.latest.clone()
    }

    /// Subscribe to device events.
    pub fn subscribe_events(&self) -> EventReceiver {
        self.manager.events().subscribe()
    }

    /// Trigger an update cycle outside the regular schedule.
    ///
    /// Coalesces: triggering repeatedly while a cycle is pending has no
    /// additional effect.
    pub fn force_refresh(&self) {
        let _ = self.refresh_tx.try_send(());
    }

    /// Read-only snapshot of the connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        self.manager.current_state().await
    }

    /// Collect a serializable health report for diagnostics downloads.
    pub async fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        let state = self.manager.current_state().await;
        let (backoff_attempt, next_attempt_in_ms) = match state {
            ConnectionState::Backoff { attempt, until } => (
                Some(attempt),
                Some(until.saturating_duration_since(Instant::now()).as_millis() as u64),
            ),
            _ => (None, None),
        };

        DiagnosticsSnapshot {
            address: self.manager.address().to_string(),
            connection_state: state.kind(),
            backoff_attempt,
            next_attempt_in_ms,
            buffered_bytes: self.manager.buffered_bytes().await,
            counters: self.manager.counters().snapshot(),
            last_decode_error: self.shared.last_decode_error.read().await.clone(),
            last_reading_age_ms: self
                .shared
                .last_decoded_at
                .read()
                .await
                .map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Whether the update loop is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the update loop and tear the session down.
    ///
    /// Waits for the loop to perform its exit actions: unsubscribe, cancel
    /// any pending backoff, release the connection handle.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        // JoinHandle is Unpin, so awaiting by reference avoids moving a
        // field out of a type with a Drop impl.
        let _ = (&mut self.task).await;
    }
}

impl<T: Transport> Drop for CoordinatorHandle<T> {
    fn drop(&mut self) {
        // Dropping the handle without shutdown() still stops the loop;
        // the loop's exit path releases the connection.
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_default() {
        let options = CoordinatorOptions::default();
        assert_eq!(options.poll_interval, Duration::from_secs(2));
        assert_eq!(options.staleness_window, Duration::from_secs(10));
        assert_eq!(options.failure_threshold, 8);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_options_builder() {
        let options = CoordinatorOptions::builder()
            .poll_interval(Duration::from_millis(500))
            .staleness_window(Duration::from_secs(5))
            .failure_threshold(3)
            .build();

        assert_eq!(options.poll_interval, Duration::from_millis(500));
        assert_eq!(options.staleness_window, Duration::from_secs(5));
        assert_eq!(options.failure_threshold, 3);
    }

    #[test]
    fn test_options_validation() {
        assert!(
            CoordinatorOptions::builder()
                .poll_interval(Duration::ZERO)
                .build()
                .validate()
                .is_err()
        );
        assert!(
            CoordinatorOptions::builder()
                .poll_interval(Duration::from_secs(5))
                .staleness_window(Duration::from_secs(2))
                .build()
                .validate()
                .is_err()
        );
        assert!(
            CoordinatorOptions::builder()
                .failure_threshold(0)
                .build()
                .validate()
                .is_err()
        );
    }
}
