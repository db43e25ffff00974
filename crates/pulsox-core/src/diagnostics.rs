//! Protocol counters and diagnostics snapshots.
//!
//! Nothing in the protocol layer treats a bad frame as exceptional, so the
//! only way to see how a link is really behaving is to count: garbage bytes
//! skipped, buffers overflowed, frames rejected and why. The counters are
//! lock-free atomics shared between the assembler, validator, and
//! coordinator; [`DiagnosticsSnapshot`] is the serializable view handed to
//! host diagnostics downloads.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::validator::RejectionReason;

/// Thread-safe counters for protocol-level events.
#[derive(Debug, Default)]
pub struct ProtocolCounters {
    garbage_bytes: AtomicU64,
    overflows: AtomicU64,
    frames_assembled: AtomicU64,
    rejected_too_short: AtomicU64,
    rejected_length_mismatch: AtomicU64,
    rejected_checksum_mismatch: AtomicU64,
    decode_errors: AtomicU64,
    readings_published: AtomicU64,
}

impl ProtocolCounters {
    /// Create new zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create shared counters.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Record noise bytes discarded while hunting for a frame marker.
    pub fn record_garbage(&self, bytes: usize) {
        self.garbage_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record a forced assembly-buffer reset.
    pub fn record_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a complete frame candidate leaving the assembler.
    pub fn record_frame_assembled(&self) {
        self.frames_assembled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a validator rejection.
    pub fn record_rejection(&self, reason: &RejectionReason) {
        let counter = match reason {
            RejectionReason::TooShort { .. } => &self.rejected_too_short,
            RejectionReason::LengthMismatch { .. } => &self.rejected_length_mismatch,
            RejectionReason::ChecksumMismatch { .. } => &self.rejected_checksum_mismatch,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a structurally valid frame that failed semantic decoding.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a reading published to observers.
    pub fn record_reading(&self) {
        self.readings_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a point-in-time copy of all counters.
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            garbage_bytes: self.garbage_bytes.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            frames_assembled: self.frames_assembled.load(Ordering::Relaxed),
            rejected_too_short: self.rejected_too_short.load(Ordering::Relaxed),
            rejected_length_mismatch: self.rejected_length_mismatch.load(Ordering::Relaxed),
            rejected_checksum_mismatch: self.rejected_checksum_mismatch.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            readings_published: self.readings_published.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.garbage_bytes.store(0, Ordering::Relaxed);
        self.overflows.store(0, Ordering::Relaxed);
        self.frames_assembled.store(0, Ordering::Relaxed);
        self.rejected_too_short.store(0, Ordering::Relaxed);
        self.rejected_length_mismatch.store(0, Ordering::Relaxed);
        self.rejected_checksum_mismatch.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.readings_published.store(0, Ordering::Relaxed);
    }
}

/// Serializable snapshot of [`ProtocolCounters`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    /// Noise bytes discarded before a frame marker was found.
    pub garbage_bytes: u64,
    /// Forced assembly-buffer resets.
    pub overflows: u64,
    /// Complete frame candidates produced by the assembler.
    pub frames_assembled: u64,
    /// Candidates rejected for being shorter than the minimum frame.
    pub rejected_too_short: u64,
    /// Candidates whose declared length disagreed with their actual length.
    pub rejected_length_mismatch: u64,
    /// Candidates whose checksum did not verify.
    pub rejected_checksum_mismatch: u64,
    /// Valid frames whose field values were implausible.
    pub decode_errors: u64,
    /// Readings published to observers.
    pub readings_published: u64,
}

impl CounterSnapshot {
    /// Total rejected candidates across all reasons.
    pub fn total_rejections(&self) -> u64 {
        self.rejected_too_short + self.rejected_length_mismatch + self.rejected_checksum_mismatch
    }
}

/// Connection state as exposed in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStateKind {
    /// No connection and no retry pending.
    Disconnected,
    /// Connect attempt in flight.
    Connecting,
    /// Link up, notifications subscribed.
    Connected,
    /// Waiting out a backoff window before the next attempt.
    Backoff,
}

/// Serializable health report for a device session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    /// Peripheral address.
    pub address: String,
    /// Current connection state.
    pub connection_state: ConnectionStateKind,
    /// Failed connect attempts since the last successful connect, when in backoff.
    pub backoff_attempt: Option<u32>,
    /// Milliseconds until the next connect attempt is permitted, when in backoff.
    pub next_attempt_in_ms: Option<u64>,
    /// Bytes currently sitting in the assembly buffer.
    pub buffered_bytes: usize,
    /// Protocol event counters.
    pub counters: CounterSnapshot,
    /// Most recent decode failure, if any.
    pub last_decode_error: Option<String>,
    /// Milliseconds since the last successfully decoded reading.
    pub last_reading_age_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_record_and_snapshot() {
        let counters = ProtocolCounters::new();
        counters.record_garbage(7);
        counters.record_garbage(3);
        counters.record_overflow();
        counters.record_frame_assembled();
        counters.record_rejection(&RejectionReason::ChecksumMismatch {
            expected: 0x10,
            actual: 0x11,
        });
        counters.record_decode_error();
        counters.record_reading();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.garbage_bytes, 10);
        assert_eq!(snapshot.overflows, 1);
        assert_eq!(snapshot.frames_assembled, 1);
        assert_eq!(snapshot.rejected_checksum_mismatch, 1);
        assert_eq!(snapshot.total_rejections(), 1);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.readings_published, 1);
    }

    #[test]
    fn test_counters_reset() {
        let counters = ProtocolCounters::new();
        counters.record_garbage(100);
        counters.record_overflow();
        counters.reset();
        assert_eq!(counters.snapshot(), CounterSnapshot::default());
    }

    #[test]
    fn test_snapshot_serialization() {
        let snapshot = DiagnosticsSnapshot {
            address: "AA:BB:CC:DD:EE:FF".to_string(),
            connection_state: ConnectionStateKind::Backoff,
            backoff_attempt: Some(3),
            next_attempt_in_ms: Some(4000),
            buffered_bytes: 12,
            counters: CounterSnapshot::default(),
            last_decode_error: None,
            last_reading_age_ms: Some(2500),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"connection_state\":\"backoff\""));
        assert!(json.contains("\"backoff_attempt\":3"));

        let back: DiagnosticsSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back.connection_state, ConnectionStateKind::Backoff);
        assert_eq!(back.buffered_bytes, 12);
    }
}
