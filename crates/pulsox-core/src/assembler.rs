//! Frame reassembly from notification chunks.
//!
//! BLE notifications from these oximeters are not frame-aligned: a single
//! notification can carry a fragment of a frame, exactly one frame, or
//! several frames back to back, and the stream is routinely salted with
//! noise bytes. The assembler turns that chunk stream back into complete
//! frame candidates by scanning for the vendor marker, waiting until the
//! full frame length is buffered, and discarding everything that cannot be
//! part of a frame.
//!
//! An assembler belongs to exactly one connection session. It is created
//! when a link comes up and dropped with the session on link loss, so bytes
//! buffered before a disconnect can never be glued to bytes received after
//! a reconnect.

use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tracing::{trace, warn};

use crate::diagnostics::ProtocolCounters;
use crate::profile::{DeviceProfile, FrameLayout};

/// Buffer cap, as a multiple of the largest valid frame. Anything beyond
/// this is runaway corruption, not fragmentation.
const MAX_BUFFER_FRAMES: usize = 4;

/// Accumulates notification chunks and extracts complete frame candidates.
pub struct FrameAssembler {
    profile: &'static DeviceProfile,
    buf: BytesMut,
    counters: Arc<ProtocolCounters>,
}

impl FrameAssembler {
    /// Create an empty assembler for one connection session.
    pub fn new(profile: &'static DeviceProfile, counters: Arc<ProtocolCounters>) -> Self {
        Self {
            profile,
            buf: BytesMut::with_capacity(profile.max_frame_len() * 2),
            counters,
        }
    }

    /// Append one notification chunk and extract every complete frame
    /// candidate now available.
    ///
    /// Candidates are returned in stream order, independent of how the bytes
    /// were split across notifications. Bytes preceding a marker are
    /// discarded and counted as garbage; a partial frame (or partial marker)
    /// at the buffer tail is retained for the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(chunk);
        trace!(
            chunk_len = chunk.len(),
            buffered = self.buf.len(),
            "buffered notification chunk"
        );

        if self.buf.len() > self.max_buffer() {
            warn!(
                buffered = self.buf.len(),
                cap = self.max_buffer(),
                "assembly buffer overflow, resetting"
            );
            self.buf.clear();
            self.counters.record_overflow();
            return Vec::new();
        }

        let mut frames = Vec::new();
        loop {
            self.discard_garbage();

            let Some(frame_len) = self.next_frame_len() else {
                // Marker (or length byte) not fully buffered yet.
                break;
            };
            if self.buf.len() < frame_len {
                break;
            }

            frames.push(self.buf.split_to(frame_len).freeze());
            self.counters.record_frame_assembled();
        }
        frames
    }

    /// Bytes currently buffered, for diagnostics.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discard everything buffered.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    fn max_buffer(&self) -> usize {
        self.profile.max_frame_len() * MAX_BUFFER_FRAMES
    }

    /// Drop bytes that precede the first marker occurrence. A proper prefix
    /// of the marker at the buffer tail is kept: the rest of the marker may
    /// arrive in the next chunk.
    fn discard_garbage(&mut self) {
        let marker = self.profile.marker;

        let garbage = match find_subsequence(&self.buf, marker) {
            Some(pos) => pos,
            None => self.buf.len() - marker_prefix_at_tail(&self.buf, marker),
        };

        if garbage > 0 {
            trace!(bytes = garbage, "skipping noise before frame marker");
            self.buf.advance(garbage);
            self.counters.record_garbage(garbage);
        }
    }

    /// Total length of the frame starting at the buffer head, or `None` if
    /// not enough bytes are buffered to know yet.
    fn next_frame_len(&self) -> Option<usize> {
        let marker = self.profile.marker;
        if self.buf.len() < marker.len() || !self.buf.starts_with(marker) {
            return None;
        }
        match self.profile.layout {
            FrameLayout::Fixed(len) => Some(len),
            FrameLayout::LengthPrefixed => {
                let payload_len = *self.buf.get(marker.len())? as usize;
                Some(marker.len() + 1 + payload_len + 1)
            }
        }
    }
}

/// First occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Length of the longest proper prefix of `marker` that ends `buf`.
fn marker_prefix_at_tail(buf: &[u8], marker: &[u8]) -> usize {
    let longest = marker.len().saturating_sub(1).min(buf.len());
    (1..=longest)
        .rev()
        .find(|&k| buf[buf.len() - k..] == marker[..k])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::JKS50F;
    use crate::validator::{LP_PROFILE, jks50f_frame};
    use proptest::prelude::*;

    fn assembler(profile: &'static DeviceProfile) -> (FrameAssembler, Arc<ProtocolCounters>) {
        let counters = ProtocolCounters::shared();
        (FrameAssembler::new(profile, counters.clone()), counters)
    }

    #[test]
    fn test_whole_frame_in_one_chunk() {
        let (mut asm, counters) = assembler(&JKS50F);
        let frame = jks50f_frame(0, 98, 72, 420);
        let out = asm.feed(&frame);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &frame[..]);
        assert_eq!(asm.buffered(), 0);
        assert_eq!(counters.snapshot().frames_assembled, 1);
    }

    #[test]
    fn test_frame_split_across_chunks() {
        let (mut asm, _) = assembler(&JKS50F);
        let frame = jks50f_frame(0, 97, 80, 350);
        assert!(asm.feed(&frame[..20]).is_empty());
        assert!(asm.feed(&frame[20..50]).is_empty());
        let out = asm.feed(&frame[50..]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &frame[..]);
    }

    #[test]
    fn test_two_frames_in_one_chunk() {
        let (mut asm, _) = assembler(&JKS50F);
        let first = jks50f_frame(0, 98, 72, 420);
        let second = jks50f_frame(0, 97, 73, 430);
        let mut chunk = first.clone();
        chunk.extend_from_slice(&second);
        let out = asm.feed(&chunk);
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0][..], &first[..]);
        assert_eq!(&out[1][..], &second[..]);
    }

    #[test]
    fn test_noise_before_marker_is_skipped_and_counted() {
        let (mut asm, counters) = assembler(&JKS50F);
        let frame = jks50f_frame(0, 98, 72, 420);
        let mut chunk = vec![0x00, 0x13, 0x37];
        chunk.extend_from_slice(&frame);
        let out = asm.feed(&chunk);
        assert_eq!(out.len(), 1);
        assert_eq!(counters.snapshot().garbage_bytes, 3);
    }

    #[test]
    fn test_partial_marker_at_tail_is_retained() {
        let (mut asm, counters) = assembler(&JKS50F);
        let frame = jks50f_frame(0, 98, 72, 420);

        // Noise, then the first two marker bytes; the third arrives later.
        let mut chunk = vec![0x42, 0x42];
        chunk.extend_from_slice(&frame[..2]);
        assert!(asm.feed(&chunk).is_empty());
        assert_eq!(asm.buffered(), 2);
        assert_eq!(counters.snapshot().garbage_bytes, 2);

        let out = asm.feed(&frame[2..]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &frame[..]);
    }

    #[test]
    fn test_pure_noise_is_fully_discarded() {
        let (mut asm, counters) = assembler(&JKS50F);
        let out = asm.feed(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert!(out.is_empty());
        assert_eq!(asm.buffered(), 0);
        assert_eq!(counters.snapshot().garbage_bytes, 5);
    }

    #[test]
    fn test_overflow_forces_reset() {
        let (mut asm, counters) = assembler(&JKS50F);
        // An incomplete frame keeps the buffer anchored at the marker.
        let mut chunk = vec![0xFF, 0x44, 0x01];
        chunk.extend(std::iter::repeat_n(0x00u8, 57));
        assert!(asm.feed(&chunk).is_empty());

        let huge = vec![0xEEu8; JKS50F.max_frame_len() * MAX_BUFFER_FRAMES];
        assert!(asm.feed(&huge).is_empty());
        assert_eq!(asm.buffered(), 0);
        assert_eq!(counters.snapshot().overflows, 1);
    }

    #[test]
    fn test_reset_discards_buffered_bytes() {
        let (mut asm, _) = assembler(&JKS50F);
        let frame = jks50f_frame(0, 98, 72, 420);
        asm.feed(&frame[..30]);
        assert!(asm.buffered() > 0);
        asm.reset();
        assert_eq!(asm.buffered(), 0);
        // The remainder alone is garbage, not a frame.
        assert!(asm.feed(&frame[30..]).is_empty());
    }

    #[test]
    fn test_length_prefixed_spec_example() {
        let (mut asm, _) = assembler(&LP_PROFILE);
        // [START, 0x05] then [d1..d5, CHK]: one frame, payload d1..d5.
        let payload = [0x0A, 0x0B, 0x0C, 0x0D, 0x0E];
        let mut frame = vec![0xAA, 0x05];
        frame.extend_from_slice(&payload);
        let checksum = crate::profile::ChecksumKind::Sum.compute(&frame);
        frame.push(checksum);

        assert!(asm.feed(&frame[..2]).is_empty());
        let out = asm.feed(&frame[2..]);
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &frame[..]);
    }

    #[test]
    fn test_marker_prefix_helper() {
        let marker = [0xFF, 0x44, 0x01];
        assert_eq!(marker_prefix_at_tail(&[0x00, 0xFF, 0x44], &marker), 2);
        assert_eq!(marker_prefix_at_tail(&[0x00, 0xFF], &marker), 1);
        assert_eq!(marker_prefix_at_tail(&[0x44, 0x01], &marker), 0);
        assert_eq!(marker_prefix_at_tail(&[], &marker), 0);
        // A full marker at the tail is found by the scan, not kept as prefix.
        assert_eq!(marker_prefix_at_tail(&[0xFF, 0x44, 0x01], &marker), 0);
    }

    proptest! {
        /// Chunk-boundary invariance: however a run of valid frames is
        /// fragmented, the assembler emits exactly those frames in order.
        #[test]
        fn prop_chunking_is_invariant(
            vitals in proptest::collection::vec((0u8..=1, 0u8..=100, 30u8..=220, 0u16..8191), 1..5),
            cuts in proptest::collection::vec(0usize..1000, 0..12),
        ) {
            let frames: Vec<Vec<u8>> = vitals
                .iter()
                .map(|&(f, s, p, pi)| jks50f_frame(f, s, p, pi))
                .collect();
            let stream: Vec<u8> = frames.concat();

            let mut cut_points: Vec<usize> =
                cuts.iter().map(|c| c % (stream.len() + 1)).collect();
            cut_points.sort_unstable();
            cut_points.dedup();

            let (mut asm, _) = assembler(&JKS50F);
            let mut emitted = Vec::new();
            let mut start = 0;
            for cut in cut_points.into_iter().chain(std::iter::once(stream.len())) {
                emitted.extend(asm.feed(&stream[start..cut]));
                start = cut;
            }

            prop_assert_eq!(emitted.len(), frames.len());
            for (out, expected) in emitted.iter().zip(&frames) {
                prop_assert_eq!(&out[..], &expected[..]);
            }
        }
    }
}
