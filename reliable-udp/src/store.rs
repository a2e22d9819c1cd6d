//! Per-connection table of sent-but-unacknowledged segments.
//!
//! [`SegmentStore`] tracks every SYN, DATA and FIN frame until the peer
//! acknowledges it.  It does **not** touch the socket; the connection inserts
//! and acknowledges, the retransmission task (see [`crate::timer`]) scans for
//! entries that have waited longer than the RTO.
//!
//! # Acknowledgement contract
//! - An ack removes the entry whose sequence number equals it exactly.
//! - Because the peer only accepts frames in order, an exact match also
//!   covers every older entry, which is removed with it.
//! - An ack that matches no entry leaves the store untouched.
//!
//! Sequence numbers are u32 and wrap around; two numbers are compared in
//! wrap-around space, which is sound while they are less than `u32::MAX / 2`
//! apart.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::packet::Packet;

/// Returns `true` when sequence number `a` is ≤ `b` in wrap-around space.
#[inline]
pub(crate) fn seq_le(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) <= (u32::MAX / 2)
}

// ---------------------------------------------------------------------------
// Segment
// ---------------------------------------------------------------------------

/// A frame that has been sent but not yet acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// The frame on the wire, resent unchanged on timeout.
    pub packet: Packet,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    /// How many times this frame has been retransmitted (0 = sent once).
    pub retries: u32,
}

impl Segment {
    pub fn seq(&self) -> u32 {
        self.packet.header.seq
    }

    /// How long this segment has waited since its last transmission.
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.sent_at)
    }

    /// Record a retransmission at `now`.
    pub fn mark_retransmitted(&mut self, now: Instant) {
        self.sent_at = now;
        self.retries += 1;
    }
}

// ---------------------------------------------------------------------------
// SegmentStore
// ---------------------------------------------------------------------------

/// Outstanding segments of one connection, keyed by sequence number.
#[derive(Debug, Default)]
pub struct SegmentStore {
    segments: BTreeMap<u32, Segment>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of segments awaiting acknowledgement.
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn contains(&self, seq: u32) -> bool {
        self.segments.contains_key(&seq)
    }

    pub fn get(&self, seq: u32) -> Option<&Segment> {
        self.segments.get(&seq)
    }

    /// Track a just-transmitted frame.
    ///
    /// Returns `false` and leaves the existing entry alone if a segment with
    /// the same sequence number is already outstanding.
    pub fn insert(&mut self, packet: Packet, now: Instant) -> bool {
        let seq = packet.header.seq;
        if self.segments.contains_key(&seq) {
            return false;
        }
        self.segments.insert(
            seq,
            Segment {
                packet,
                sent_at: now,
                retries: 0,
            },
        );
        true
    }

    /// Process an inbound acknowledgement number.
    ///
    /// Returns the number of segments removed; `0` means the ack matched
    /// nothing (duplicate or stray) and the store is unchanged.
    pub fn acknowledge(&mut self, ack: u32) -> usize {
        if !self.segments.contains_key(&ack) {
            return 0;
        }
        let before = self.segments.len();
        self.segments.retain(|&seq, _| !seq_le(seq, ack));
        before - self.segments.len()
    }

    /// Segments whose last transmission is older than `rto`, oldest sequence
    /// number first.
    pub fn expired_mut(
        &mut self,
        now: Instant,
        rto: Duration,
    ) -> impl Iterator<Item = &mut Segment> {
        self.segments
            .values_mut()
            .filter(move |seg| seg.age(now) > rto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::flags;

    fn store_with(seqs: &[u32], now: Instant) -> SegmentStore {
        let mut store = SegmentStore::new();
        for &seq in seqs {
            assert!(store.insert(Packet::data(seq, vec![seq as u8]), now));
        }
        store
    }

    #[test]
    fn insert_tracks_segment() {
        let now = Instant::now();
        let store = store_with(&[10], now);
        assert_eq!(store.len(), 1);
        let seg = store.get(10).unwrap();
        assert_eq!(seg.seq(), 10);
        assert_eq!(seg.retries, 0);
        assert_eq!(seg.sent_at, now);
    }

    #[test]
    fn duplicate_sequence_rejected() {
        let now = Instant::now();
        let mut store = store_with(&[10], now);
        assert!(!store.insert(Packet::data(10, b"other".to_vec()), now));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(10).unwrap().packet.payload, vec![10u8]);
    }

    #[test]
    fn exact_ack_removes_segment() {
        let mut store = store_with(&[10], Instant::now());
        assert_eq!(store.acknowledge(10), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn unmatched_ack_leaves_store_unchanged() {
        let mut store = store_with(&[10, 11, 12], Instant::now());
        assert_eq!(store.acknowledge(13), 0);
        assert_eq!(store.acknowledge(9), 0);
        assert_eq!(store.acknowledge(0), 0);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn matching_ack_covers_older_segments() {
        let mut store = store_with(&[10, 11, 12], Instant::now());
        assert_eq!(store.acknowledge(11), 2);
        assert!(store.contains(12));
        assert!(!store.contains(10));
        // Duplicate of an ack already processed.
        assert_eq!(store.acknowledge(11), 0);
    }

    #[test]
    fn ack_across_wrap_around() {
        let start = u32::MAX - 1;
        let seqs = [start, start.wrapping_add(1), start.wrapping_add(2)];
        let mut store = store_with(&seqs, Instant::now());
        assert_eq!(store.acknowledge(start.wrapping_add(1)), 2);
        assert!(store.contains(0));
    }

    #[test]
    fn expired_selects_only_old_segments() {
        let now = Instant::now();
        let mut store = SegmentStore::new();
        store.insert(Packet::control(flags::SYN, 1, 0), now);
        store.insert(Packet::data(2, b"fresh".to_vec()), now + Duration::from_millis(90));

        let later = now + Duration::from_millis(100);
        let rto = Duration::from_millis(50);
        let expired: Vec<u32> = store.expired_mut(later, rto).map(|s| s.seq()).collect();
        assert_eq!(expired, vec![1]);
    }

    #[test]
    fn retransmit_refreshes_timestamp_and_counts() {
        let now = Instant::now();
        let mut store = store_with(&[5], now);
        let later = now + Duration::from_millis(300);
        for seg in store.expired_mut(later, Duration::from_millis(100)) {
            seg.mark_retransmitted(later);
        }
        let seg = store.get(5).unwrap();
        assert_eq!(seg.retries, 1);
        assert_eq!(seg.sent_at, later);
        assert_eq!(store.expired_mut(later, Duration::from_millis(100)).count(), 0);
    }

    #[test]
    fn seq_le_wraps() {
        assert!(seq_le(1, 2));
        assert!(seq_le(2, 2));
        assert!(!seq_le(3, 2));
        assert!(seq_le(u32::MAX, 0));
        assert!(!seq_le(0, u32::MAX));
    }
}
