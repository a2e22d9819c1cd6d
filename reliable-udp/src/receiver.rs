//! Go-back-N receive-side state.
//!
//! [`Receiver`] implements the receiver discipline:
//!
//! - Only the **next expected** frame (`seq == rcv_nxt`) is accepted; every
//!   accepted frame advances `rcv_nxt` by exactly one.
//! - Future frames are **discarded**, never buffered; the sender's
//!   retransmission closes the gap.
//! - Frames already accepted (duplicates) are reported so the caller can
//!   re-acknowledge them.
//! - Every accepted frame's sequence number is queued in
//!   `pending_acks` until the connection flushes it onto the wire.
//!
//! The inbox holds payloads that were accepted in order but not yet handed to
//! the application (accepted while the caller was blocked in `send` or
//! `close`, or the tail of a payload longer than the caller's read limit).
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::VecDeque;

use crate::store::seq_le;

/// What happened to an inbound sequenced frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// In order; `rcv_nxt` advanced and an ack was queued.
    Accepted,
    /// Already accepted earlier; should be re-acknowledged.
    Duplicate,
    /// Ahead of `rcv_nxt`; discarded.
    OutOfOrder,
}

/// Go-back-N receive-side state for one connection.
#[derive(Debug, Default)]
pub struct Receiver {
    /// Next expected sequence number from the peer.
    rcv_nxt: u32,

    /// Sequence numbers accepted but not yet acknowledged on the wire.
    pending_acks: VecDeque<u32>,

    /// In-order payloads waiting for the application.
    inbox: VecDeque<Vec<u8>>,
}

impl Receiver {
    /// Create a new [`Receiver`].
    ///
    /// `peer_isn` is the sequence number of the peer's SYN; its first data
    /// frame carries `peer_isn + 1`.
    pub fn new(peer_isn: u32) -> Self {
        Self {
            rcv_nxt: peer_isn.wrapping_add(1),
            pending_acks: VecDeque::new(),
            inbox: VecDeque::new(),
        }
    }

    /// Next sequence number that will be accepted.
    pub fn rcv_nxt(&self) -> u32 {
        self.rcv_nxt
    }

    /// Classify an inbound DATA or FIN frame and accept it if in order.
    pub fn on_segment(&mut self, seq: u32) -> Arrival {
        if seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
            self.pending_acks.push_back(seq);
            Arrival::Accepted
        } else if seq_le(seq, self.rcv_nxt) {
            Arrival::Duplicate
        } else {
            Arrival::OutOfOrder
        }
    }

    /// Queue an acknowledgement for a frame accepted earlier.
    pub fn queue_ack(&mut self, seq: u32) {
        self.pending_acks.push_back(seq);
    }

    /// Take every pending acknowledgement, oldest first.
    pub fn take_acks(&mut self) -> Vec<u32> {
        self.pending_acks.drain(..).collect()
    }

    pub fn has_pending_acks(&self) -> bool {
        !self.pending_acks.is_empty()
    }

    /// Park an accepted payload until the application asks for it.
    pub fn push_ready(&mut self, payload: Vec<u8>) {
        if !payload.is_empty() {
            self.inbox.push_back(payload);
        }
    }

    /// Hand out at most `max_len` bytes of the oldest parked payload.
    ///
    /// A payload longer than `max_len` is split; its tail stays at the front
    /// of the inbox for the next call.
    pub fn read(&mut self, max_len: usize) -> Option<Vec<u8>> {
        let mut payload = self.inbox.pop_front()?;
        if payload.len() > max_len {
            let tail = payload.split_off(max_len);
            self.inbox.push_front(tail);
        }
        Some(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state() {
        let mut r = Receiver::new(41);
        assert_eq!(r.rcv_nxt(), 42);
        assert!(!r.has_pending_acks());
        assert!(r.read(16).is_none());
    }

    #[test]
    fn in_order_segment_accepted() {
        let mut r = Receiver::new(99);
        assert_eq!(r.on_segment(100), Arrival::Accepted);
        assert_eq!(r.rcv_nxt(), 101);
        assert_eq!(r.take_acks(), vec![100]);
        assert!(!r.has_pending_acks());
    }

    #[test]
    fn out_of_order_segment_discarded() {
        let mut r = Receiver::new(99);
        assert_eq!(r.on_segment(102), Arrival::OutOfOrder);
        assert_eq!(r.rcv_nxt(), 100);
        assert!(!r.has_pending_acks());
    }

    #[test]
    fn duplicate_segment_detected() {
        let mut r = Receiver::new(99);
        assert_eq!(r.on_segment(100), Arrival::Accepted);
        assert_eq!(r.on_segment(100), Arrival::Duplicate);
        assert_eq!(r.on_segment(50), Arrival::Duplicate);
        assert_eq!(r.rcv_nxt(), 101);
        assert_eq!(r.take_acks(), vec![100]);
    }

    #[test]
    fn sequential_segments_advance_by_one() {
        let mut r = Receiver::new(0);
        for seq in 1..=5 {
            assert_eq!(r.on_segment(seq), Arrival::Accepted);
        }
        assert_eq!(r.rcv_nxt(), 6);
        assert_eq!(r.take_acks(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn wraps_past_u32_max() {
        let mut r = Receiver::new(u32::MAX - 1);
        assert_eq!(r.on_segment(u32::MAX), Arrival::Accepted);
        assert_eq!(r.on_segment(0), Arrival::Accepted);
        assert_eq!(r.rcv_nxt(), 1);
        assert_eq!(r.on_segment(u32::MAX), Arrival::Duplicate);
    }

    #[test]
    fn read_splits_long_payloads() {
        let mut r = Receiver::new(0);
        r.push_ready(b"hello world".to_vec());
        r.push_ready(b"next".to_vec());

        assert_eq!(r.read(5).unwrap(), b"hello");
        assert_eq!(r.read(100).unwrap(), b" world");
        assert_eq!(r.read(100).unwrap(), b"next");
        assert!(r.read(100).is_none());
    }

    #[test]
    fn empty_payloads_are_not_parked() {
        let mut r = Receiver::new(0);
        r.push_ready(Vec::new());
        assert!(r.read(16).is_none());
    }

    #[test]
    fn requeued_ack_is_flushed_again() {
        let mut r = Receiver::new(0);
        r.on_segment(1);
        r.take_acks();
        r.queue_ack(1);
        assert_eq!(r.take_acks(), vec![1]);
    }
}
