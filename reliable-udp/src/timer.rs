//! Retransmission timeout estimation and the per-connection retransmit task.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RttEstimator`]: turns round-trip samples into a retransmission
//!   timeout (RTO) using the RFC 6298 rules, clamped to configured bounds.
//! - [`resend_expired`]: one scan over a [`SegmentStore`], re-sending every
//!   segment older than the RTO.  Used by the handshake directly and by the
//!   background task.
//! - [`RetransmitTask`]: the background task bound to one connection.  It is
//!   started when the handshake completes, stopped by
//!   [`RetransmitTask::stop`] during close, and aborted if dropped.
//!
//! The task only ever sees its own connection's store and socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::connection::ConnError;
use crate::socket::Socket;
use crate::store::SegmentStore;

// ---------------------------------------------------------------------------
// RTO estimation
// ---------------------------------------------------------------------------

/// Smoothed round-trip estimate and the RTO derived from it.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    min_rto: Duration,
    max_rto: Duration,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Option<Duration>,
}

impl RttEstimator {
    pub fn new(min_rto: Duration, max_rto: Duration) -> Self {
        Self {
            min_rto,
            max_rto,
            srtt: None,
            rttvar: None,
        }
    }

    /// Record a new RTT sample and update SRTT / RTTVAR (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_sample(&mut self, sample: Duration) {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + diff / 4);
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
            _ => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
    }

    /// Smoothed round-trip time, once a sample exists.
    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    /// `SRTT + 4·RTTVAR`, clamped to `[min_rto, max_rto]`.
    ///
    /// Before the first sample this is `min_rto`.
    pub fn rto(&self) -> Duration {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4).clamp(self.min_rto, self.max_rto),
            _ => self.min_rto,
        }
    }
}

// ---------------------------------------------------------------------------
// One retransmission pass
// ---------------------------------------------------------------------------

/// Re-send every segment in `store` that has waited longer than `rto`.
///
/// The store lock is held for the whole pass, so insertions, acknowledgements
/// and retransmissions never interleave.  Returns the number of frames sent,
/// or [`ConnError::RetriesExhausted`] once a segment has used up
/// `max_retries`.
pub(crate) async fn resend_expired(
    store: &Mutex<SegmentStore>,
    socket: &Socket,
    peer: SocketAddr,
    rto: Duration,
    max_retries: Option<u32>,
) -> Result<usize, ConnError> {
    let now = Instant::now();
    let mut store = store.lock().await;
    let mut resent = 0;

    for seg in store.expired_mut(now, rto) {
        if max_retries.is_some_and(|max| seg.retries >= max) {
            return Err(ConnError::RetriesExhausted { seq: seg.seq() });
        }
        socket.send_to(&seg.packet, peer).await?;
        seg.mark_retransmitted(now);
        resent += 1;
        log::debug!(
            "[rtx] → seq={} flags={:#04x} retry={}",
            seg.seq(),
            seg.packet.header.flags,
            seg.retries
        );
    }
    Ok(resent)
}

// ---------------------------------------------------------------------------
// Background task
// ---------------------------------------------------------------------------

/// Handle to the retransmission task of one connection.
#[derive(Debug)]
pub struct RetransmitTask {
    shutdown: watch::Sender<bool>,
    exhausted: watch::Receiver<Option<u32>>,
    handle: Option<JoinHandle<()>>,
}

impl RetransmitTask {
    /// Start retransmitting from `store` to `peer` every half RTO.
    pub fn spawn(
        store: Arc<Mutex<SegmentStore>>,
        socket: Arc<Socket>,
        peer: SocketAddr,
        rto: Duration,
        max_retries: Option<u32>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (exhausted_tx, exhausted_rx) = watch::channel(None);
        let handle = tokio::spawn(run(
            store,
            socket,
            peer,
            rto,
            max_retries,
            shutdown_rx,
            exhausted_tx,
        ));
        Self {
            shutdown: shutdown_tx,
            exhausted: exhausted_rx,
            handle: Some(handle),
        }
    }

    /// Resolves with the sequence number of the segment the task gave up on.
    ///
    /// Never resolves while retransmission is healthy or after a clean stop.
    pub async fn exhausted(&self) -> u32 {
        let mut rx = self.exhausted.clone();
        let seq = rx.wait_for(Option::is_some).await.ok().and_then(|s| *s);
        match seq {
            Some(seq) => seq,
            None => std::future::pending().await,
        }
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                log::error!("[rtx] task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for RetransmitTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn run(
    store: Arc<Mutex<SegmentStore>>,
    socket: Arc<Socket>,
    peer: SocketAddr,
    rto: Duration,
    max_retries: Option<u32>,
    mut shutdown: watch::Receiver<bool>,
    exhausted: watch::Sender<Option<u32>>,
) {
    let period = (rto / 2).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    log::debug!("[rtx] started for {peer}, rto={rto:?}");

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                match resend_expired(&store, &socket, peer, rto, max_retries).await {
                    Ok(_) => {}
                    Err(ConnError::RetriesExhausted { seq }) => {
                        log::warn!("[rtx] seq={seq} unacknowledged after retry limit; giving up");
                        exhausted.send_replace(Some(seq));
                        break;
                    }
                    Err(e) => log::warn!("[rtx] retransmission to {peer} failed: {e}"),
                }
            }
        }
    }
    log::debug!("[rtx] stopped for {peer}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{flags, Packet};

    #[test]
    fn rto_before_sample_is_floor() {
        let est = RttEstimator::new(Duration::from_millis(200), Duration::from_secs(60));
        assert_eq!(est.srtt(), None);
        assert_eq!(est.rto(), Duration::from_millis(200));
    }

    #[test]
    fn first_sample_sets_rto_to_three_rtt() {
        let mut est = RttEstimator::new(Duration::from_millis(1), Duration::from_secs(60));
        est.record_sample(Duration::from_millis(100));
        assert_eq!(est.srtt(), Some(Duration::from_millis(100)));
        // SRTT + 4 * (R / 2)
        assert_eq!(est.rto(), Duration::from_millis(300));
    }

    #[test]
    fn tiny_loopback_rtt_is_clamped_to_floor() {
        let mut est = RttEstimator::new(Duration::from_millis(200), Duration::from_secs(60));
        est.record_sample(Duration::from_micros(40));
        assert_eq!(est.rto(), Duration::from_millis(200));
    }

    #[test]
    fn huge_rtt_is_clamped_to_ceiling() {
        let mut est = RttEstimator::new(Duration::from_millis(200), Duration::from_secs(2));
        est.record_sample(Duration::from_secs(5));
        assert_eq!(est.rto(), Duration::from_secs(2));
    }

    #[test]
    fn later_samples_are_smoothed() {
        let mut est = RttEstimator::new(Duration::from_millis(1), Duration::from_secs(60));
        est.record_sample(Duration::from_millis(80));
        est.record_sample(Duration::from_millis(160));
        // SRTT = 7/8·80 + 1/8·160 = 90
        assert_eq!(est.srtt(), Some(Duration::from_millis(90)));
    }

    async fn pair() -> (Arc<Socket>, Socket) {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let a = Socket::bind(addr).await.unwrap();
        let b = Socket::bind(addr).await.unwrap();
        (Arc::new(a), b)
    }

    #[tokio::test]
    async fn resend_expired_sends_only_old_segments() {
        let (sender, peer) = pair().await;
        let store = Mutex::new(SegmentStore::new());
        let old = Instant::now() - Duration::from_secs(1);
        {
            let mut s = store.lock().await;
            s.insert(Packet::data(1, b"stale".to_vec()), old);
            s.insert(Packet::data(2, b"fresh".to_vec()), Instant::now());
        }

        let sent = resend_expired(&store, &sender, peer.local_addr, Duration::from_millis(500), None)
            .await
            .unwrap();
        assert_eq!(sent, 1);

        let (pkt, _) = peer.recv_from().await.unwrap();
        assert_eq!(pkt.header.seq, 1);
        assert_eq!(pkt.payload, b"stale");
        assert_eq!(store.lock().await.get(1).unwrap().retries, 1);
    }

    #[tokio::test]
    async fn resend_expired_reports_retry_ceiling() {
        let (sender, peer) = pair().await;
        let store = Mutex::new(SegmentStore::new());
        let old = Instant::now() - Duration::from_secs(1);
        store.lock().await.insert(Packet::control(flags::FIN, 9, 0), old);

        let rto = Duration::from_millis(1);
        resend_expired(&store, &sender, peer.local_addr, rto, Some(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let err = resend_expired(&store, &sender, peer.local_addr, rto, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnError::RetriesExhausted { seq: 9 }));
    }

    #[tokio::test]
    async fn task_retransmits_until_acknowledged_then_stops() {
        let (sender, peer) = pair().await;
        let store = Arc::new(Mutex::new(SegmentStore::new()));
        store
            .lock()
            .await
            .insert(Packet::data(3, b"again".to_vec()), Instant::now());

        let task = RetransmitTask::spawn(
            store.clone(),
            sender,
            peer.local_addr,
            Duration::from_millis(10),
            None,
        );

        let (pkt, _) = tokio::time::timeout(Duration::from_secs(2), peer.recv_from())
            .await
            .expect("no retransmission")
            .unwrap();
        assert_eq!(pkt.header.seq, 3);

        assert_eq!(store.lock().await.acknowledge(3), 1);
        task.stop().await;
    }

    #[tokio::test]
    async fn task_reports_exhaustion() {
        let (sender, peer) = pair().await;
        let store = Arc::new(Mutex::new(SegmentStore::new()));
        store
            .lock()
            .await
            .insert(Packet::data(7, b"lost".to_vec()), Instant::now());

        let task = RetransmitTask::spawn(
            store,
            sender,
            peer.local_addr,
            Duration::from_millis(5),
            Some(2),
        );
        let seq = tokio::time::timeout(Duration::from_secs(2), task.exhausted())
            .await
            .expect("task never gave up");
        assert_eq!(seq, 7);
    }
}
