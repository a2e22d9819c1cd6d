//! Per-connection lifecycle manager.
//!
//! A [`Connection`] owns the complete state for one peer-to-peer session:
//! - Driving the finite-state machine (see [`crate::state`]).
//! - The three-way handshake (`connect` / `accept`).
//! - Reliable, ordered transfer: every SYN, DATA and FIN frame is recorded in
//!   the connection's [`SegmentStore`] until acknowledged, and the
//!   [`RetransmitTask`] re-sends whatever waits longer than the RTO.
//! - Dispatching inbound [`Packet`]s: acks clear the store, in-order DATA is
//!   delivered, everything else is discarded (Go-Back-N).
//! - Teardown (`close`).
//!
//! ```text
//!  Application
//!      │ connect / accept / send / receive / close        (&mut self, async)
//!      ▼
//!  Connection ──┬── Receiver       (rcv_nxt, pending acks, inbox)
//!               ├── Simulator      (inbound drop decisions)
//!               ├── Arc<Mutex<SegmentStore>> ◀──┐
//!               └── Arc<Socket> ◀───────────────┤
//!                                               │
//!                                    RetransmitTask (tokio task)
//! ```
//!
//! Every transmission by the foreground, ACK frames included, happens with
//! the store lock held, so it never interleaves with a retransmission pass.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout_at;

use crate::config::{debug_level_filter, Config};
use crate::packet::{flags, Packet, MAX_PAYLOAD};
use crate::receiver::{Arrival, Receiver};
use crate::simulator::Simulator;
use crate::socket::{Socket, SocketError};
use crate::state::ConnectionState;
use crate::store::SegmentStore;
use crate::timer::{resend_expired, RetransmitTask, RttEstimator};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors returned by [`Connection`] operations.
#[derive(Debug, Error)]
pub enum ConnError {
    /// Bind or transport failure.
    #[error(transparent)]
    Socket(#[from] SocketError),

    /// A frame arrived during the handshake that does not fit the current
    /// step.  The frame is ignored and the handshake continues.
    #[error("unexpected handshake frame: {0}")]
    HandshakeMismatch(String),

    /// The handshake frame was retransmitted up to the retry limit without
    /// an answer.
    #[error("handshake with {peer} failed: no answer after retry limit")]
    HandshakeFailed { peer: SocketAddr },

    /// A segment was retransmitted up to the retry limit without being
    /// acknowledged.
    #[error("segment seq={seq} not acknowledged after retry limit")]
    RetriesExhausted { seq: u32 },

    #[error("payload of {len} bytes exceeds the {MAX_PAYLOAD}-byte limit")]
    PayloadTooLarge { len: usize },

    #[error("operation not valid in state {0}")]
    BadState(ConnectionState),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConnError {
    /// `true` when the connection is still usable after this error.
    ///
    /// Transport failures and exhausted retries are fatal; the remaining
    /// variants describe a rejected call or an ignored frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::HandshakeMismatch(_)
                | Self::PayloadTooLarge { .. }
                | Self::BadState(_)
                | Self::InvalidConfig(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// What an inbound frame turned out to be, after its side effects on the
/// store and the receiver were applied.
#[derive(Debug)]
enum Inbound {
    /// In-order payload for the application.
    Data(Vec<u8>),
    /// The peer's FIN, accepted in order.
    Fin,
    /// Anything else: acks, duplicates, discarded frames.
    Control,
}

/// A reliable, ordered connection over UDP.
///
/// Obtain one with [`Connection::bind`], then open it with
/// [`Connection::connect`] (client) or [`Connection::accept`] (server).
pub struct Connection {
    state: ConnectionState,
    socket: Arc<Socket>,
    /// Remote peer, fixed once the handshake picks it.
    peer: Option<SocketAddr>,
    config: Config,

    /// Sequence number of the next frame we send.
    next_seq: u32,
    receiver: Receiver,

    /// Sent-but-unacknowledged frames, shared with the retransmit task.
    store: Arc<Mutex<SegmentStore>>,
    rtt: RttEstimator,

    isn_rng: StdRng,
    simulator: Simulator,

    /// Final handshake ACK, re-sent if the peer repeats its SYN+ACK.
    handshake_ack: Option<Packet>,
    retransmit: Option<RetransmitTask>,
}

impl Connection {
    // -----------------------------------------------------------------------
    // Construction and configuration
    // -----------------------------------------------------------------------

    /// Bind a connection endpoint to `local` with the default [`Config`].
    pub async fn bind(local: SocketAddr) -> Result<Self, ConnError> {
        Self::bind_with_config(local, Config::default()).await
    }

    /// Bind a connection endpoint to `local`.
    ///
    /// A non-zero `config.debug_level` is applied to the global log filter;
    /// zero leaves it as the application configured it.
    pub async fn bind_with_config(local: SocketAddr, config: Config) -> Result<Self, ConnError> {
        config.validate().map_err(ConnError::InvalidConfig)?;
        let socket = Socket::bind(local).await?;
        if config.debug_level > 0 {
            log::set_max_level(debug_level_filter(config.debug_level));
        }

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let simulator = Simulator::new(config.drop_probability, seed);
        log::debug!(
            "[conn] bound {} (seed={seed}, drop={})",
            socket.local_addr,
            simulator.drop_probability()
        );

        Ok(Self {
            state: ConnectionState::Init,
            socket: Arc::new(socket),
            peer: None,
            next_seq: 0,
            receiver: Receiver::default(),
            store: Arc::new(Mutex::new(SegmentStore::new())),
            rtt: RttEstimator::new(config.min_rto, config.max_rto),
            isn_rng: StdRng::seed_from_u64(seed),
            simulator,
            handshake_ack: None,
            retransmit: None,
            config,
        })
    }

    /// Set the log verbosity (0 = warnings only, 5 = every frame).
    pub fn set_debug_level(&mut self, level: u8) {
        self.config.debug_level = level;
        log::set_max_level(debug_level_filter(level));
    }

    /// Set the probability that an inbound frame is discarded.
    pub fn set_drop_probability(&mut self, probability: f64) -> Result<(), ConnError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(ConnError::InvalidConfig(format!(
                "drop probability {probability} is outside [0, 1]"
            )));
        }
        self.config.drop_probability = probability;
        self.simulator.set_drop_probability(probability);
        Ok(())
    }

    /// Reseed initial-sequence-number selection and drop decisions.
    pub fn set_random_seed(&mut self, seed: u64) {
        self.config.seed = Some(seed);
        self.isn_rng = StdRng::seed_from_u64(seed);
        self.simulator.reseed(seed);
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Smoothed round-trip time measured during the handshake.
    pub fn round_trip_estimate(&self) -> Option<Duration> {
        self.rtt.srtt()
    }

    /// Retransmission timeout in effect.
    pub fn rto(&self) -> Duration {
        self.rtt.rto()
    }

    /// Sequence number the next DATA or FIN frame will carry.
    pub fn next_send_sequence(&self) -> u32 {
        self.next_seq
    }

    /// Sequence number the next accepted frame from the peer must carry.
    pub fn expected_receive_sequence(&self) -> u32 {
        self.receiver.rcv_nxt()
    }

    /// Inbound frames discarded by the drop simulator so far.
    pub fn dropped_frames(&self) -> u64 {
        self.simulator.dropped()
    }

    /// Number of frames sent but not yet acknowledged.
    pub async fn outstanding(&self) -> usize {
        self.store.lock().await.len()
    }

    // -----------------------------------------------------------------------
    // Handshake
    // -----------------------------------------------------------------------

    /// Active open: send SYN to `peer` and wait for its SYN+ACK.
    ///
    /// The SYN is re-sent every `handshake_timeout`; after `max_retries`
    /// unanswered attempts the call fails with [`ConnError::HandshakeFailed`].
    pub async fn connect(&mut self, peer: SocketAddr) -> Result<(), ConnError> {
        self.expect_state(&[ConnectionState::Init])?;
        self.peer = Some(peer);
        self.state = ConnectionState::SynSent;

        let isn: u32 = self.isn_rng.random();
        self.send_tracked(Packet::control(flags::SYN, isn, 0)).await?;
        log::debug!("[conn] → SYN seq={isn} to {peer}");

        let synack = loop {
            let Some(pkt) = self.handshake_recv(isn).await? else {
                continue;
            };
            if pkt.has(flags::SYN | flags::ACK) && pkt.header.ack == isn {
                break pkt;
            }
            let err = ConnError::HandshakeMismatch(format!(
                "flags={:#04x} ack={} while waiting for SYN+ACK of {isn}",
                pkt.header.flags, pkt.header.ack
            ));
            log::warn!("[conn] {err}; ignoring");
        };

        self.acknowledge_handshake(isn).await;
        let peer_isn = synack.header.seq;
        self.receiver = Receiver::new(peer_isn);
        self.next_seq = isn.wrapping_add(1);

        let ack = Packet::ack(self.next_seq, peer_isn);
        self.send_untracked(&ack).await?;
        log::debug!("[conn] ← SYN+ACK seq={peer_isn}; → ACK ack={peer_isn}");
        self.handshake_ack = Some(ack);

        self.establish(peer);
        Ok(())
    }

    /// Passive open: wait for a SYN from any address, answer with SYN+ACK
    /// and wait for the final ACK.
    ///
    /// Waiting for the first SYN has no time limit.  An in-order DATA or FIN
    /// frame from the client also completes the handshake (its ACK was lost).
    /// A DATA payload is kept for the next [`receive`](Self::receive); a FIN
    /// leaves the connection in `RemoteClosed`.
    pub async fn accept(&mut self) -> Result<SocketAddr, ConnError> {
        self.expect_state(&[ConnectionState::Init])?;
        self.state = ConnectionState::Listen;
        log::debug!("[conn] listening on {}", self.socket.local_addr);

        let (peer, client_isn) = loop {
            let (pkt, from) = self.next_packet().await?;
            if pkt.header.flags == flags::SYN {
                break (from, pkt.header.seq);
            }
            log::trace!(
                "[conn] ignoring flags={:#04x} from {from} while listening",
                pkt.header.flags
            );
        };
        self.peer = Some(peer);
        self.state = ConnectionState::SynReceived;
        self.receiver = Receiver::new(client_isn);

        let isn: u32 = self.isn_rng.random();
        self.next_seq = isn.wrapping_add(1);
        let synack = Packet::control(flags::SYN | flags::ACK, isn, client_isn);
        self.send_tracked(synack.clone()).await?;
        log::debug!("[conn] ← SYN seq={client_isn} from {peer}; → SYN+ACK seq={isn}");

        let early = loop {
            let Some(pkt) = self.handshake_recv(isn).await? else {
                continue;
            };
            if pkt.header.flags == flags::SYN {
                if pkt.header.seq == client_isn {
                    log::debug!("[conn] ← duplicate SYN; → SYN+ACK again");
                    self.send_untracked(&synack).await?;
                }
                continue;
            }
            if pkt.has(flags::ACK) && !pkt.has(flags::SYN) && pkt.header.ack == isn {
                log::debug!("[conn] ← ACK ack={isn}");
                break None;
            }
            let carries_stream = pkt.has(flags::DATA) || pkt.has(flags::FIN);
            if carries_stream && pkt.header.seq == self.receiver.rcv_nxt() {
                log::debug!(
                    "[conn] ← flags={:#04x} seq={} completes handshake",
                    pkt.header.flags,
                    pkt.header.seq
                );
                break Some(pkt);
            }
            let err = ConnError::HandshakeMismatch(format!(
                "flags={:#04x} seq={} ack={} while waiting for ACK of {isn}",
                pkt.header.flags, pkt.header.seq, pkt.header.ack
            ));
            log::warn!("[conn] {err}; ignoring");
        };

        self.acknowledge_handshake(isn).await;
        self.establish(peer);

        if let Some(pkt) = early {
            if let Inbound::Data(payload) = self.dispatch(pkt).await? {
                self.receiver.push_ready(payload);
            }
        }
        Ok(peer)
    }

    /// Wait for a frame until the handshake frame `isn` is due again.  On
    /// expiry, re-send it and return `None`.
    ///
    /// The deadline runs from the frame's last transmission, not from the
    /// last frame received.
    async fn handshake_recv(&mut self, isn: u32) -> Result<Option<Packet>, ConnError> {
        let last_sent = self.store.lock().await.get(isn).map(|seg| seg.sent_at);
        let due = last_sent.unwrap_or_else(Instant::now) + self.config.handshake_timeout;
        match timeout_at(tokio::time::Instant::from_std(due), self.next_packet()).await {
            Ok(received) => Ok(Some(received?.0)),
            Err(_elapsed) => {
                let peer = self.remote()?;
                let resent = resend_expired(
                    &self.store,
                    &self.socket,
                    peer,
                    Duration::ZERO,
                    self.config.max_retries,
                )
                .await;
                match resent {
                    Ok(n) => {
                        log::debug!("[conn] handshake timeout; re-sent {n} frame(s) to {peer}");
                        Ok(None)
                    }
                    Err(ConnError::RetriesExhausted { .. }) => {
                        Err(ConnError::HandshakeFailed { peer })
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Take an RTT sample from the handshake frame `isn` and retire it.
    async fn acknowledge_handshake(&mut self, isn: u32) {
        let sample = {
            let mut store = self.store.lock().await;
            let sample = store.get(isn).map(|seg| seg.age(Instant::now()));
            store.acknowledge(isn);
            sample
        };
        if let Some(sample) = sample {
            self.rtt.record_sample(sample);
        }
    }

    fn establish(&mut self, peer: SocketAddr) {
        let rto = self.rtt.rto();
        self.retransmit = Some(RetransmitTask::spawn(
            self.store.clone(),
            self.socket.clone(),
            peer,
            rto,
            self.config.max_retries,
        ));
        self.state = ConnectionState::Established;
        log::info!(
            "[conn] established with {peer} (rtt={:?}, rto={rto:?})",
            self.rtt.srtt()
        );
    }

    // -----------------------------------------------------------------------
    // Data transfer
    // -----------------------------------------------------------------------

    /// Send `payload` as one DATA frame and return its length.
    ///
    /// Blocks while `window` frames are unacknowledged, processing inbound
    /// frames meanwhile.  An empty payload sends nothing.
    pub async fn send(&mut self, payload: &[u8]) -> Result<usize, ConnError> {
        self.expect_state(&[ConnectionState::Established, ConnectionState::RemoteClosed])?;
        if payload.len() > MAX_PAYLOAD {
            return Err(ConnError::PayloadTooLarge { len: payload.len() });
        }
        if payload.is_empty() {
            return Ok(0);
        }
        self.flush_acks().await?;

        while self.outstanding().await >= self.config.window {
            let (pkt, _) = self.next_packet().await?;
            if let Inbound::Data(data) = self.dispatch(pkt).await? {
                self.receiver.push_ready(data);
            }
            self.flush_acks().await?;
        }

        let seq = self.next_seq;
        self.next_seq = seq.wrapping_add(1);
        self.send_tracked(Packet::data(seq, payload.to_vec())).await?;
        log::debug!("[conn] → DATA seq={seq} len={}", payload.len());
        Ok(payload.len())
    }

    /// Receive up to `max_len` bytes of in-order data.
    ///
    /// Blocks until data is available.  A payload longer than `max_len` is
    /// returned over several calls.  Returns an empty vector once the peer
    /// has closed its direction, or immediately when `max_len` is 0.
    pub async fn receive(&mut self, max_len: usize) -> Result<Vec<u8>, ConnError> {
        self.expect_state(&[ConnectionState::Established, ConnectionState::RemoteClosed])?;
        if max_len == 0 {
            return Ok(Vec::new());
        }
        self.flush_acks().await?;

        if let Some(data) = self.receiver.read(max_len) {
            return Ok(data);
        }
        if self.state.is_terminal() {
            return Ok(Vec::new());
        }

        loop {
            let (pkt, _) = self.next_packet().await?;
            match self.dispatch(pkt).await? {
                Inbound::Data(payload) => {
                    self.receiver.push_ready(payload);
                    if let Some(data) = self.receiver.read(max_len) {
                        return Ok(data);
                    }
                }
                Inbound::Fin => return Ok(Vec::new()),
                Inbound::Control => {}
            }
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Send FIN and wait until the peer's FIN has arrived and ours has been
    /// acknowledged.
    ///
    /// Both ends are expected to call `close`.  Once either has happened, the
    /// other is awaited for at most `close_linger_rtos` RTOs before the
    /// connection closes anyway.  Closing a connection that never opened
    /// succeeds immediately.
    pub async fn close(&mut self) -> Result<(), ConnError> {
        match self.state {
            ConnectionState::Closed => return Ok(()),
            ConnectionState::Established | ConnectionState::RemoteClosed => {}
            ConnectionState::Closing => return Err(ConnError::BadState(self.state)),
            state => {
                debug_assert!(state == ConnectionState::Init || state.is_handshaking());
                self.finish().await;
                return Ok(());
            }
        }

        let peer = self.remote()?;
        let mut peer_fin_seen = self.state == ConnectionState::RemoteClosed;
        self.flush_acks().await?;
        self.state = ConnectionState::Closing;

        let fin_seq = self.next_seq;
        self.next_seq = fin_seq.wrapping_add(1);
        self.send_tracked(Packet::control(flags::FIN, fin_seq, 0)).await?;
        log::debug!("[conn] → FIN seq={fin_seq}");

        let linger = self.rtt.rto() * self.config.close_linger_rtos;
        let mut deadline = peer_fin_seen.then(|| tokio::time::Instant::now() + linger);

        loop {
            let fin_acked = !self.store.lock().await.contains(fin_seq);
            if peer_fin_seen && fin_acked {
                break;
            }
            if fin_acked && deadline.is_none() {
                deadline = Some(tokio::time::Instant::now() + linger);
            }

            let received = match deadline {
                Some(at) => match timeout_at(at, self.next_packet()).await {
                    Ok(received) => received,
                    Err(_elapsed) if fin_acked => {
                        log::warn!("[conn] no FIN from {peer} after ours was ACKed; closing");
                        break;
                    }
                    Err(_elapsed) => {
                        log::warn!("[conn] FIN seq={fin_seq} not ACKed by {peer}; force-closing");
                        break;
                    }
                },
                None => self.next_packet().await,
            };
            let pkt = match received {
                Ok((pkt, _)) => pkt,
                Err(ConnError::RetriesExhausted { seq }) if peer_fin_seen => {
                    log::warn!("[conn] seq={seq} not ACKed by {peer}; force-closing");
                    break;
                }
                Err(e) => return Err(e),
            };

            match self.dispatch(pkt).await? {
                Inbound::Data(payload) => self.receiver.push_ready(payload),
                Inbound::Fin => {
                    peer_fin_seen = true;
                    deadline = Some(tokio::time::Instant::now() + linger);
                }
                Inbound::Control => {}
            }
            self.flush_acks().await?;
        }

        self.finish().await;
        Ok(())
    }

    async fn finish(&mut self) {
        if let Some(task) = self.retransmit.take() {
            task.stop().await;
        }
        let store = self.store.lock().await;
        if !store.is_empty() {
            log::debug!("[conn] discarding {} unacknowledged frame(s)", store.len());
        }
        drop(store);
        self.state = ConnectionState::Closed;
        match self.peer {
            Some(peer) => log::info!("[conn] closed connection with {peer}"),
            None => log::debug!("[conn] closed {}", self.socket.local_addr),
        }
    }

    // -----------------------------------------------------------------------
    // Inbound processing
    // -----------------------------------------------------------------------

    /// Receive the next frame from the peer (from anyone while listening).
    ///
    /// Frames from other addresses and frames chosen by the drop simulator
    /// are discarded here.  Fails with [`ConnError::RetriesExhausted`] if
    /// the retransmit task gives up while we wait.
    async fn next_packet(&mut self) -> Result<(Packet, SocketAddr), ConnError> {
        loop {
            let (pkt, from) = match &self.retransmit {
                Some(task) => tokio::select! {
                    received = self.socket.recv_from() => received?,
                    seq = task.exhausted() => return Err(ConnError::RetriesExhausted { seq }),
                },
                None => self.socket.recv_from().await?,
            };
            if self.peer.is_some_and(|peer| peer != from) {
                log::trace!("[conn] dropping frame from stranger {from}");
                continue;
            }
            if self.simulator.should_drop() {
                log::debug!(
                    "[sim] dropped flags={:#04x} seq={} ack={}",
                    pkt.header.flags,
                    pkt.header.seq,
                    pkt.header.ack
                );
                continue;
            }
            return Ok((pkt, from));
        }
    }

    /// Apply an inbound frame to the store and the receiver.
    async fn dispatch(&mut self, pkt: Packet) -> Result<Inbound, ConnError> {
        let seq = pkt.header.seq;

        if pkt.has(flags::SYN) {
            // Our final handshake ACK was lost.
            if pkt.has(flags::ACK) {
                if let Some(ack) = self.handshake_ack.clone() {
                    log::debug!("[conn] ← duplicate SYN+ACK; → ACK again");
                    self.send_untracked(&ack).await?;
                }
            }
            return Ok(Inbound::Control);
        }

        if pkt.has(flags::ACK) {
            let ack = pkt.header.ack;
            let cleared = self.store.lock().await.acknowledge(ack);
            if cleared == 0 {
                log::trace!("[conn] ← ACK ack={ack} matches nothing outstanding");
            } else {
                log::debug!("[conn] ← ACK ack={ack} (cleared {cleared})");
            }
        }

        if pkt.has(flags::DATA) {
            match self.receiver.on_segment(seq) {
                Arrival::Accepted => {
                    log::debug!("[conn] ← DATA seq={seq} len={}", pkt.payload.len());
                    return Ok(Inbound::Data(pkt.payload));
                }
                Arrival::Duplicate => {
                    log::debug!("[conn] ← duplicate DATA seq={seq}; re-ACK");
                    self.receiver.queue_ack(seq);
                    self.flush_acks().await?;
                }
                Arrival::OutOfOrder => log::debug!(
                    "[conn] ← DATA seq={seq} out of order (expected {}); discarded",
                    self.receiver.rcv_nxt()
                ),
            }
            return Ok(Inbound::Control);
        }

        if pkt.has(flags::FIN) {
            match self.receiver.on_segment(seq) {
                Arrival::Accepted => {
                    self.flush_acks().await?;
                    if self.state == ConnectionState::Established {
                        self.state = ConnectionState::RemoteClosed;
                    }
                    log::info!("[conn] ← FIN seq={seq}; peer finished sending");
                    return Ok(Inbound::Fin);
                }
                Arrival::Duplicate => {
                    self.receiver.queue_ack(seq);
                    self.flush_acks().await?;
                }
                Arrival::OutOfOrder => {
                    log::debug!("[conn] ← FIN seq={seq} out of order; discarded");
                }
            }
        }
        Ok(Inbound::Control)
    }

    // -----------------------------------------------------------------------
    // Outbound helpers
    // -----------------------------------------------------------------------

    /// Transmit `packet` and record it in the store, under the store lock.
    async fn send_tracked(&self, packet: Packet) -> Result<(), ConnError> {
        let peer = self.remote()?;
        let mut store = self.store.lock().await;
        self.socket.send_to(&packet, peer).await?;
        store.insert(packet, Instant::now());
        Ok(())
    }

    /// Transmit a frame that is never retransmitted (ACKs, handshake
    /// repeats).
    async fn send_untracked(&self, packet: &Packet) -> Result<(), ConnError> {
        let peer = self.remote()?;
        let _store = self.store.lock().await;
        self.socket.send_to(packet, peer).await?;
        Ok(())
    }

    /// Put every pending acknowledgement on the wire, oldest first.
    async fn flush_acks(&mut self) -> Result<(), ConnError> {
        if !self.receiver.has_pending_acks() {
            return Ok(());
        }
        let peer = self.remote()?;
        let acks = self.receiver.take_acks();
        let _store = self.store.lock().await;
        for ack in acks {
            self.socket
                .send_to(&Packet::ack(self.next_seq, ack), peer)
                .await?;
            log::debug!("[conn] → ACK ack={ack}");
        }
        Ok(())
    }

    fn remote(&self) -> Result<SocketAddr, ConnError> {
        self.peer.ok_or(ConnError::BadState(self.state))
    }

    fn expect_state(&self, allowed: &[ConnectionState]) -> Result<(), ConnError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(ConnError::BadState(self.state))
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state)
            .field("local", &self.socket.local_addr)
            .field("peer", &self.peer)
            .field("next_seq", &self.next_seq)
            .field("rcv_nxt", &self.receiver.rcv_nxt())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let cfg = Config {
            drop_probability: 2.0,
            ..Config::default()
        };
        let err = Connection::bind_with_config(loopback(), cfg).await.unwrap_err();
        assert!(matches!(err, ConnError::InvalidConfig(_)));
        assert!(err.is_recoverable());
    }

    #[tokio::test]
    async fn fresh_connection_starts_in_init() {
        let conn = Connection::bind(loopback()).await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Init);
        assert_eq!(conn.peer_addr(), None);
        assert_eq!(conn.outstanding().await, 0);
        assert_ne!(conn.local_addr().port(), 0);
    }

    #[tokio::test]
    async fn data_calls_require_established() {
        let mut conn = Connection::bind(loopback()).await.unwrap();
        assert!(matches!(
            conn.send(b"early").await,
            Err(ConnError::BadState(ConnectionState::Init))
        ));
        assert!(matches!(
            conn.receive(16).await,
            Err(ConnError::BadState(ConnectionState::Init))
        ));
    }

    #[tokio::test]
    async fn close_before_open_is_immediate() {
        let mut conn = Connection::bind(loopback()).await.unwrap();
        conn.close().await.unwrap();
        assert_eq!(conn.state(), ConnectionState::Closed);
        // Idempotent.
        conn.close().await.unwrap();
        assert!(matches!(
            conn.connect(loopback()).await,
            Err(ConnError::BadState(ConnectionState::Closed))
        ));
    }

    #[tokio::test]
    async fn drop_probability_setter_validates() {
        let mut conn = Connection::bind(loopback()).await.unwrap();
        assert!(conn.set_drop_probability(-0.5).is_err());
        conn.set_drop_probability(0.25).unwrap();
        assert_eq!(conn.config().drop_probability, 0.25);
    }

    #[tokio::test]
    async fn same_seed_gives_same_isn() {
        let mut a = Connection::bind(loopback()).await.unwrap();
        let mut b = Connection::bind(loopback()).await.unwrap();
        a.set_random_seed(352);
        b.set_random_seed(352);
        let x: u32 = a.isn_rng.random();
        let y: u32 = b.isn_rng.random();
        assert_eq!(x, y);
    }

    #[test]
    fn fatal_errors_are_not_recoverable() {
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        assert!(!ConnError::HandshakeFailed { peer }.is_recoverable());
        assert!(!ConnError::RetriesExhausted { seq: 1 }.is_recoverable());
        assert!(ConnError::PayloadTooLarge { len: 70_000 }.is_recoverable());
        assert!(ConnError::HandshakeMismatch("x".into()).is_recoverable());
    }
}
