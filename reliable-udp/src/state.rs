//! Connection finite-state machine (FSM) types.
//!
//! This module defines every state a [`crate::connection::Connection`] can
//! occupy.  Transitions are driven by [`crate::connection`]; the helpers here
//! only answer questions about a state so the guard logic reads the same
//! everywhere.
//!
//! ```text
//!  INIT ──connect──▶ SYN_SENT ──SYN+ACK / ACK──────────────┐
//!    │                                                      ▼
//!    └──accept──▶ LISTEN ──SYN──▶ SYN_RECV ──ACK──▶ ESTABLISHED
//!                                                     │      │
//!                                        peer FIN     │      │ close
//!                                                     ▼      ▼
//!                                      REMOTE_CLOSED ─close─▶ CLOSING ──FIN/ACK──▶ CLOSED
//! ```
//!
//! Only simultaneous close is supported: both peers are expected to call
//! `close`, so `Closed` and `RemoteClosed` are treated alike as terminal.

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Socket bound, no handshake attempted yet.
    #[default]
    Init,
    /// SYN has been sent; waiting for SYN+ACK.
    SynSent,
    /// Passive open; waiting for a SYN.
    Listen,
    /// SYN received; SYN+ACK sent; waiting for the final ACK.
    SynReceived,
    /// Handshake complete; data transfer in progress.
    Established,
    /// Local FIN sent; waiting for the peer's FIN and for our FIN's ACK.
    Closing,
    /// Local close completed.
    Closed,
    /// Peer's FIN observed before the local side called close.
    RemoteClosed,
}

impl ConnectionState {
    /// `true` for the two terminal states.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::RemoteClosed)
    }

    /// `true` while a handshake is in progress.
    pub fn is_handshaking(self) -> bool {
        matches!(self, Self::SynSent | Self::Listen | Self::SynReceived)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Init => "INIT",
            Self::SynSent => "SYN_SENT",
            Self::Listen => "LISTEN",
            Self::SynReceived => "SYN_RECV",
            Self::Established => "ESTABLISHED",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
            Self::RemoteClosed => "REMOTE_CLOSED",
        };
        f.write_str(name)
    }
}
