//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O and the boundary filter that
//! keeps malformed datagrams away from the engine.

use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::packet::{Packet, MAX_PACKET, MESSAGE_TYPE};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can arise from socket operations.
#[derive(Debug, Error)]
pub enum SocketError {
    /// The local address could not be bound.
    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// Underlying I/O error from the OS while sending or receiving.
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared between a connection
/// and its retransmission task.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing port 0 lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, SocketError> {
        let inner = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| SocketError::Bind {
                addr: local_addr,
                source,
            })?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<(), SocketError> {
        self.inner.send_to(&packet.encode(), dest).await?;
        Ok(())
    }

    /// Receive the next well-formed datagram and decode it into a [`Packet`].
    ///
    /// Returns `(packet, sender_address)`.  Datagrams shorter than a header or
    /// carrying a foreign marker byte are dropped here and never surface.
    /// Cancel-safe: nothing is consumed until a datagram has been read.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr), SocketError> {
        let mut buf = vec![0u8; MAX_PACKET];
        loop {
            let (n, addr) = self.inner.recv_from(&mut buf).await?;
            match Packet::decode(&buf[..n]) {
                Ok(packet) if packet.header.kind == MESSAGE_TYPE => return Ok((packet, addr)),
                Ok(packet) => {
                    log::trace!(
                        "[socket] dropping frame from {addr} with marker {:#04x}",
                        packet.header.kind
                    );
                }
                Err(e) => log::trace!("[socket] dropping datagram from {addr}: {e}"),
            }
        }
    }
}
