//! Wire-format definitions for protocol frames.
//!
//! Every datagram exchanged between peers is a [`Packet`].  This module is
//! responsible for:
//! - Defining the on-wire binary layout (header fields, flags, payload).
//! - Serialising a [`Packet`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Packet`], rejecting input
//!   too short to hold a header.
//!
//! No I/O happens here; this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Kind (0x44)  |     Flags     |  Sequence Number (bytes 0-1)  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Sequence Number (bytes 2-3)  |   Ack Number (bytes 0-1)      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |   Ack Number (bytes 2-3)      |        Payload Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Payload ...                            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Total header size: [`HEADER_LEN`] = 12 bytes.
//! kind(1) + flags(1) + seq(4) + ack(4) + payload_len(2)

use thiserror::Error;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake).
    pub const SYN: u8 = 0x01;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0x02;
    /// Payload carries application data.
    pub const DATA: u8 = 0x04;
    /// Sender called close.
    pub const FIN: u8 = 0x08;
}

/// Marker carried in the first byte of every frame.
pub const MESSAGE_TYPE: u8 = 0x44;

/// Byte length of the fixed-size header on the wire.
pub const HEADER_LEN: usize = 12;

/// Largest payload a single frame may carry (63 KiB).
pub const MAX_PAYLOAD: usize = 63 * 1024;

/// Largest datagram this protocol ever produces.
pub const MAX_PACKET: usize = HEADER_LEN + MAX_PAYLOAD;

// Byte offsets of each field within the serialised header.
const OFF_KIND: usize = 0;
const OFF_FLAGS: usize = 1;
const OFF_SEQ: usize = 2;
const OFF_ACK: usize = 6;
const OFF_PAYLOAD_LEN: usize = 10;

/// Fixed-size protocol header.
///
/// Fields are in host byte order; [`Packet::encode`] converts to big-endian
/// on the wire and [`Packet::decode`] converts back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// Protocol marker, always [`MESSAGE_TYPE`] for frames built here.
    pub kind: u8,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Sender-assigned sequence number.
    pub seq: u32,
    /// Sequence number being acknowledged (valid iff [`flags::ACK`] is set).
    pub ack: u32,
    /// Declared payload length.
    ///
    /// Advisory on decode: the payload is whatever follows the header.
    pub payload_len: u16,
}

/// A complete protocol datagram: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A payload-free frame (SYN, SYN+ACK, FIN, pure ACK).
    pub fn control(flags: u8, seq: u32, ack: u32) -> Self {
        Packet {
            header: Header {
                kind: MESSAGE_TYPE,
                flags,
                seq,
                ack,
                payload_len: 0,
            },
            payload: Vec::new(),
        }
    }

    /// A zero-payload acknowledgement of `ack`.
    pub fn ack(seq: u32, ack: u32) -> Self {
        Self::control(flags::ACK, seq, ack)
    }

    /// A DATA frame carrying `payload`.
    ///
    /// The caller guarantees `payload.len() <= MAX_PAYLOAD`.
    pub fn data(seq: u32, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Packet {
            header: Header {
                kind: MESSAGE_TYPE,
                flags: flags::DATA,
                seq,
                ack: 0,
                payload_len: payload.len() as u16,
            },
            payload,
        }
    }

    /// `true` when every bit of `mask` is set in the flags field.
    pub fn has(&self, mask: u8) -> bool {
        self.header.flags & mask == mask
    }

    /// Serialise this packet into a newly allocated byte vector.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];

        buf[OFF_KIND] = self.header.kind;
        buf[OFF_FLAGS] = self.header.flags;
        buf[OFF_SEQ..OFF_SEQ + 4].copy_from_slice(&self.header.seq.to_be_bytes());
        buf[OFF_ACK..OFF_ACK + 4].copy_from_slice(&self.header.ack.to_be_bytes());
        buf[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
            .copy_from_slice(&self.header.payload_len.to_be_bytes());
        buf[HEADER_LEN..].copy_from_slice(&self.payload);

        buf
    }

    /// Parse a [`Packet`] from a raw byte slice.
    ///
    /// Returns [`PacketError::Truncated`] if `buf` is shorter than
    /// [`HEADER_LEN`].  Everything after the header becomes the payload,
    /// whatever `payload_len` claims.
    pub fn decode(buf: &[u8]) -> Result<Self, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::Truncated { len: buf.len() });
        }

        let seq = u32::from_be_bytes([
            buf[OFF_SEQ],
            buf[OFF_SEQ + 1],
            buf[OFF_SEQ + 2],
            buf[OFF_SEQ + 3],
        ]);
        let ack = u32::from_be_bytes([
            buf[OFF_ACK],
            buf[OFF_ACK + 1],
            buf[OFF_ACK + 2],
            buf[OFF_ACK + 3],
        ]);
        let payload_len = u16::from_be_bytes([buf[OFF_PAYLOAD_LEN], buf[OFF_PAYLOAD_LEN + 1]]);

        Ok(Packet {
            header: Header {
                kind: buf[OFF_KIND],
                flags: buf[OFF_FLAGS],
                seq,
                ack,
                payload_len,
            },
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }
}

/// Errors that can arise when parsing a raw datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Buffer shorter than the fixed header size.
    #[error("datagram of {len} bytes is shorter than the {HEADER_LEN}-byte header")]
    Truncated { len: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let pkt = Packet::data(42, b"hello".to_vec());
        let decoded = Packet::decode(&pkt.encode()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn control_roundtrip_keeps_ack() {
        let pkt = Packet::control(flags::SYN | flags::ACK, 0x2be6, 0x8ecb);
        assert_eq!(Packet::decode(&pkt.encode()).unwrap(), pkt);
    }

    #[test]
    fn decode_syn_from_wire() {
        let wire = [0x44, 0x01, 0x00, 0x00, 0x8e, 0xcb, 0, 0, 0, 0, 0, 0];
        let pkt = Packet::decode(&wire).unwrap();
        assert_eq!(pkt.header.kind, MESSAGE_TYPE);
        assert_eq!(pkt.header.flags, 1);
        assert_eq!(pkt.header.seq, 36555);
        assert_eq!(pkt.header.ack, 0);
        assert_eq!(pkt.header.payload_len, 0);
        assert!(pkt.payload.is_empty());
        assert_eq!(pkt, Packet::control(flags::SYN, 0x8ecb, 0));
    }

    #[test]
    fn decode_empty_buffer_returns_error() {
        assert_eq!(
            Packet::decode(&[]),
            Err(PacketError::Truncated { len: 0 })
        );
    }

    #[test]
    fn decode_short_header_returns_error() {
        for len in 0..HEADER_LEN {
            assert_eq!(
                Packet::decode(&vec![0u8; len]),
                Err(PacketError::Truncated { len })
            );
        }
    }

    #[test]
    fn declared_length_is_advisory() {
        let mut bytes = Packet::data(7, b"data".to_vec()).encode();
        bytes.pop();
        let pkt = Packet::decode(&bytes).unwrap();
        assert_eq!(pkt.header.payload_len, 4);
        assert_eq!(pkt.payload, b"dat");
    }

    #[test]
    fn header_only_form_for_empty_payload() {
        let bytes = Packet::ack(0, 99).encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes[OFF_FLAGS], flags::ACK);
    }

    #[test]
    fn seq_ack_big_endian_on_wire() {
        let bytes = Packet::control(flags::ACK, 0x0102_0304, 0x0506_0708).encode();
        assert_eq!(&bytes[OFF_SEQ..OFF_SEQ + 4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[OFF_ACK..OFF_ACK + 4], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn encoded_length_equals_header_plus_payload() {
        let payload = b"exactly twelve!";
        let bytes = Packet::data(0, payload.to_vec()).encode();
        assert_eq!(bytes.len(), HEADER_LEN + payload.len());
        assert_eq!(
            u16::from_be_bytes([bytes[OFF_PAYLOAD_LEN], bytes[OFF_PAYLOAD_LEN + 1]]),
            payload.len() as u16
        );
    }

    #[test]
    fn multiple_flag_bits() {
        let pkt = Packet::control(flags::SYN | flags::ACK, 1, 2);
        assert!(pkt.has(flags::SYN));
        assert!(pkt.has(flags::SYN | flags::ACK));
        assert!(!pkt.has(flags::FIN));
        assert_eq!(pkt.encode()[OFF_FLAGS], 0x03);
    }

    #[test]
    fn max_payload_fits_length_field() {
        assert!(MAX_PAYLOAD <= u16::MAX as usize);
        assert_eq!(MAX_PACKET, 12 + 64_512);
    }
}
