//! `reliable-udp`: a TCP-like reliable, ordered byte stream implemented over UDP.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────────────────────────────────┐
//!  │             Connection               │  connect / accept / send /
//!  │  (state machine, dispatch, receiver) │  receive / close
//!  └────┬───────────────┬─────────────────┘
//!       │ insert / ack  │ inbound frames
//!  ┌────▼─────────┐     │ (via Simulator)       ┌────────────────┐
//!  │ SegmentStore │◀────┼───────────────────────│ RetransmitTask │
//!  └──────────────┘     │     scan + re-send     └───────┬────────┘
//!                  ┌────▼──────┐                         │
//!                  │  Socket   │◀────────────────────────┘
//!                  └───────────┘  (thin async wrapper around tokio UdpSocket)
//! ```
//!
//! Each module has a single responsibility:
//! - [`packet`]: wire format (serialise / deserialise)
//! - [`socket`]: async UDP socket abstraction
//! - [`connection`]: per-connection lifecycle and the public API
//! - [`state`]: finite-state-machine types
//! - [`store`]: sent-but-unacknowledged segments
//! - [`receiver`]: Go-Back-N inbound state and application inbox
//! - [`timer`]: RTO estimation and the retransmission task
//! - [`simulator`]: seeded inbound frame loss for testing
//! - [`config`]: tunable parameters and their defaults

pub mod config;
pub mod connection;
pub mod packet;
pub mod receiver;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod store;
pub mod timer;

pub use config::Config;
pub use connection::{ConnError, Connection};
