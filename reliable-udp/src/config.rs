//! Tunable parameters for a [`crate::connection::Connection`].
//!
//! Every knob has a named default constant; [`Config::default`] assembles
//! them.  Configure before the handshake: values are read when the connection
//! opens.

use std::time::Duration;

use log::LevelFilter;

/// Segments allowed in flight before `send` waits for acknowledgements.
/// One reproduces stop-and-wait.
pub const DEFAULT_WINDOW: usize = 1;

/// Lower bound on the retransmission timeout.
pub const DEFAULT_MIN_RTO: Duration = Duration::from_millis(200);

/// Upper bound on the retransmission timeout.
pub const DEFAULT_MAX_RTO: Duration = Duration::from_secs(60);

/// Wait before re-sending an unanswered SYN or SYN+ACK.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Retransmissions of a single segment before the connection gives up.
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// RTOs `close` waits for the second half of the teardown once the first
/// (peer FIN seen, or our FIN acknowledged) has happened.
pub const DEFAULT_CLOSE_LINGER_RTOS: u32 = 10;

/// Connection parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// In-flight segment limit (W ≥ 1).
    pub window: usize,
    /// Floor for the RTO derived from the handshake round trip.
    pub min_rto: Duration,
    /// Ceiling for the RTO.
    pub max_rto: Duration,
    /// Retransmission interval for handshake frames, before any RTT sample.
    pub handshake_timeout: Duration,
    /// Retransmissions per segment before failing; `None` retries forever.
    pub max_retries: Option<u32>,
    /// How long (in RTOs) `close` waits for the peer's FIN after ours was
    /// acknowledged, or for our FIN's acknowledgement after the peer's FIN.
    pub close_linger_rtos: u32,
    /// Probability in `[0, 1]` that an inbound frame is discarded.
    pub drop_probability: f64,
    /// Seed for initial sequence numbers and drop decisions; `None` picks one
    /// at random.
    pub seed: Option<u64>,
    /// Verbosity, 0 (quiet) to 5 (every frame).
    pub debug_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            min_rto: DEFAULT_MIN_RTO,
            max_rto: DEFAULT_MAX_RTO,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_retries: Some(DEFAULT_MAX_RETRIES),
            close_linger_rtos: DEFAULT_CLOSE_LINGER_RTOS,
            drop_probability: 0.0,
            seed: None,
            debug_level: 0,
        }
    }
}

impl Config {
    /// Check invariants the protocol relies on.
    ///
    /// Returns a description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.window == 0 {
            return Err("window must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.drop_probability) {
            return Err(format!(
                "drop probability {} is outside [0, 1]",
                self.drop_probability
            ));
        }
        if self.min_rto.is_zero() || self.min_rto > self.max_rto {
            return Err(format!(
                "min_rto {:?} must be non-zero and not exceed max_rto {:?}",
                self.min_rto, self.max_rto
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err("handshake timeout must be non-zero".into());
        }
        Ok(())
    }
}

/// Map an integer verbosity onto a `log` filter.
///
/// 0 keeps warnings only, 1 adds connection lifecycle, 2–3 frame-level
/// events, 4 and above everything.
pub fn debug_level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 | 3 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}
