//! Optional frame-loss simulator for deterministic testing.
//!
//! Real networks drop packets.  To exercise the retransmission path without
//! depending on actual network conditions, a connection routes every inbound
//! frame through a [`Simulator`] which discards it with probability
//! `drop_probability`.
//!
//! Decisions come from a seeded [`StdRng`], so a fixed seed and a fixed
//! sequence of calls always produce the same drops.  Only the foreground
//! receive path consults the simulator; the retransmission task never does,
//! which keeps the call sequence independent of task scheduling.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A seeded coin that decides whether the next inbound frame is lost.
#[derive(Debug, Clone)]
pub struct Simulator {
    drop_probability: f64,
    rng: StdRng,
    dropped: u64,
}

impl Simulator {
    /// Create a simulator.  `drop_probability` must lie in `[0.0, 1.0]`;
    /// [`crate::config::Config::validate`] enforces this before we get here.
    pub fn new(drop_probability: f64, seed: u64) -> Self {
        Self {
            drop_probability,
            rng: StdRng::seed_from_u64(seed),
            dropped: 0,
        }
    }

    pub fn drop_probability(&self) -> f64 {
        self.drop_probability
    }

    pub fn set_drop_probability(&mut self, drop_probability: f64) {
        self.drop_probability = drop_probability;
    }

    /// Restart the decision sequence from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    /// Number of frames discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Decide the fate of one frame.  Returns `true` if it should be dropped.
    ///
    /// With probability 0 the RNG is not consulted at all.
    pub fn should_drop(&mut self) -> bool {
        if self.drop_probability <= 0.0 {
            return false;
        }
        let drop = self.rng.random_bool(self.drop_probability);
        if drop {
            self.dropped += 1;
        }
        drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decisions(sim: &mut Simulator, n: usize) -> Vec<bool> {
        (0..n).map(|_| sim.should_drop()).collect()
    }

    #[test]
    fn zero_probability_never_drops() {
        let mut sim = Simulator::new(0.0, 0);
        assert!(decisions(&mut sim, 1000).iter().all(|d| !d));
        assert_eq!(sim.dropped(), 0);
    }

    #[test]
    fn certain_loss_drops_everything() {
        let mut sim = Simulator::new(1.0, 7);
        assert!(decisions(&mut sim, 100).iter().all(|d| *d));
        assert_eq!(sim.dropped(), 100);
    }

    #[test]
    fn same_seed_same_decisions() {
        let mut a = Simulator::new(0.3, 352);
        let mut b = Simulator::new(0.3, 352);
        assert_eq!(decisions(&mut a, 500), decisions(&mut b, 500));
    }

    #[test]
    fn reseed_restarts_sequence() {
        let mut sim = Simulator::new(0.5, 11);
        let first = decisions(&mut sim, 64);
        sim.reseed(11);
        assert_eq!(decisions(&mut sim, 64), first);
    }

    #[test]
    fn drop_rate_is_roughly_the_probability() {
        let mut sim = Simulator::new(0.2, 1);
        let n = 10_000;
        let dropped = decisions(&mut sim, n).iter().filter(|d| **d).count();
        let rate = dropped as f64 / n as f64;
        assert!((0.17..0.23).contains(&rate), "rate {rate}");
    }
}
