//! Deterministic random number generation.
//!
//! RULE: nothing in the simulator may call any platform RNG. All randomness
//! flows through StreamRng instances derived from the single master seed
//! stored on the run. Each concern gets its own stream, and each sample path
//! gets its own sub-derivation, so:
//!   - adding a new stream never perturbs existing streams;
//!   - any single path is fully reproducible in isolation;
//!   - all replications of one path share one transition stream, which is
//!     what makes split branches comparable (common random numbers).

use rand::SeedableRng;
use rand_distr::{Distribution, Poisson};
use rand_pcg::Pcg64Mcg;

/// A named, deterministic RNG for one stream of one sample path.
pub struct StreamRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StreamRng {
    /// Create a stream RNG from the master seed, a stable stream index and
    /// the sample-path index. Stream indices must never change once assigned.
    pub fn new(master_seed: u64, stream_index: u64, path_index: u64) -> Self {
        let derived = master_seed
            ^ stream_index.wrapping_mul(0x9e37_79b9_7f4a_7c15)
            ^ path_index.wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Draw a raw u64 (full range). One block of random bits drives one
    /// CTMC transition.
    pub fn next_u64(&mut self) -> u64 {
        use rand::RngCore;
        self.inner.next_u64()
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Draw from a Poisson distribution with the given mean.
    pub fn poisson(&mut self, mean: f64) -> u64 {
        assert!(
            mean.is_finite() && mean > 0.0,
            "poisson mean must be positive, got {mean}"
        );
        let dist = Poisson::new(mean).expect("positive finite mean");
        dist.sample(&mut self.inner) as u64
    }
}

/// All RNG streams for one run, derived from the master seed.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn for_stream(&self, slot: StreamSlot, path_index: u64) -> StreamRng {
        StreamRng::new(self.master_seed, slot as u64, path_index).with_name(slot.name())
    }
}

/// Stable stream slot assignments.
/// NEVER reorder or remove entries — only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StreamSlot {
    /// Per-path transition budget draw.
    Budget = 0,
    /// Shared transition bits for every replication of a path.
    Transitions = 1,
}

impl StreamSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Transitions => "transitions",
        }
    }
}
