//! Per-request random number generators for Thompson draws.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Hands out one seed per request, so concurrent requests never contend on
/// shared RNG state.
///
/// With a fixed seed, the n-th request of a process always receives the same
/// seed. Which request is the n-th is decided by arrival order, so callers
/// that need to replay a decision keep the seed it was served with.
#[derive(Debug, Default)]
pub enum EntropySource {
    #[default]
    Os,
    Seeded { seed: u64, sequence: AtomicU64 },
}

impl EntropySource {
    pub fn seeded(seed: u64) -> Self {
        EntropySource::Seeded {
            seed,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn from_seed(seed: Option<u64>) -> Self {
        seed.map(Self::seeded).unwrap_or(EntropySource::Os)
    }

    /// Seed for the next request's generator.
    pub fn next_seed(&self) -> u64 {
        match self {
            EntropySource::Os => rand::thread_rng().gen(),
            EntropySource::Seeded { seed, sequence } => {
                let n = sequence.fetch_add(1, Ordering::Relaxed);
                seed ^ n.wrapping_add(1).wrapping_mul(GOLDEN_GAMMA)
            }
        }
    }

    /// Generator for an explicit seed, for replaying a single decision.
    pub fn rng_for(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    pub fn is_seeded(&self) -> bool {
        matches!(self, EntropySource::Seeded { .. })
    }
}
