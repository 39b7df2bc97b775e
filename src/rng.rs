//! Deterministic random streams
//!
//! Seeds derive from (master seed, stream label, step), so a stream asked for
//! by the same label on the same step always replays the same sequence, no
//! matter how many other streams were drawn first.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &byte in bytes {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Factory for labelled, step-scoped RNGs sharing one master seed.
#[derive(Debug, Clone)]
pub struct RngStreams {
    seed: u64,
}

impl RngStreams {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn stream(&self, label: &str, step: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.derive(label, step))
    }

    fn derive(&self, label: &str, step: u64) -> u64 {
        let mut seed = self.seed;
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seed ^= fnv1a(label.as_bytes());
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seed ^= step.wrapping_mul(69069);
        seed
    }
}
