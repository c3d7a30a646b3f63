//! Deterministic per-trial random number generators.
//!
//! Every bootstrap trial owns a generator derived from the run's base seed and the
//! trial index alone. The serial and parallel engines therefore draw identical
//! resamples for the same trial, whatever the worker count or scheduling order.

use rand::rngs::SmallRng;
use rand::SeedableRng;

const GOLDEN_GAMMA: u64 = 0x9E37_79B9_7F4A_7C15;

/// Mixes the base seed with a trial index (SplitMix64 finalizer).
pub fn trial_seed(base_seed: u64, trial: usize) -> u64 {
    let mut z = base_seed.wrapping_add((trial as u64).wrapping_add(1).wrapping_mul(GOLDEN_GAMMA));
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Generator for trial `trial` of a run seeded with `base_seed`.
pub fn trial_rng(base_seed: u64, trial: usize) -> SmallRng {
    SmallRng::seed_from_u64(trial_seed(base_seed, trial))
}
