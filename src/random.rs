//! Seeding for the ensemble.
//!
//! Every replicate draws from its own `StdRng`, seeded from the master seed plus a hash of the
//! replicate's label, the same way an ixa `RngId` stream is seeded from the base seed plus a
//! hash of its name. Replicate `i` therefore sees the same stream whatever order replicates are
//! scheduled in, and whatever `nReps` is.

use log::trace;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::EpiError;

/// A convenience method to compute the hash of a `&str`.
#[must_use]
pub fn hash_str(data: &str) -> u64 {
    xxh3_64(data.as_bytes())
}

/// The seed of the named stream derived from `base_seed`.
#[must_use]
pub fn derive_seed(base_seed: u64, label: &str) -> u64 {
    base_seed.wrapping_add(hash_str(label))
}

/// The seed for replicate `index` of an ensemble run with master seed `base_seed`.
#[must_use]
pub fn replicate_seed(base_seed: u64, index: usize) -> u64 {
    derive_seed(base_seed, &format!("replicate:{index}"))
}

/// A generator for the named stream derived from `base_seed`.
#[must_use]
pub fn derived_rng(base_seed: u64, label: &str) -> StdRng {
    let seed = derive_seed(base_seed, label);
    trace!("creating new RNG (seed={seed}) for stream {label}");
    StdRng::seed_from_u64(seed)
}

/// A generator for replicate `index`.
#[must_use]
pub fn replicate_rng(base_seed: u64, index: usize) -> StdRng {
    StdRng::seed_from_u64(replicate_seed(base_seed, index))
}

/// Samples a basic reproduction number from `Normal(mean, sd)`. With `sd == 0` this returns
/// `mean` exactly.
///
/// # Errors
///
/// Returns `EpiError::InvalidParameter` if `sd` is negative or not finite.
pub fn sample_r0(rng: &mut StdRng, mean: f64, sd: f64) -> Result<f64, EpiError> {
    // `Normal::new` accepts a negative deviation and mirrors the draws.
    if !(sd >= 0.0 && sd.is_finite()) {
        return Err(EpiError::invalid(format!(
            "R0 sample sd must be finite and >= 0, got {sd}"
        )));
    }
    let normal = Normal::new(mean, sd).map_err(|e| {
        EpiError::invalid(format!("cannot sample R0 from Normal({mean}, {sd}): {e}"))
    })?;
    Ok(normal.sample(rng))
}
