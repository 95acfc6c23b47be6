//! Resampled importance sampling: weighted reservoirs for ReSTIR-style reuse.
//!
//! # Invariants
//! - After updates with weights `w_1..w_n` each candidate is held with
//!   probability `w_i / sum(w)`.
//! - `m` counts every sample folded in, directly or through a merge.
//! - Randomness comes only from the reservoir's own [`UniformSource`].

mod reservoir;
mod rng;

pub use reservoir::{Reservoir, ReservoirError};
pub use rng::{SplitMix64, UniformSource};

pub fn crate_info() -> &'static str {
    "latinium-restir v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("restir"));
    }
}
