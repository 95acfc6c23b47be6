use crate::rng::{SplitMix64, UniformSource};

/// Errors from reservoir operations. State is never modified on error.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum ReservoirError {
    #[error("sample weight must be finite and non-negative, got {0}")]
    InvalidWeight(f32),
    #[error("reservoir weight sum must be finite and non-negative, got {0}")]
    InvalidWeightSum(f32),
    #[error("inconsistent reservoir state: {0}")]
    InconsistentState(&'static str),
}

/// Weighted reservoir for resampled importance sampling.
///
/// Streams candidates through [`update`](Self::update) keeping one of them,
/// each with probability proportional to its weight, in O(1) memory.
/// Reservoirs can be combined with [`merge`](Self::merge) without revisiting
/// the samples they have seen.
#[derive(Debug, Clone)]
pub struct Reservoir<S, R = SplitMix64> {
    sample: Option<S>,
    /// Sum of all weights offered so far.
    wsum: f32,
    /// Number of samples folded in so far.
    m: u32,
    rng: R,
}

impl<S, R: UniformSource> Reservoir<S, R> {
    /// Create an empty reservoir drawing acceptance decisions from `rng`.
    pub fn new(rng: R) -> Self {
        Self {
            sample: None,
            wsum: 0.0,
            m: 0,
            rng,
        }
    }

    /// Rebuild a reservoir from stored state, e.g. last frame's history.
    ///
    /// An empty reservoir must have no weight and no count; a held sample
    /// must have been counted at least once.
    pub fn from_parts(rng: R, sample: Option<S>, wsum: f32, m: u32) -> Result<Self, ReservoirError> {
        if !wsum.is_finite() || wsum < 0.0 {
            return Err(ReservoirError::InvalidWeightSum(wsum));
        }
        match (&sample, m) {
            (None, m) if m > 0 || wsum > 0.0 => {
                return Err(ReservoirError::InconsistentState(
                    "empty reservoir with a non-zero count or weight sum",
                ));
            }
            (Some(_), 0) => {
                return Err(ReservoirError::InconsistentState(
                    "held sample with a zero count",
                ));
            }
            _ => {}
        }
        Ok(Self {
            sample,
            wsum,
            m,
            rng,
        })
    }

    /// Offer `candidate` with the given `weight`.
    ///
    /// Returns whether the candidate replaced the held sample.
    pub fn update(&mut self, candidate: S, weight: f32) -> Result<bool, ReservoirError> {
        if !weight.is_finite() || weight < 0.0 {
            return Err(ReservoirError::InvalidWeight(weight));
        }
        let wsum = self.wsum + weight;
        if !wsum.is_finite() {
            return Err(ReservoirError::InvalidWeightSum(wsum));
        }

        self.wsum = wsum;
        self.m = self.m.saturating_add(1);

        // With nothing offered but zero weights, the first candidate wins.
        let accept = if wsum > 0.0 {
            self.rng.next_f32() < weight / wsum
        } else {
            self.sample.is_none()
        };
        if accept {
            self.sample = Some(candidate);
        }
        Ok(accept)
    }

    /// Fold `other`'s retained sample into this reservoir as one candidate.
    ///
    /// The candidate is re-weighted by `weight_func` (this reservoir's target
    /// density) times `other`'s average weight. `m` grows by `other.m()`.
    pub fn merge<R2>(
        &mut self,
        other: &Reservoir<S, R2>,
        mut weight_func: impl FnMut(&S) -> f32,
    ) -> Result<bool, ReservoirError>
    where
        S: Clone,
    {
        let Some(sample) = other.sample.as_ref() else {
            return Ok(false);
        };
        let weight = weight_func(sample) * other.average_weight();
        let accepted = self.update(sample.clone(), weight)?;
        // update() already counted one sample.
        self.m = self.m.saturating_add(other.m.saturating_sub(1));
        Ok(accepted)
    }
}

impl<S, R> Reservoir<S, R> {
    /// Unbiased contribution weight of the held sample under `target_func`.
    ///
    /// `0` when empty, or when the target density of the sample is not a
    /// positive finite number.
    pub fn get_weight(&self, target_func: impl Fn(&S) -> f32) -> f32 {
        let Some(sample) = self.sample.as_ref() else {
            return 0.0;
        };
        let target = target_func(sample);
        if !target.is_finite() || target <= 0.0 {
            return 0.0;
        }
        self.average_weight() / target
    }

    /// `wsum / max(1, m)`.
    fn average_weight(&self) -> f32 {
        self.wsum / self.m.max(1) as f32
    }

    pub fn sample(&self) -> Option<&S> {
        self.sample.as_ref()
    }

    pub fn wsum(&self) -> f32 {
        self.wsum
    }

    pub fn m(&self) -> u32 {
        self.m
    }

    pub fn is_empty(&self) -> bool {
        self.sample.is_none()
    }

    /// Drop the held sample and counters, keeping the random source.
    pub fn reset(&mut self) {
        self.sample = None;
        self.wsum = 0.0;
        self.m = 0;
    }

    pub fn into_sample(self) -> Option<S> {
        self.sample
    }
}
