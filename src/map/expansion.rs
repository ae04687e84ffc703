//! Refinement predicate consumed by multi-resolution backends.
//!
//! A backend that subdivides cells decides per distribution whether it holds
//! enough data to be worth refining. The map only exposes the predicate; it
//! never subdivides on its own.

use crate::math::Distribution;

/// Default sample threshold for [`MinSampleCount`].
pub const DEFAULT_EXPANSION_SAMPLES: usize = 2;

/// Decides whether a distribution should be expanded to a finer resolution.
pub trait ExpansionPolicy<const D: usize> {
    fn should_expand(&self, distribution: &Distribution<D>) -> bool;
}

/// Expand once a distribution holds at least the given number of samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MinSampleCount(pub usize);

impl Default for MinSampleCount {
    fn default() -> Self {
        Self(DEFAULT_EXPANSION_SAMPLES)
    }
}

impl<const D: usize> ExpansionPolicy<D> for MinSampleCount {
    fn should_expand(&self, distribution: &Distribution<D>) -> bool {
        distribution.sample_count() >= self.0
    }
}

impl<const D: usize, F> ExpansionPolicy<D> for F
where
    F: Fn(&Distribution<D>) -> bool,
{
    fn should_expand(&self, distribution: &Distribution<D>) -> bool {
        self(distribution)
    }
}
