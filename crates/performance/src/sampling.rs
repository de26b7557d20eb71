//! Probabilistic sampling decisions.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

use crate::lock;

/// Draws sampling decisions against a fixed rate.
#[derive(Debug)]
pub struct Sampler {
    rate: Option<f64>,
    rng: Mutex<StdRng>,
}

impl Sampler {
    /// Create a sampler seeded from the OS.
    pub fn new(rate: Option<f64>) -> Self {
        Self::with_rng(rate, StdRng::from_entropy())
    }

    /// Create a sampler with a deterministic seed.
    pub fn seeded(rate: Option<f64>, seed: u64) -> Self {
        Self::with_rng(rate, StdRng::seed_from_u64(seed))
    }

    fn with_rng(rate: Option<f64>, rng: StdRng) -> Self {
        let rate = rate.filter(|r| {
            let valid = r.is_finite() && (0.0..=1.0).contains(r);
            if !valid {
                tracing::warn!("Ignoring sample rate {} outside of [0, 1]", r);
            }
            valid
        });
        Self {
            rate,
            rng: Mutex::new(rng),
        }
    }

    /// Configured rate, `None` if sampling is disabled.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Draw a decision. An undefined rate never samples.
    pub fn sample(&self) -> bool {
        match self.rate {
            None => false,
            Some(rate) if rate <= 0.0 => false,
            Some(rate) if rate >= 1.0 => true,
            Some(rate) => lock(&self.rng).gen::<f64>() < rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_undefined_rate_never_samples() {
        let sampler = Sampler::seeded(None, 7);
        assert!((0..1_000).all(|_| !sampler.sample()));
    }

    #[test]
    fn test_bounds() {
        assert!(Sampler::seeded(Some(1.0), 1).sample());
        assert!(!Sampler::seeded(Some(0.0), 1).sample());
    }

    #[test]
    fn test_invalid_rate_disables_sampling() {
        let sampler = Sampler::seeded(Some(1.5), 1);
        assert!(sampler.rate().is_none());
        assert!(!sampler.sample());

        let sampler = Sampler::seeded(Some(f64::NAN), 1);
        assert!(sampler.rate().is_none());
    }

    proptest! {
        #[test]
        fn prop_sample_rate_is_respected(rate in 0.0f64..=1.0, seed in any::<u64>()) {
            let sampler = Sampler::seeded(Some(rate), seed);
            let attempts = 4_000;
            let hits = (0..attempts).filter(|_| sampler.sample()).count();
            let observed = hits as f64 / attempts as f64;

            // Six standard deviations of a binomial proportion, plus slack for tiny rates.
            let tolerance = 6.0 * (rate * (1.0 - rate) / attempts as f64).sqrt() + 0.01;
            prop_assert!((observed - rate).abs() <= tolerance, "rate {} observed {}", rate, observed);
        }
    }
}
