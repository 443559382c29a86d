//! Random number source owned by a filter instance.
//!
//! A [Sampler] wraps a single seeded [StdRng]. It is created once alongside the filter and then
//! advanced monotonically through initialization, motion noise and resampling, so that a given
//! seed reproduces an entire run. Gaussian draws are taken by scaling a standard normal sample,
//! and weighted discrete draws use a cumulative distribution with a binary search.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use std::fmt::{self, Debug};

/// Seeded source of Gaussian and weighted discrete samples.
#[derive(Clone)]
pub struct Sampler {
    rng: StdRng,
    seed: u64,
}
impl Debug for Sampler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sampler").field("seed", &self.seed).finish()
    }
}
impl Sampler {
    /// Create a sampler with a specific seed. This is useful for reproducible runs and tests.
    pub fn from_seed(seed: u64) -> Self {
        Sampler {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }
    /// Create a sampler seeded from the thread-local entropy source.
    pub fn from_entropy() -> Self {
        Self::from_seed(rand::random())
    }
    /// Seed this sampler was created with
    pub fn seed(&self) -> u64 {
        self.seed
    }
    /// Draw from $\mathcal{N}(\mu, \sigma^2)$.
    ///
    /// A zero standard deviation returns the mean but still advances the stream, so the number of
    /// draws consumed per call does not depend on the noise configuration.
    pub fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + std_dev * z
    }
    /// Draw from the uniform distribution on `[0, 1)`.
    pub fn uniform(&mut self) -> f64 {
        self.rng.random::<f64>()
    }
    /// Draw a single index from a cumulative weight table.
    pub fn discrete(&mut self, table: &CumulativeWeights) -> usize {
        table.index_at(self.uniform() * table.total())
    }
}

/// Cumulative distribution over indices `[0, n)` built from non-negative weights.
///
/// Negative and non-finite weights are treated as zero. If nothing positive remains, the table
/// falls back to the uniform distribution so that sampling stays well defined.
#[derive(Clone, Debug)]
pub struct CumulativeWeights {
    cumulative: Vec<f64>,
}
impl CumulativeWeights {
    pub fn new(weights: &[f64]) -> Self {
        let mut running = 0.0;
        let mut cumulative: Vec<f64> = weights
            .iter()
            .map(|&w| {
                if w.is_finite() && w > 0.0 {
                    running += w;
                }
                running
            })
            .collect();
        if !(running > 0.0 && running.is_finite()) {
            cumulative = (1..=weights.len()).map(|i| i as f64).collect();
        }
        CumulativeWeights { cumulative }
    }
    pub fn len(&self) -> usize {
        self.cumulative.len()
    }
    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }
    /// Sum of all (sanitized) weights
    pub fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }
    /// Probability mass assigned to `index`
    pub fn probability(&self, index: usize) -> f64 {
        let upper = self.cumulative[index];
        let lower = if index == 0 { 0.0 } else { self.cumulative[index - 1] };
        (upper - lower) / self.total()
    }
    /// Index whose cumulative interval `[lower, upper)` contains `u`.
    fn index_at(&self, u: f64) -> usize {
        let idx = self.cumulative.partition_point(|&c| c <= u);
        idx.min(self.cumulative.len().saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = Sampler::from_seed(42);
        let mut b = Sampler::from_seed(42);
        for _ in 0..10 {
            assert_eq!(a.gaussian(0.0, 1.0), b.gaussian(0.0, 1.0));
        }
        assert_eq!(a.seed(), 42);
    }
    #[test]
    fn test_stream_advances_between_calls() {
        let mut sampler = Sampler::from_seed(7);
        let first = sampler.gaussian(0.0, 1.0);
        let second = sampler.gaussian(0.0, 1.0);
        assert_ne!(first, second);
    }
    #[test]
    fn test_gaussian_moments() {
        let mut sampler = Sampler::from_seed(3);
        let n = 20_000;
        let draws: Vec<f64> = (0..n).map(|_| sampler.gaussian(5.0, 2.0)).collect();
        let mean = draws.iter().sum::<f64>() / n as f64;
        let var = draws.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n as f64;
        assert_approx_eq!(mean, 5.0, 0.1);
        assert_approx_eq!(var.sqrt(), 2.0, 0.1);
    }
    #[test]
    fn test_zero_std_returns_mean() {
        let mut sampler = Sampler::from_seed(11);
        assert_eq!(sampler.gaussian(1.5, 0.0), 1.5);
    }
    #[test]
    fn test_cumulative_weights_skip_zero_entries() {
        let table = CumulativeWeights::new(&[0.0, 1.0, 0.0, 3.0]);
        assert_approx_eq!(table.total(), 4.0, 1e-12);
        assert_eq!(table.index_at(0.0), 1);
        assert_eq!(table.index_at(0.999), 1);
        assert_eq!(table.index_at(1.0), 3);
        assert_eq!(table.index_at(3.999), 3);
        assert_approx_eq!(table.probability(0), 0.0, 1e-12);
        assert_approx_eq!(table.probability(3), 0.75, 1e-12);
    }
    #[test]
    fn test_cumulative_weights_uniform_fallback() {
        let table = CumulativeWeights::new(&[0.0, -1.0, f64::NAN]);
        assert_eq!(table.len(), 3);
        for i in 0..3 {
            assert_approx_eq!(table.probability(i), 1.0 / 3.0, 1e-12);
        }
    }
    #[test]
    fn test_discrete_never_picks_zero_weight() {
        let mut sampler = Sampler::from_seed(5);
        let table = CumulativeWeights::new(&[0.0, 2.0, 0.0, 1.0, 0.0]);
        for _ in 0..1000 {
            let idx = sampler.discrete(&table);
            assert!(idx == 1 || idx == 3, "picked zero-weight index {idx}");
        }
    }
}
