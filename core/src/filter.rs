//! Landmark particle filter
//!
//! [ParticleFilter] owns a fixed-size population of [Particle]s, a weight array kept in lockstep
//! with the particles' own weights, and a single seeded [Sampler] that is advanced across
//! initialization, prediction and resampling. A typical cycle looks like:
//!
//! ```rust
//! use landmark_pf::{Landmark, LandmarkMap, Observation, ParticleFilter};
//!
//! let map = LandmarkMap::new(vec![Landmark::new(1, 5.0, 5.0)]);
//! let mut pf = ParticleFilter::with_seed(100, 42);
//! pf.init(0.0, 0.0, 0.0, &[0.3, 0.3, 0.01]);
//!
//! let mut observations = vec![Observation::new(5.0, 5.0)];
//! pf.update_weights(50.0, &[0.3, 0.3], &mut observations, &map);
//! pf.resample();
//! pf.prediction(0.1, &[0.3, 0.3, 0.01], 1.0, 0.0);
//!
//! assert_eq!(pf.particles().len(), 100);
//! assert_eq!(observations[0].id, 1);
//! ```
//!
//! Weighting fans out over particles with rayon. By default a dedicated pool of eight workers is
//! built for each filter; `worker_threads: None` (or `Some(0)`) uses rayon's global pool instead,
//! and `parallel: false` weighs particles on the calling thread.
use crate::map::LandmarkMap;
use crate::measurements::{Observation, weigh_particle, write_back_associations};
use crate::motion::propagate;
use crate::particle::{
    Particle, ParticleAveragingStrategy, best_particle_index, multinomial_resample,
};
use crate::sampling::Sampler;
use crate::{ControlInput, Pose};

use log::{debug, trace, warn};
use nalgebra::Matrix3;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use std::fmt::{self, Debug};

/// Default number of weighting workers
pub const DEFAULT_WORKER_THREADS: usize = 8;

/// Construction-time filter parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Population size, fixed for the lifetime of the filter
    pub num_particles: usize,
    /// RNG seed; drawn from entropy when absent
    pub seed: Option<u64>,
    /// Size of the dedicated weighting pool; `None` or `0` uses rayon's global pool
    pub worker_threads: Option<usize>,
    /// Weigh particles in parallel
    pub parallel: bool,
    pub averaging_strategy: ParticleAveragingStrategy,
}
impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: 1000,
            seed: None,
            worker_threads: Some(DEFAULT_WORKER_THREADS),
            parallel: true,
            averaging_strategy: ParticleAveragingStrategy::HighestWeight,
        }
    }
}

/// Sequential Monte Carlo filter over planar poses, owning its particles and random stream.
pub struct ParticleFilter {
    particles: Vec<Particle>,
    weights: Vec<f64>,
    sampler: Sampler,
    initialized: bool,
    config: FilterConfig,
    pool: Option<rayon::ThreadPool>,
}
impl Debug for ParticleFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self.weights.iter().copied().fold(f64::INFINITY, f64::min);
        let max_weight = self.weights.iter().copied().fold(0.0, f64::max);
        let mut debug = f.debug_struct("ParticleFilter");
        debug
            .field("num_particles", &self.config.num_particles)
            .field("initialized", &self.initialized)
            .field("seed", &self.sampler.seed())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            );
        if let Some(best) = self.best_particle() {
            debug.field(
                "best_pose",
                &format_args!(
                    "({:.3}, {:.3}, {:.3} rad)",
                    best.pose.x, best.pose.y, best.pose.theta
                ),
            );
        }
        debug.finish()
    }
}
impl ParticleFilter {
    /// Create an uninitialized filter.
    ///
    /// # Panics
    /// If `config.num_particles` is zero.
    pub fn new(config: FilterConfig) -> Self {
        assert!(
            config.num_particles > 0,
            "ParticleFilter requires at least one particle"
        );
        let sampler = match config.seed {
            Some(seed) => Sampler::from_seed(seed),
            None => Sampler::from_entropy(),
        };
        let pool = if config.parallel {
            build_pool(config.worker_threads)
        } else {
            None
        };
        debug!(
            "Created particle filter with {} particles (seed {}, {} weighting)",
            config.num_particles,
            sampler.seed(),
            match (&pool, config.parallel) {
                (Some(_), _) => "dedicated pool",
                (None, true) => "global pool",
                (None, false) => "sequential",
            }
        );
        ParticleFilter {
            particles: Vec::new(),
            weights: Vec::new(),
            sampler,
            initialized: false,
            config,
            pool,
        }
    }
    /// Filter with `num_particles` particles and a fixed seed, otherwise default settings
    pub fn with_seed(num_particles: usize, seed: u64) -> Self {
        Self::new(FilterConfig {
            num_particles,
            seed: Some(seed),
            ..Default::default()
        })
    }
    /// Draw the population around an initial pose estimate.
    ///
    /// Each particle samples x, y and heading from independent Gaussians with standard deviations
    /// `std`. Every weight is reset to one. Calling this again replaces the population.
    pub fn init(&mut self, x: f64, y: f64, theta: f64, std: &[f64; 3]) {
        assert_non_negative(std, "initialization");
        let n = self.config.num_particles;
        let sampler = &mut self.sampler;
        self.particles = (0..n)
            .map(|id| {
                let pose = Pose::new(
                    sampler.gaussian(x, std[0]),
                    sampler.gaussian(y, std[1]),
                    sampler.gaussian(theta, std[2]),
                );
                Particle::new(id, pose, 1.0)
            })
            .collect();
        self.weights = vec![1.0; n];
        self.initialized = true;
        debug!(
            "Initialized {} particles around ({:.3}, {:.3}, {:.3})",
            n, x, y, theta
        );
    }
    /// Move every particle through the CTRV model with additive process noise.
    ///
    /// # Panics
    /// If the filter has not been initialized or any standard deviation is negative.
    pub fn prediction(&mut self, delta_t: f64, std_pos: &[f64; 3], velocity: f64, yaw_rate: f64) {
        assert!(
            self.initialized,
            "prediction called before the particle filter was initialized"
        );
        assert_non_negative(std_pos, "process noise");
        let control = ControlInput::new(velocity, yaw_rate);
        for particle in self.particles.iter_mut() {
            particle.pose = propagate(&particle.pose, &control, delta_t, std_pos, &mut self.sampler);
        }
        trace!("Predicted {} particles with {}", self.particles.len(), control);
    }
    /// Weigh every particle against `observations` and the map.
    ///
    /// Particles are weighed independently, in parallel unless configured otherwise. Each
    /// observation's `id` is then set to the association computed for the last particle in the
    /// population.
    ///
    /// # Panics
    /// If either landmark standard deviation is not strictly positive.
    pub fn update_weights(
        &mut self,
        sensor_range: f64,
        std_landmark: &[f64; 2],
        observations: &mut [Observation],
        map: &LandmarkMap,
    ) {
        assert!(
            std_landmark.iter().all(|s| *s > 0.0),
            "landmark standard deviations must be positive, got {:?}",
            std_landmark
        );
        let shared: &[Observation] = observations;
        let weigh = |(particle, weight): (&mut Particle, &mut f64)| {
            *weight = weigh_particle(particle, sensor_range, std_landmark, shared, map);
        };
        let particles = &mut self.particles;
        let weights = &mut self.weights;
        if self.config.parallel {
            let mut run = || particles.par_iter_mut().zip(weights.par_iter_mut()).for_each(weigh);
            match &self.pool {
                Some(pool) => pool.install(run),
                None => run(),
            }
        } else {
            particles.iter_mut().zip(weights.iter_mut()).for_each(weigh);
        }
        if let Some(last) = self.particles.last() {
            write_back_associations(last, observations);
        }
        trace!(
            "Weighted {} particles against {} observations",
            self.particles.len(),
            observations.len()
        );
    }
    /// Multinomial resampling proportional to the weight array.
    ///
    /// Slot `i` of the new population is a copy of the drawn particle (pose, weight and
    /// diagnostics) with its id set to `i`.
    pub fn resample(&mut self) {
        let n = self.particles.len();
        let indices = multinomial_resample(&self.weights, n, &mut self.sampler);
        let resampled: Vec<Particle> = indices
            .into_iter()
            .enumerate()
            .map(|(id, source)| {
                let mut particle = self.particles[source].clone();
                particle.id = id;
                particle
            })
            .collect();
        self.weights = resampled.iter().map(|p| p.weight).collect();
        self.particles = resampled;
        debug!(
            "Resampled {} particles, effective sample size {:.1}",
            n,
            self.effective_sample_size()
        );
    }
    /// Particle with the strictly greatest weight; the first one wins ties.
    pub fn best_particle(&self) -> Option<&Particle> {
        best_particle_index(&self.particles).map(|i| &self.particles[i])
    }
    /// Point estimate and covariance according to the configured averaging strategy
    pub fn estimate(&self) -> Option<(Pose, Matrix3<f64>)> {
        self.config.averaging_strategy.estimate(&self.particles)
    }
    /// $(\sum w)^2 / \sum w^2$ over the weight array, zero for an empty or all-zero population
    pub fn effective_sample_size(&self) -> f64 {
        let sum: f64 = self.weights.iter().sum();
        let sum_sq: f64 = self.weights.iter().map(|w| w * w).sum();
        if sum_sq > 0.0 { sum * sum / sum_sq } else { 0.0 }
    }
    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    pub fn num_particles(&self) -> usize {
        self.config.num_particles
    }
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }
    pub fn seed(&self) -> u64 {
        self.sampler.seed()
    }
}

fn build_pool(worker_threads: Option<usize>) -> Option<rayon::ThreadPool> {
    let threads = worker_threads.filter(|n| *n > 0)?;
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => Some(pool),
        Err(e) => {
            warn!("Could not build a {threads}-thread weighting pool, using the global pool: {e}");
            None
        }
    }
}

fn assert_non_negative(std: &[f64], what: &str) {
    assert!(
        std.iter().all(|s| *s >= 0.0),
        "{} standard deviations must be non-negative, got {:?}",
        what,
        std
    );
}
