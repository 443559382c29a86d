//! Particle type, diagnostic rendering, resampling and averaging strategies.
use crate::map::LandmarkId;
use crate::sampling::{CumulativeWeights, Sampler};
use crate::{Pose, wrap_to_pi};

use nalgebra::{Matrix3, Vector2, Vector3};
use std::fmt::{self, Display};

/// A single pose hypothesis.
///
/// Besides its pose and weight, a particle records which landmark each observation was
/// associated with during the last weighting step, and where that observation landed in the map
/// frame. These diagnostics are rebuilt from scratch on every weighting step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particle {
    /// Position in the population; reassigned on every resampling
    pub id: usize,
    pub pose: Pose,
    pub weight: f64,
    /// Landmark id associated with each observation (`-1` when nothing was in range)
    pub associations: Vec<LandmarkId>,
    /// Map-frame x of each observation
    pub sense_x: Vec<f64>,
    /// Map-frame y of each observation
    pub sense_y: Vec<f64>,
}
impl Display for Particle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Particle")
            .field("id", &self.id)
            .field("x", &self.pose.x)
            .field("y", &self.pose.y)
            .field("theta", &self.pose.theta)
            .field("weight", &self.weight)
            .field("associations", &self.associations.len())
            .finish()
    }
}
impl Particle {
    pub fn new(id: usize, pose: Pose, weight: f64) -> Particle {
        Particle {
            id,
            pose,
            weight,
            associations: Vec::new(),
            sense_x: Vec::new(),
            sense_y: Vec::new(),
        }
    }
    /// Drop the previous step's diagnostics, keeping room for `capacity` new entries.
    pub fn clear_diagnostics(&mut self, capacity: usize) {
        self.associations.clear();
        self.sense_x.clear();
        self.sense_y.clear();
        self.associations.reserve(capacity);
        self.sense_x.reserve(capacity);
        self.sense_y.reserve(capacity);
    }
    /// Record one observation's association and its map-frame coordinates.
    pub fn record_association(&mut self, landmark_id: LandmarkId, global: &Vector2<f64>) {
        self.associations.push(landmark_id);
        self.sense_x.push(global[0]);
        self.sense_y.push(global[1]);
    }
    /// Associated landmark ids as a space separated string
    pub fn get_associations(&self) -> String {
        join_with_spaces(&self.associations)
    }
    /// Map-frame observation x coordinates as a space separated string, in single precision
    pub fn get_sense_x(&self) -> String {
        join_with_spaces(&single_precision(&self.sense_x))
    }
    /// Map-frame observation y coordinates as a space separated string, in single precision
    pub fn get_sense_y(&self) -> String {
        join_with_spaces(&single_precision(&self.sense_y))
    }
}

fn single_precision(values: &[f64]) -> Vec<f32> {
    values.iter().map(|v| *v as f32).collect()
}

/// Join values with single spaces. An empty slice renders as an empty string.
pub fn join_with_spaces<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Index of the particle with the strictly greatest weight; the first one wins ties.
pub fn best_particle_index(particles: &[Particle]) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (i, particle) in particles.iter().enumerate() {
        match best {
            Some(b) if particle.weight <= particles[b].weight => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Multinomial resampling.
///
/// Draws `num_samples` indices independently and with replacement, each with probability
/// proportional to its weight. Returns the chosen source indices in draw order.
pub fn multinomial_resample(
    weights: &[f64],
    num_samples: usize,
    sampler: &mut Sampler,
) -> Vec<usize> {
    if weights.is_empty() {
        return Vec::new();
    }
    let table = CumulativeWeights::new(weights);
    (0..num_samples).map(|_| sampler.discrete(&table)).collect()
}

/// How a single pose estimate is extracted from the population.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "snake_case")]
pub enum ParticleAveragingStrategy {
    /// Report the best particle (strictly greatest weight)
    #[default]
    HighestWeight,
    /// Weight-normalized mean position with a circular mean heading
    WeightedAverage,
}

impl ParticleAveragingStrategy {
    /// Compute the point estimate and its covariance for the given population.
    ///
    /// The covariance is zero for [ParticleAveragingStrategy::HighestWeight]. Returns `None`
    /// for an empty population.
    pub fn estimate(&self, particles: &[Particle]) -> Option<(Pose, Matrix3<f64>)> {
        match self {
            ParticleAveragingStrategy::HighestWeight => Self::highest_weight_state(particles),
            ParticleAveragingStrategy::WeightedAverage => Self::weighted_average_state(particles),
        }
    }
    fn highest_weight_state(particles: &[Particle]) -> Option<(Pose, Matrix3<f64>)> {
        let best = best_particle_index(particles)?;
        Some((particles[best].pose, Matrix3::zeros()))
    }
    fn weighted_average_state(particles: &[Particle]) -> Option<(Pose, Matrix3<f64>)> {
        if particles.is_empty() {
            return None;
        }
        let total: f64 = particles.iter().map(|p| p.weight.max(0.0)).sum();
        let normalized: Vec<f64> = if total > 0.0 && total.is_finite() {
            particles.iter().map(|p| p.weight.max(0.0) / total).collect()
        } else {
            vec![1.0 / particles.len() as f64; particles.len()]
        };

        let mut x = 0.0;
        let mut y = 0.0;
        let mut sin_sum = 0.0;
        let mut cos_sum = 0.0;
        for (particle, w) in particles.iter().zip(normalized.iter()) {
            x += w * particle.pose.x;
            y += w * particle.pose.y;
            sin_sum += w * particle.pose.theta.sin();
            cos_sum += w * particle.pose.theta.cos();
        }
        let mean = Pose::new(x, y, sin_sum.atan2(cos_sum));

        let mut cov = Matrix3::<f64>::zeros();
        for (particle, w) in particles.iter().zip(normalized.iter()) {
            let diff = Vector3::new(
                particle.pose.x - mean.x,
                particle.pose.y - mean.y,
                wrap_to_pi(particle.pose.theta - mean.theta),
            );
            cov += *w * diff * diff.transpose();
        }
        Some((mean, cov))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn particle_with_weight(id: usize, weight: f64) -> Particle {
        Particle::new(id, Pose::new(id as f64, 0.0, 0.0), weight)
    }

    #[test]
    fn test_diagnostic_strings() {
        let mut particle = Particle::new(0, Pose::default(), 1.0);
        particle.record_association(3, &Vector2::new(1.5, -2.0));
        particle.record_association(7, &Vector2::new(4.0, 0.25));
        assert_eq!(particle.get_associations(), "3 7");
        assert_eq!(particle.get_sense_x(), "1.5 4");
        assert_eq!(particle.get_sense_y(), "-2 0.25");
    }
    #[test]
    fn test_sense_coordinates_render_in_single_precision() {
        let mut particle = Particle::new(0, Pose::default(), 1.0);
        particle.record_association(1, &Vector2::new(5.000000000000001, 0.1 + 0.2));
        assert_eq!(particle.get_sense_x(), "5");
        assert_eq!(particle.get_sense_y(), "0.3");
        assert_approx_eq!(particle.sense_x[0], 5.000000000000001, 1e-15);
    }
    #[test]
    fn test_diagnostic_strings_empty() {
        let particle = Particle::new(0, Pose::default(), 1.0);
        assert_eq!(particle.get_associations(), "");
        assert_eq!(particle.get_sense_x(), "");
        assert_eq!(particle.get_sense_y(), "");
    }
    #[test]
    fn test_diagnostic_string_token_count() {
        let values: Vec<LandmarkId> = (0..25).collect();
        let rendered = join_with_spaces(&values);
        assert_eq!(rendered.split(' ').count(), 25);
        assert!(!rendered.starts_with(' '));
        assert!(!rendered.ends_with(' '));
        assert!(!rendered.contains("  "));
    }
    #[test]
    fn test_clear_diagnostics() {
        let mut particle = Particle::new(0, Pose::default(), 1.0);
        particle.record_association(1, &Vector2::new(1.0, 1.0));
        particle.clear_diagnostics(4);
        assert!(particle.associations.is_empty());
        assert!(particle.sense_x.is_empty());
        assert!(particle.sense_y.is_empty());
    }
    #[test]
    fn test_best_particle_first_occurrence_wins() {
        let particles = vec![
            particle_with_weight(0, 0.1),
            particle_with_weight(1, 0.5),
            particle_with_weight(2, 0.5),
            particle_with_weight(3, 0.2),
        ];
        assert_eq!(best_particle_index(&particles), Some(1));
        assert_eq!(best_particle_index(&[]), None);
    }
    #[test]
    fn test_multinomial_resample_length_and_support() {
        let mut sampler = Sampler::from_seed(1);
        let indices = multinomial_resample(&[0.0, 1.0, 0.0], 50, &mut sampler);
        assert_eq!(indices.len(), 50);
        assert!(indices.iter().all(|&i| i == 1));
    }
    #[test]
    fn test_multinomial_resample_proportional() {
        let weights = [0.1, 0.2, 0.3, 0.4];
        let mut sampler = Sampler::from_seed(2024);
        let draws = 100_000;
        let indices = multinomial_resample(&weights, draws, &mut sampler);
        let mut counts = [0usize; 4];
        for i in indices {
            counts[i] += 1;
        }
        for (count, w) in counts.iter().zip(weights.iter()) {
            let freq = *count as f64 / draws as f64;
            // Five binomial standard deviations
            let tol = 5.0 * (w * (1.0 - w) / draws as f64).sqrt();
            assert!(
                (freq - w).abs() < tol,
                "frequency {freq:.4} too far from weight {w:.4}"
            );
        }
    }
    #[test]
    fn test_highest_weight_estimate() {
        let particles = vec![particle_with_weight(0, 0.1), particle_with_weight(1, 0.9)];
        let (pose, cov) = ParticleAveragingStrategy::HighestWeight
            .estimate(&particles)
            .unwrap();
        assert_eq!(pose, particles[1].pose);
        assert_eq!(cov, Matrix3::zeros());
    }
    #[test]
    fn test_weighted_average_estimate() {
        let particles = vec![
            Particle::new(0, Pose::new(0.0, 0.0, 0.1), 1.0),
            Particle::new(1, Pose::new(4.0, 2.0, -0.1), 3.0),
        ];
        let (pose, cov) = ParticleAveragingStrategy::WeightedAverage
            .estimate(&particles)
            .unwrap();
        assert_approx_eq!(pose.x, 3.0, 1e-12);
        assert_approx_eq!(pose.y, 1.5, 1e-12);
        assert!(pose.theta < 0.0 && pose.theta > -0.1);
        // var_x = 0.25 * 9 + 0.75 * 1
        assert_approx_eq!(cov[(0, 0)], 3.0, 1e-12);
    }
    #[test]
    fn test_weighted_average_heading_across_branch_cut() {
        let particles = vec![
            Particle::new(0, Pose::new(0.0, 0.0, std::f64::consts::PI - 0.05), 1.0),
            Particle::new(1, Pose::new(0.0, 0.0, -std::f64::consts::PI + 0.05), 1.0),
        ];
        let (pose, cov) = ParticleAveragingStrategy::WeightedAverage
            .estimate(&particles)
            .unwrap();
        assert_approx_eq!(pose.theta.abs(), std::f64::consts::PI, 1e-9);
        assert_approx_eq!(cov[(2, 2)], 0.05f64.powi(2), 1e-9);
    }
}
