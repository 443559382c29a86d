//! Landmark measurement model
//!
//! Observations arrive in the vehicle (body) frame. For each particle, every observation is moved
//! into the map frame using that particle's pose, associated with the nearest landmark that lies
//! within sensor range of the particle, and scored with an axis-aligned bivariate Gaussian:
//!
//! $$
//! w = \frac{1}{2\pi\sigma_x\sigma_y} \prod_j
//!     \exp\left(-\frac{(m_{x,j} - l_{x,j})^2}{2\sigma_x^2} - \frac{(m_{y,j} - l_{y,j})^2}{2\sigma_y^2}\right)
//! $$
//!
//! The resulting weight is kept away from zero (see [keep_in_range]) so that resampling always
//! has a well defined distribution to draw from.
use crate::map::{Landmark, LandmarkId, LandmarkMap};
use crate::particle::Particle;
use crate::EPSILON;

use nalgebra::Vector2;
use std::fmt::{self, Display};

/// Association id used when no landmark lies within sensor range
pub const NO_ASSOCIATION: LandmarkId = -1;

/// A single landmark observation in the vehicle frame.
///
/// `id` is overwritten by [crate::ParticleFilter::update_weights] with the associated landmark id.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Observation {
    /// Forward distance (m)
    pub x: f64,
    /// Leftward distance (m)
    pub y: f64,
    pub id: LandmarkId,
}
impl Observation {
    pub fn new(x: f64, y: f64) -> Self {
        Observation {
            x,
            y,
            id: NO_ASSOCIATION,
        }
    }
    pub fn body(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
}
impl Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observation(x: {}, y: {}, id: {})", self.x, self.y, self.id)
    }
}

/// Result of associating one map-frame observation with the landmark set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Association {
    pub id: LandmarkId,
    /// Position of the chosen landmark, `(0, 0)` when nothing was in range
    pub landmark: Vector2<f64>,
    /// Squared distance to the chosen landmark, `+∞` when nothing was in range
    pub distance_squared: f64,
}

/// Brute-force nearest neighbour among `candidates`. Ties go to the first candidate encountered.
pub fn nearest_landmark(global: &Vector2<f64>, candidates: &[Landmark]) -> Association {
    let mut best = Association {
        id: NO_ASSOCIATION,
        landmark: Vector2::zeros(),
        distance_squared: f64::INFINITY,
    };
    for landmark in candidates {
        let distance_squared = landmark.distance_squared(global[0], global[1]);
        if distance_squared < best.distance_squared {
            best = Association {
                id: landmark.id,
                landmark: Vector2::new(landmark.x, landmark.y),
                distance_squared,
            };
        }
    }
    best
}

/// Unnormalized likelihood term for a single observation/landmark pair
pub fn observation_likelihood(
    global: &Vector2<f64>,
    landmark: &Vector2<f64>,
    std_landmark: &[f64; 2],
) -> f64 {
    let term_x = (global[0] - landmark[0]).powi(2) / (2.0 * std_landmark[0].powi(2));
    let term_y = (global[1] - landmark[1]).powi(2) / (2.0 * std_landmark[1].powi(2));
    (-term_x - term_y).exp()
}

/// Normalizing constant $2\pi\sigma_x\sigma_y$ of the bivariate Gaussian
pub fn gaussian_normalizer(std_landmark: &[f64; 2]) -> f64 {
    2.0 * std::f64::consts::PI * std_landmark[0] * std_landmark[1]
}

/// Snap weights with magnitude below [EPSILON] onto `±EPSILON`.
///
/// Anything in `[-EPSILON, EPSILON)` becomes `EPSILON`, anything below `-EPSILON` becomes
/// `-EPSILON`, larger weights pass through.
pub fn keep_in_range(weight: f64) -> f64 {
    if weight < -EPSILON {
        -EPSILON
    } else if weight < EPSILON {
        EPSILON
    } else {
        weight
    }
}

/// Weight a single particle against the observations and the map.
///
/// The particle's diagnostics are rebuilt, its weight is replaced, and the new weight is returned.
/// `observations` are only read here; the caller decides how associations flow back to them.
pub fn weigh_particle(
    particle: &mut Particle,
    sensor_range: f64,
    std_landmark: &[f64; 2],
    observations: &[Observation],
    map: &LandmarkMap,
) -> f64 {
    let in_range = map.within_range(particle.pose.x, particle.pose.y, sensor_range);
    particle.clear_diagnostics(observations.len());

    let mut weight = 1.0;
    for observation in observations {
        let global = particle.pose.to_map_frame(&observation.body());
        let association = nearest_landmark(&global, &in_range);
        particle.record_association(association.id, &global);
        weight *= observation_likelihood(&global, &association.landmark, std_landmark);
    }
    weight = keep_in_range(weight / gaussian_normalizer(std_landmark));
    particle.weight = weight;
    weight
}

/// Copy a particle's associations back into the observations they were computed from.
pub fn write_back_associations(particle: &Particle, observations: &mut [Observation]) {
    for (observation, id) in observations.iter_mut().zip(particle.associations.iter()) {
        observation.id = *id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Pose;
    use assert_approx_eq::assert_approx_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn sample_map() -> LandmarkMap {
        LandmarkMap::new(vec![
            Landmark::new(1, 5.0, 5.0),
            Landmark::new(2, 20.0, 0.0),
            Landmark::new(3, -4.0, 1.0),
        ])
    }

    #[test]
    fn test_nearest_landmark_first_wins_ties() {
        let candidates = vec![
            Landmark::new(7, 1.0, 0.0),
            Landmark::new(8, -1.0, 0.0),
            Landmark::new(9, 0.0, 1.0),
        ];
        let association = nearest_landmark(&Vector2::zeros(), &candidates);
        assert_eq!(association.id, 7);
        assert_approx_eq!(association.distance_squared, 1.0, 1e-12);
    }
    #[test]
    fn test_nearest_landmark_none_in_range() {
        let association = nearest_landmark(&Vector2::new(3.0, 4.0), &[]);
        assert_eq!(association.id, NO_ASSOCIATION);
        assert_eq!(association.landmark, Vector2::zeros());
        assert!(association.distance_squared.is_infinite());
    }
    #[test]
    fn test_likelihood_decreases_with_distance() {
        let std = [0.3, 0.3];
        let global = Vector2::new(0.0, 0.0);
        let mut previous = f64::INFINITY;
        for step in 0..20 {
            let landmark = Vector2::new(0.05 * step as f64, 0.02 * step as f64);
            let likelihood = observation_likelihood(&global, &landmark, &std);
            assert!(likelihood < previous);
            previous = likelihood;
        }
        assert_eq!(observation_likelihood(&global, &global, &std), 1.0);
    }
    #[test]
    fn test_keep_in_range() {
        assert_eq!(keep_in_range(0.0), EPSILON);
        assert_eq!(keep_in_range(1e-300), EPSILON);
        assert_eq!(keep_in_range(-1e-6), EPSILON);
        assert_eq!(keep_in_range(-0.5), -EPSILON);
        assert_eq!(keep_in_range(0.25), 0.25);
        assert_eq!(keep_in_range(EPSILON), EPSILON);
    }
    #[test]
    fn test_weigh_particle_exact_match() {
        let mut particle = Particle::new(0, Pose::new(0.0, 0.0, 0.0), 1.0);
        let std = [0.3, 0.3];
        let weight = weigh_particle(
            &mut particle,
            100.0,
            &std,
            &[Observation::new(5.0, 5.0)],
            &sample_map(),
        );
        assert_approx_eq!(weight, 1.0 / (2.0 * PI * 0.3 * 0.3), 1e-12);
        assert_eq!(particle.weight, weight);
        assert_eq!(particle.get_associations(), "1");
        assert_eq!(particle.get_sense_x(), "5");
        assert_eq!(particle.get_sense_y(), "5");
    }
    #[test]
    fn test_weigh_particle_no_observations() {
        let mut particle = Particle::new(0, Pose::new(1.0, 1.0, 0.0), 1.0);
        particle.record_association(2, &Vector2::new(0.0, 0.0));
        let weight = weigh_particle(&mut particle, 50.0, &[2.0, 3.0], &[], &sample_map());
        assert_approx_eq!(weight, 1.0 / (2.0 * PI * 6.0), 1e-12);
        assert!(particle.associations.is_empty());
    }
    #[test]
    fn test_weigh_particle_respects_sensor_range() {
        // Landmark 2 sits 20 m away; with a 10 m range only 1 and 3 are candidates.
        let mut particle = Particle::new(0, Pose::new(0.0, 0.0, 0.0), 1.0);
        weigh_particle(
            &mut particle,
            10.0,
            &[0.3, 0.3],
            &[Observation::new(19.0, 0.0)],
            &sample_map(),
        );
        assert_eq!(particle.associations, vec![1]);
    }
    #[test]
    fn test_weigh_particle_sentinel_and_floor() {
        let mut particle = Particle::new(0, Pose::new(500.0, 500.0, 0.0), 1.0);
        let weight = weigh_particle(
            &mut particle,
            1.0,
            &[0.3, 0.3],
            &[Observation::new(1.0, 0.0)],
            &sample_map(),
        );
        assert_eq!(particle.associations, vec![NO_ASSOCIATION]);
        assert_eq!(weight, EPSILON);
    }
    #[test]
    fn test_weigh_particle_rotates_observations() {
        // Facing +y: an observation 5 m ahead and 5 m to the right lands on (5, 5).
        let mut particle = Particle::new(0, Pose::new(0.0, 0.0, FRAC_PI_2), 1.0);
        weigh_particle(
            &mut particle,
            100.0,
            &[0.3, 0.3],
            &[Observation::new(5.0, -5.0)],
            &sample_map(),
        );
        assert_eq!(particle.associations, vec![1]);
        assert_approx_eq!(particle.sense_x[0], 5.0, 1e-12);
        assert_approx_eq!(particle.sense_y[0], 5.0, 1e-12);
    }
    #[test]
    fn test_write_back_associations() {
        let mut particle = Particle::new(0, Pose::default(), 1.0);
        particle.record_association(3, &Vector2::zeros());
        particle.record_association(NO_ASSOCIATION, &Vector2::zeros());
        let mut observations = vec![Observation::new(1.0, 1.0), Observation::new(2.0, 2.0)];
        observations[1].id = 42;
        write_back_associations(&particle, &mut observations);
        assert_eq!(observations[0].id, 3);
        assert_eq!(observations[1].id, NO_ASSOCIATION);
    }
}
