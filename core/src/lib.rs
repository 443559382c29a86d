//! Landmark-based particle filter localization toolbox
//!
//! This crate implements a Sequential Monte Carlo (particle) filter that estimates the planar pose
//! `(x, y, θ)` of a mobile agent driving through a field of known landmarks. The filter is seeded
//! from a noisy GPS-style fix, propagated with a constant turn rate and velocity (CTRV) motion model
//! driven by the previous control input, weighted by associating body-frame landmark observations
//! with the map, and finally resampled in proportion to those weights.
//!
//! This crate is primarily built off of three additional dependencies:
//! - [`nalgebra`](https://crates.io/crates/nalgebra): Provides the rotations and small matrices used by the measurement model and estimates.
//! - [`rand`](https://crates.io/crates/rand) and [`rand_distr`](https://crates.io/crates/rand_distr): Provides the seeded random number generation for noise and resampling.
//! - [`rayon`](https://crates.io/crates/rayon): Provides the data-parallel fan-out used when weighting particles.
//!
//! All other functionality is auxiliary (configuration, telemetry parsing, CSV replay).
//!
//! ## Crate overview
//!
//! - [sampling]: Contains the filter-owned random number source (Gaussian and weighted discrete draws).
//! - [particle]: Contains the particle type, diagnostic rendering, resampling, and averaging strategies.
//! - [motion]: Contains the CTRV motion model used during prediction.
//! - [measurements]: Contains the observation type, frame transforms, data association and the likelihood.
//! - [map]: Contains the landmark map and its text loader.
//! - [filter]: Contains the particle filter itself.
//! - [messages]: Contains the telemetry protocol (inbound readings, outbound best-particle reports).
//! - [sim]: Contains session configuration, synthetic drives and CSV replay utilities.
//!
//! ## Coordinate and state definitions
//!
//! Each particle carries the three-state pose
//!
//! $$
//! x = [p_x, p_y, \theta]
//! $$
//!
//! where $p_x$, $p_y$ are map-frame positions in meters and $\theta$ is the heading in radians measured
//! counter-clockwise from the map x axis. The heading is deliberately left unwrapped by the filter; use
//! [wrap_to_pi] when comparing headings.
//!
//! Observations are reported in the vehicle (body) frame: $x$ forward, $y$ to the left. A body-frame
//! observation $(o_x, o_y)$ seen from pose $(p_x, p_y, \theta)$ lands in the map frame at
//!
//! $$
//! \begin{bmatrix} m_x \\\\ m_y \end{bmatrix} =
//! \begin{bmatrix} \cos\theta & -\sin\theta \\\\ \sin\theta & \cos\theta \end{bmatrix}
//! \begin{bmatrix} o_x \\\\ o_y \end{bmatrix} + \begin{bmatrix} p_x \\\\ p_y \end{bmatrix}
//! $$
//!
//! ## Filter cycle
//!
//! 1. `init`: draw the population around the first fix.
//! 2. `prediction`: CTRV propagation with process noise (every later update).
//! 3. `update_weights`: nearest-neighbour association and bivariate Gaussian likelihood.
//! 4. `resample`: multinomial resampling proportional to weight.
pub mod filter;
pub mod map;
pub mod measurements;
pub mod messages;
pub mod motion;
pub mod particle;
pub mod sampling;
pub mod sim;

use nalgebra::{Rotation2, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

pub use filter::{FilterConfig, ParticleFilter};
pub use map::{Landmark, LandmarkMap};
pub use measurements::Observation;
pub use particle::Particle;

/// Small magnitude used both to gate the straight-line motion branch and to floor particle weights.
pub const EPSILON: f64 = 1e-4;

/// Planar pose of the agent (or of a single hypothesis) in the map frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    /// Position along the map x axis (m)
    pub x: f64,
    /// Position along the map y axis (m)
    pub y: f64,
    /// Heading (rad), not wrapped
    pub theta: f64,
}
impl Pose {
    pub fn new(x: f64, y: f64, theta: f64) -> Self {
        Pose { x, y, theta }
    }
    /// Position component as a vector
    pub fn position(&self) -> Vector2<f64> {
        Vector2::new(self.x, self.y)
    }
    /// Rotation from the body frame into the map frame
    pub fn rotation(&self) -> Rotation2<f64> {
        Rotation2::new(self.theta)
    }
    /// Transform a body-frame point into the map frame (rotate, then translate).
    pub fn to_map_frame(&self, body: &Vector2<f64>) -> Vector2<f64> {
        self.rotation() * body + self.position()
    }
}
impl Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pose(x: {:.4}, y: {:.4}, theta: {:.4})",
            self.x, self.y, self.theta
        )
    }
}
impl From<Vector3<f64>> for Pose {
    fn from(vector: Vector3<f64>) -> Self {
        Pose::new(vector[0], vector[1], vector[2])
    }
}
impl From<Pose> for Vector3<f64> {
    fn from(pose: Pose) -> Self {
        Vector3::new(pose.x, pose.y, pose.theta)
    }
}
impl From<[f64; 3]> for Pose {
    fn from(array: [f64; 3]) -> Self {
        Pose::new(array[0], array[1], array[2])
    }
}

/// Control input applied over one prediction interval.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlInput {
    /// Forward velocity (m/s)
    pub velocity: f64,
    /// Yaw rate (rad/s), positive counter-clockwise
    pub yaw_rate: f64,
}
impl ControlInput {
    pub fn new(velocity: f64, yaw_rate: f64) -> Self {
        ControlInput { velocity, yaw_rate }
    }
}
impl Display for ControlInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ControlInput(velocity: {:.4}, yaw_rate: {:.4})",
            self.velocity, self.yaw_rate
        )
    }
}

/// Wrap an angle to the range $-\pi$ to $\pi$ radians
///
/// This function is generic and can be used with any type that implements the necessary traits.
///
/// # Arguments
/// * `angle` - The angle to be wrapped, in radians.
/// # Returns
/// * The wrapped angle, which will be in the range -π to π radians.
/// # Example
/// ```rust
/// use landmark_pf::wrap_to_pi;
/// use std::f64::consts::PI;
/// let angle = 3.0 * PI / 2.0; // radians
/// let wrapped_angle = wrap_to_pi(angle);
/// assert_eq!(wrapped_angle, -PI / 2.0);
/// ```
pub fn wrap_to_pi<T>(angle: T) -> T
where
    T: PartialOrd + Copy + std::ops::SubAssign + std::ops::AddAssign + From<f64>,
{
    let mut wrapped: T = angle;
    while wrapped > T::from(std::f64::consts::PI) {
        wrapped -= T::from(2.0 * std::f64::consts::PI);
    }
    while wrapped < T::from(-std::f64::consts::PI) {
        wrapped += T::from(2.0 * std::f64::consts::PI);
    }
    wrapped
}
