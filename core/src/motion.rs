//! Constant turn rate and velocity (CTRV) motion model
//!
//! The model propagates a planar pose over an interval $\Delta t$ given the previous control
//! input (forward velocity $v$ and yaw rate $\omega$). For $|\omega| \geq \epsilon$ the agent
//! travels along a circular arc:
//!
//! $$
//! \begin{aligned}
//! \theta' &= \theta + \omega \Delta t \\\\
//! x' &= x + \frac{v}{\omega} (\sin\theta' - \sin\theta) \\\\
//! y' &= y + \frac{v}{\omega} (\cos\theta - \cos\theta')
//! \end{aligned}
//! $$
//!
//! and for $|\omega| < \epsilon$ the straight-line limit is used instead, leaving the heading
//! unchanged. The heading is never wrapped.
use crate::sampling::Sampler;
use crate::{ControlInput, EPSILON, Pose};

/// Deterministic CTRV step without process noise.
///
/// # Example
/// ```rust
/// use landmark_pf::motion::kinematic_step;
/// use landmark_pf::{ControlInput, Pose};
/// let next = kinematic_step(&Pose::new(0.0, 0.0, 0.0), &ControlInput::new(2.0, 0.0), 0.5);
/// assert_eq!(next, Pose::new(1.0, 0.0, 0.0));
/// ```
pub fn kinematic_step(pose: &Pose, control: &ControlInput, dt: f64) -> Pose {
    let v = control.velocity;
    let yaw_rate = control.yaw_rate;
    let theta = pose.theta;
    if yaw_rate.abs() < EPSILON {
        Pose::new(
            pose.x + v * dt * theta.cos(),
            pose.y + v * dt * theta.sin(),
            theta,
        )
    } else {
        let theta_next = theta + yaw_rate * dt;
        let radius = v / yaw_rate;
        Pose::new(
            pose.x + radius * (theta_next.sin() - theta.sin()),
            pose.y + radius * (theta.cos() - theta_next.cos()),
            theta_next,
        )
    }
}

/// CTRV step followed by additive, zero-mean Gaussian process noise on x, y and heading.
///
/// Exactly three draws are taken from `sampler`, in x, y, heading order.
pub fn propagate(
    pose: &Pose,
    control: &ControlInput,
    dt: f64,
    std_pos: &[f64; 3],
    sampler: &mut Sampler,
) -> Pose {
    let predicted = kinematic_step(pose, control, dt);
    Pose::new(
        sampler.gaussian(predicted.x, std_pos[0]),
        sampler.gaussian(predicted.y, std_pos[1]),
        sampler.gaussian(predicted.theta, std_pos[2]),
    )
}
