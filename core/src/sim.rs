//! Session configuration, synthetic drives and telemetry replay.
//!
//! This module provides:
//! - [SessionConfig], the run-time parameters of a localization session, readable from and
//!   writable to JSON, YAML or TOML
//! - [TelemetryRecord], one telemetry message per CSV row, optionally with ground truth
//! - [simulate_drive] for generating a synthetic drive through a landmark map
//! - [replay] for running a [LocalizationSession] over recorded telemetry, producing
//!   [EstimateRecord]s that can be written back to CSV and condensed with [summarize]
use crate::filter::FilterConfig;
use crate::map::LandmarkMap;
use crate::measurements::Observation;
use crate::messages::{LocalizationSession, Telemetry};
use crate::motion::kinematic_step;
use crate::sampling::Sampler;
use crate::{ControlInput, Pose, wrap_to_pi};

use anyhow::{Context, Result, bail};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

/// Logger settings carried in a session configuration file
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `off`, `error`, `warn`, `info`, `debug`, `trace`
    pub level: String,
    /// Append log lines to this file instead of stderr
    pub file: Option<String>,
}
impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Run-time parameters of a localization session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time between telemetry messages (s)
    pub delta_t: f64,
    /// Landmarks further than this from a particle are never associated (m)
    pub sensor_range: f64,
    /// Initialization and process noise: x (m), y (m), heading (rad)
    pub sigma_pos: [f64; 3],
    /// Landmark observation noise: x (m), y (m)
    pub sigma_landmark: [f64; 2],
    pub filter: FilterConfig,
    pub logging: LoggingConfig,
}
impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            delta_t: 0.1,
            sensor_range: 50.0,
            sigma_pos: [0.3, 0.3, 0.01],
            sigma_landmark: [0.3, 0.3],
            filter: FilterConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
impl SessionConfig {
    /// Reject parameter values the filter cannot run with.
    ///
    /// Configuration files and command line flags are checked here, so a bad value surfaces as
    /// an error instead of a panic inside the filter.
    pub fn validate(&self) -> Result<()> {
        if self.filter.num_particles == 0 {
            bail!("filter.num_particles must be at least 1");
        }
        if !(self.delta_t.is_finite() && self.delta_t > 0.0) {
            bail!("delta_t must be positive, got {}", self.delta_t);
        }
        if !(self.sensor_range.is_finite() && self.sensor_range >= 0.0) {
            bail!("sensor_range must be non-negative, got {}", self.sensor_range);
        }
        if !self.sigma_pos.iter().all(|s| s.is_finite() && *s >= 0.0) {
            bail!("sigma_pos entries must be non-negative, got {:?}", self.sigma_pos);
        }
        if !self.sigma_landmark.iter().all(|s| s.is_finite() && *s > 0.0) {
            bail!("sigma_landmark entries must be positive, got {:?}", self.sigma_landmark);
        }
        Ok(())
    }
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Write using the format implied by the extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Read using the format implied by the extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

/// One telemetry message as a CSV row.
///
/// The first row of a drive carries the pose reading (`sense_*`), later rows the previous control
/// input. Ground truth columns are optional and only used for error reporting.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub step: usize,
    pub sense_x: Option<f64>,
    pub sense_y: Option<f64>,
    pub sense_theta: Option<f64>,
    pub previous_velocity: Option<f64>,
    pub previous_yawrate: Option<f64>,
    /// Space separated body-frame observation x values
    pub sense_observations_x: String,
    /// Space separated body-frame observation y values
    pub sense_observations_y: String,
    pub ground_truth_x: Option<f64>,
    pub ground_truth_y: Option<f64>,
    pub ground_truth_theta: Option<f64>,
}
impl TelemetryRecord {
    pub fn to_telemetry(&self) -> Telemetry {
        Telemetry {
            sense_x: self.sense_x.map(Into::into),
            sense_y: self.sense_y.map(Into::into),
            sense_theta: self.sense_theta.map(Into::into),
            previous_velocity: self.previous_velocity.map(Into::into),
            previous_yawrate: self.previous_yawrate.map(Into::into),
            sense_observations_x: self.sense_observations_x.clone(),
            sense_observations_y: self.sense_observations_y.clone(),
        }
    }
    /// Ground truth pose, if all three columns are present
    pub fn ground_truth(&self) -> Option<Pose> {
        Some(Pose::new(
            self.ground_truth_x?,
            self.ground_truth_y?,
            self.ground_truth_theta?,
        ))
    }
    /// Read telemetry rows from a CSV file.
    ///
    /// # Example
    ///
    /// ```
    /// use landmark_pf::sim::TelemetryRecord;
    ///
    /// let records = TelemetryRecord::from_csv("./data/telemetry.csv")
    ///     .expect("Failed to read telemetry");
    /// println!("Loaded {} records", records.len());
    /// ```
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let path = path.as_ref();
        let mut rdr = csv::Reader::from_path(path)
            .with_context(|| format!("could not open telemetry file '{}'", path.display()))?;
        let mut records = Vec::new();
        for (i, result) in rdr.deserialize().enumerate() {
            let record: Self =
                result.with_context(|| format!("invalid telemetry row {}", i + 1))?;
            records.push(record);
        }
        Ok(records)
    }
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Parameters of a synthetic drive
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveProfile {
    /// Number of telemetry messages to generate
    pub steps: usize,
    pub start: Pose,
    /// Forward velocity (m/s)
    pub velocity: f64,
    /// Yaw rate (rad/s)
    pub yaw_rate: f64,
    /// Noise on the initial pose reading: x (m), y (m), heading (rad)
    pub gps_std: [f64; 3],
    /// Noise on each body-frame observation: x (m), y (m)
    pub observation_std: [f64; 2],
    pub seed: u64,
}
impl Default for DriveProfile {
    fn default() -> Self {
        DriveProfile {
            steps: 200,
            start: Pose::new(0.0, 0.0, 0.0),
            velocity: 10.0,
            yaw_rate: 0.02,
            gps_std: [0.3, 0.3, 0.01],
            observation_std: [0.3, 0.3],
            seed: 42,
        }
    }
}

/// Generate a synthetic drive through `map`.
///
/// The true trajectory is integrated with the noiseless CTRV model. Each message observes every
/// landmark within `sensor_range` of the true pose, expressed in the body frame with Gaussian
/// noise, in map order. Ground truth is attached to every record.
pub fn simulate_drive(
    map: &LandmarkMap,
    profile: &DriveProfile,
    delta_t: f64,
    sensor_range: f64,
) -> Vec<TelemetryRecord> {
    let mut sampler = Sampler::from_seed(profile.seed);
    let control = ControlInput::new(profile.velocity, profile.yaw_rate);
    let mut truth = profile.start;
    let mut records = Vec::with_capacity(profile.steps);
    for step in 0..profile.steps {
        if step > 0 {
            truth = kinematic_step(&truth, &control, delta_t);
        }
        let observations = observe(map, &truth, sensor_range, &profile.observation_std, &mut sampler);
        let telemetry = if step == 0 {
            let reading = Pose::new(
                sampler.gaussian(truth.x, profile.gps_std[0]),
                sampler.gaussian(truth.y, profile.gps_std[1]),
                sampler.gaussian(truth.theta, profile.gps_std[2]),
            );
            Telemetry::initial(&reading, &observations)
        } else {
            Telemetry::control(&control, &observations)
        };
        records.push(TelemetryRecord {
            step,
            sense_x: scalar(&telemetry.sense_x),
            sense_y: scalar(&telemetry.sense_y),
            sense_theta: scalar(&telemetry.sense_theta),
            previous_velocity: scalar(&telemetry.previous_velocity),
            previous_yawrate: scalar(&telemetry.previous_yawrate),
            sense_observations_x: telemetry.sense_observations_x,
            sense_observations_y: telemetry.sense_observations_y,
            ground_truth_x: Some(truth.x),
            ground_truth_y: Some(truth.y),
            ground_truth_theta: Some(truth.theta),
        });
    }
    debug!(
        "Simulated {} steps ending at {}",
        records.len(),
        truth
    );
    records
}

fn scalar(field: &Option<crate::messages::Scalar>) -> Option<f64> {
    field.as_ref().and_then(|s| s.value().ok())
}

/// Noisy body-frame observations of the landmarks in range of `pose`
fn observe(
    map: &LandmarkMap,
    pose: &Pose,
    sensor_range: f64,
    std: &[f64; 2],
    sampler: &mut Sampler,
) -> Vec<Observation> {
    let to_body = pose.rotation().inverse();
    map.within_range(pose.x, pose.y, sensor_range)
        .iter()
        .map(|landmark| {
            let relative = nalgebra::Vector2::new(landmark.x - pose.x, landmark.y - pose.y);
            let body = to_body * relative;
            Observation::new(
                sampler.gaussian(body[0], std[0]),
                sampler.gaussian(body[1], std[1]),
            )
        })
        .collect()
}

/// Filter output for one telemetry message
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EstimateRecord {
    pub step: usize,
    pub x: f64,
    pub y: f64,
    pub theta: f64,
    pub effective_sample_size: f64,
    pub associations: String,
    pub sense_x: String,
    pub sense_y: String,
    pub error_x: Option<f64>,
    pub error_y: Option<f64>,
    /// Heading error wrapped to $[-\pi, \pi]$
    pub error_theta: Option<f64>,
}
impl EstimateRecord {
    pub fn position_error(&self) -> Option<f64> {
        Some(self.error_x?.hypot(self.error_y?))
    }
    pub fn to_csv<P: AsRef<Path>>(records: &[Self], path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Run `session` over recorded telemetry, one filter cycle per record.
pub fn replay(
    session: &mut LocalizationSession,
    records: &[TelemetryRecord],
) -> Result<Vec<EstimateRecord>> {
    info!(
        "Replaying {} telemetry records against {} landmarks",
        records.len(),
        session.map().len()
    );
    let mut estimates = Vec::with_capacity(records.len());
    for record in records {
        let report = session
            .process(&record.to_telemetry())
            .with_context(|| format!("failed to process telemetry step {}", record.step))?;
        let (pose, _) = session
            .filter()
            .estimate()
            .unwrap_or((report.pose(), nalgebra::Matrix3::zeros()));
        let truth = record.ground_truth();
        let estimate = EstimateRecord {
            step: record.step,
            x: pose.x,
            y: pose.y,
            theta: pose.theta,
            effective_sample_size: session.filter().effective_sample_size(),
            associations: report.best_particle_associations,
            sense_x: report.best_particle_sense_x,
            sense_y: report.best_particle_sense_y,
            error_x: truth.map(|t| pose.x - t.x),
            error_y: truth.map(|t| pose.y - t.y),
            error_theta: truth.map(|t| wrap_to_pi(pose.theta - t.theta)),
        };
        debug!(
            "Step {}: estimate {} error {:?}",
            record.step,
            pose,
            estimate.position_error()
        );
        estimates.push(estimate);
    }
    Ok(estimates)
}

/// Root mean square errors over the records that carry ground truth
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub steps: usize,
    pub rmse_x: f64,
    pub rmse_y: f64,
    pub rmse_position: f64,
    pub rmse_theta: f64,
    pub max_position_error: f64,
}

/// Summarize estimation errors; `None` when no record carries ground truth.
pub fn summarize(records: &[EstimateRecord]) -> Option<ErrorSummary> {
    let errors: Vec<(f64, f64, f64)> = records
        .iter()
        .filter_map(|r| Some((r.error_x?, r.error_y?, r.error_theta?)))
        .collect();
    if errors.is_empty() {
        return None;
    }
    let n = errors.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_theta = 0.0;
    let mut max_position_error: f64 = 0.0;
    for (dx, dy, dtheta) in &errors {
        sum_x += dx * dx;
        sum_y += dy * dy;
        sum_theta += dtheta * dtheta;
        max_position_error = max_position_error.max(dx.hypot(*dy));
    }
    Some(ErrorSummary {
        steps: errors.len(),
        rmse_x: (sum_x / n).sqrt(),
        rmse_y: (sum_y / n).sqrt(),
        rmse_position: ((sum_x + sum_y) / n).sqrt(),
        rmse_theta: (sum_theta / n).sqrt(),
        max_position_error,
    })
}
