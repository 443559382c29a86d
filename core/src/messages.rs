//! Telemetry protocol between a driving simulator and the filter
//!
//! Each inbound telemetry message carries either a noisy initial pose reading (first message) or
//! the previous control input (every later message), plus the body-frame landmark observations as
//! two whitespace-separated number lists. The filter answers every telemetry message with a
//! [BestParticleReport].
//!
//! Messages travel inside Socket.IO style text frames, `42["telemetry",{...}]` inbound and
//! `42["best_particle",{...}]` outbound. A frame whose payload is `null` asks for manual driving
//! and is answered with [MANUAL_FRAME].
//!
//! Scalar fields are accepted either as JSON numbers or as numeric strings, the latter being what
//! the simulator sends.
use crate::filter::ParticleFilter;
use crate::map::LandmarkMap;
use crate::measurements::Observation;
use crate::particle::Particle;
use crate::sim::SessionConfig;
use crate::{ControlInput, Pose};

use anyhow::{Context, Result, bail};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use std::fmt::{self, Display};

/// Reply sent when the simulator asks for manual driving
pub const MANUAL_FRAME: &str = r#"42["manual",{}]"#;
/// Socket.IO prefix of an event message
const EVENT_PREFIX: &str = "42";

/// Parse a whitespace-separated list of numbers. An empty or blank string yields an empty list.
pub fn parse_number_list(text: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .enumerate()
        .map(|(i, token)| {
            token
                .parse::<f64>()
                .with_context(|| format!("invalid number '{}' at position {}", token, i))
        })
        .collect()
}

/// Zip the x and y lists into body-frame observations.
pub fn parse_observations(xs: &str, ys: &str) -> Result<Vec<Observation>> {
    let xs = parse_number_list(xs).context("could not parse observation x values")?;
    let ys = parse_number_list(ys).context("could not parse observation y values")?;
    if xs.len() != ys.len() {
        bail!(
            "observation lists differ in length: {} x values, {} y values",
            xs.len(),
            ys.len()
        );
    }
    Ok(xs
        .into_iter()
        .zip(ys)
        .map(|(x, y)| Observation::new(x, y))
        .collect())
}

/// A scalar that may arrive as a JSON number or as a numeric string
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(f64),
    Text(String),
}
impl Scalar {
    pub fn value(&self) -> Result<f64> {
        match self {
            Scalar::Number(n) => Ok(*n),
            Scalar::Text(s) => s
                .trim()
                .parse()
                .with_context(|| format!("invalid number '{}'", s)),
        }
    }
}
impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Number(value)
    }
}

/// One inbound telemetry message
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    pub sense_x: Option<Scalar>,
    pub sense_y: Option<Scalar>,
    pub sense_theta: Option<Scalar>,
    pub previous_velocity: Option<Scalar>,
    pub previous_yawrate: Option<Scalar>,
    pub sense_observations_x: String,
    pub sense_observations_y: String,
}

/// What a telemetry message asks the filter to do before weighting
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TelemetryEvent {
    /// Seed the population around a pose reading
    Initialize { pose: Pose },
    /// Propagate the population with the previous control input
    Control { velocity: f64, yaw_rate: f64 },
}

fn required(field: &Option<Scalar>, name: &str) -> Result<f64> {
    match field {
        Some(scalar) => scalar
            .value()
            .with_context(|| format!("invalid telemetry field '{}'", name)),
        None => bail!("telemetry is missing field '{}'", name),
    }
}

impl Telemetry {
    /// Interpret the message for a filter that is (or is not yet) initialized.
    pub fn event(&self, initialized: bool) -> Result<TelemetryEvent> {
        if initialized {
            Ok(TelemetryEvent::Control {
                velocity: required(&self.previous_velocity, "previous_velocity")?,
                yaw_rate: required(&self.previous_yawrate, "previous_yawrate")?,
            })
        } else {
            Ok(TelemetryEvent::Initialize {
                pose: Pose::new(
                    required(&self.sense_x, "sense_x")?,
                    required(&self.sense_y, "sense_y")?,
                    required(&self.sense_theta, "sense_theta")?,
                ),
            })
        }
    }
    pub fn observations(&self) -> Result<Vec<Observation>> {
        parse_observations(&self.sense_observations_x, &self.sense_observations_y)
    }
    /// Build a message carrying a pose reading and observations.
    pub fn initial(pose: &Pose, observations: &[Observation]) -> Self {
        let (xs, ys) = observation_lists(observations);
        Telemetry {
            sense_x: Some(pose.x.into()),
            sense_y: Some(pose.y.into()),
            sense_theta: Some(pose.theta.into()),
            sense_observations_x: xs,
            sense_observations_y: ys,
            ..Default::default()
        }
    }
    /// Build a message carrying the previous control input and observations.
    pub fn control(control: &ControlInput, observations: &[Observation]) -> Self {
        let (xs, ys) = observation_lists(observations);
        Telemetry {
            previous_velocity: Some(control.velocity.into()),
            previous_yawrate: Some(control.yaw_rate.into()),
            sense_observations_x: xs,
            sense_observations_y: ys,
            ..Default::default()
        }
    }
}

fn observation_lists(observations: &[Observation]) -> (String, String) {
    let xs: Vec<f64> = observations.iter().map(|o| o.x).collect();
    let ys: Vec<f64> = observations.iter().map(|o| o.y).collect();
    (
        crate::particle::join_with_spaces(&xs),
        crate::particle::join_with_spaces(&ys),
    )
}

/// Outbound reply describing the best particle
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BestParticleReport {
    pub best_particle_x: f64,
    pub best_particle_y: f64,
    pub best_particle_theta: f64,
    pub best_particle_associations: String,
    pub best_particle_sense_x: String,
    pub best_particle_sense_y: String,
}
impl From<&Particle> for BestParticleReport {
    fn from(particle: &Particle) -> Self {
        BestParticleReport {
            best_particle_x: particle.pose.x,
            best_particle_y: particle.pose.y,
            best_particle_theta: particle.pose.theta,
            best_particle_associations: particle.get_associations(),
            best_particle_sense_x: particle.get_sense_x(),
            best_particle_sense_y: particle.get_sense_y(),
        }
    }
}
impl Display for BestParticleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BestParticle(x: {:.4}, y: {:.4}, theta: {:.4}, associations: [{}])",
            self.best_particle_x,
            self.best_particle_y,
            self.best_particle_theta,
            self.best_particle_associations
        )
    }
}
impl BestParticleReport {
    pub fn pose(&self) -> Pose {
        Pose::new(
            self.best_particle_x,
            self.best_particle_y,
            self.best_particle_theta,
        )
    }
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("could not serialize best particle report")
    }
    /// Wrap the report in an outbound `best_particle` event frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!(
            "{}[\"best_particle\",{}]",
            EVENT_PREFIX,
            self.to_json()?
        ))
    }
}

/// Decoded inbound frame
#[derive(Clone, Debug, PartialEq)]
pub enum InboundFrame {
    /// Not an event frame, or an event other than telemetry
    Ignored,
    /// The simulator has no data and is being driven manually
    Manual,
    Telemetry(Telemetry),
}

/// Decode a raw inbound text frame.
///
/// Frames that are not `42` events are ignored. An event whose payload contains `null` (or has
/// no JSON array at all) is a manual-driving request.
pub fn decode_frame(raw: &str) -> Result<InboundFrame> {
    if raw.len() <= EVENT_PREFIX.len() || !raw.starts_with(EVENT_PREFIX) {
        return Ok(InboundFrame::Ignored);
    }
    let payload = match (raw.find('['), raw.rfind("}]")) {
        _ if raw.contains("null") => return Ok(InboundFrame::Manual),
        (Some(start), Some(end)) if start < end => &raw[start..end + 2],
        _ => return Ok(InboundFrame::Manual),
    };
    let (event, data): (String, serde_json::Value) =
        serde_json::from_str(payload).context("malformed event payload")?;
    if event != "telemetry" {
        trace!("Ignoring '{}' event", event);
        return Ok(InboundFrame::Ignored);
    }
    let telemetry = serde_json::from_value(data).context("malformed telemetry message")?;
    Ok(InboundFrame::Telemetry(telemetry))
}

/// Drives one filter through the telemetry protocol.
///
/// The first telemetry message initializes the filter, every later one triggers a prediction with
/// the previous control input. Each message is then followed by weighting and resampling, and
/// answered with the best particle.
#[derive(Debug)]
pub struct LocalizationSession {
    filter: ParticleFilter,
    map: LandmarkMap,
    delta_t: f64,
    sensor_range: f64,
    sigma_pos: [f64; 3],
    sigma_landmark: [f64; 2],
    steps: usize,
    last_observations: Vec<Observation>,
}
impl LocalizationSession {
    /// Start a session over `map`.
    ///
    /// Fails when `config` does not pass [SessionConfig::validate].
    pub fn new(config: &SessionConfig, map: LandmarkMap) -> Result<Self> {
        config.validate().context("invalid session configuration")?;
        Ok(LocalizationSession {
            filter: ParticleFilter::new(config.filter.clone()),
            map,
            delta_t: config.delta_t,
            sensor_range: config.sensor_range,
            sigma_pos: config.sigma_pos,
            sigma_landmark: config.sigma_landmark,
            steps: 0,
            last_observations: Vec::new(),
        })
    }
    /// Run one full filter cycle for a telemetry message.
    ///
    /// Input is validated before the filter is touched, so a rejected message leaves the session
    /// unchanged.
    pub fn process(&mut self, telemetry: &Telemetry) -> Result<BestParticleReport> {
        let mut observations = telemetry.observations()?;
        match telemetry.event(self.filter.is_initialized())? {
            TelemetryEvent::Initialize { pose } => {
                self.filter
                    .init(pose.x, pose.y, pose.theta, &self.sigma_pos);
            }
            TelemetryEvent::Control { velocity, yaw_rate } => {
                self.filter
                    .prediction(self.delta_t, &self.sigma_pos, velocity, yaw_rate);
            }
        }
        self.filter.update_weights(
            self.sensor_range,
            &self.sigma_landmark,
            &mut observations,
            &self.map,
        );
        self.filter.resample();
        self.steps += 1;
        self.last_observations = observations;

        let best = self
            .filter
            .best_particle()
            .context("particle population is empty")?;
        let report = BestParticleReport::from(best);
        debug!("Step {}: {}", self.steps, report);
        Ok(report)
    }
    /// Handle a raw inbound frame, returning the frame to send back if any.
    pub fn process_frame(&mut self, raw: &str) -> Result<Option<String>> {
        match decode_frame(raw)? {
            InboundFrame::Ignored => Ok(None),
            InboundFrame::Manual => Ok(Some(MANUAL_FRAME.to_string())),
            InboundFrame::Telemetry(telemetry) => {
                let report = self.process(&telemetry)?;
                Ok(Some(report.to_frame()?))
            }
        }
    }
    pub fn filter(&self) -> &ParticleFilter {
        &self.filter
    }
    pub fn map(&self) -> &LandmarkMap {
        &self.map
    }
    /// Number of telemetry messages processed so far
    pub fn steps(&self) -> usize {
        self.steps
    }
    /// Observations from the last processed message, with their associations written back
    pub fn last_observations(&self) -> &[Observation] {
        &self.last_observations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterConfig;
    use crate::map::Landmark;
    use assert_approx_eq::assert_approx_eq;

    fn session() -> LocalizationSession {
        let config = SessionConfig {
            filter: FilterConfig {
                num_particles: 50,
                seed: Some(7),
                ..Default::default()
            },
            ..Default::default()
        };
        let map = LandmarkMap::new(vec![
            Landmark::new(1, 5.0, 5.0),
            Landmark::new(2, 10.0, -3.0),
        ]);
        LocalizationSession::new(&config, map).unwrap()
    }

    #[test]
    fn test_parse_number_list() {
        assert_eq!(
            parse_number_list(" 1.5\t-2  3e2 ").unwrap(),
            vec![1.5, -2.0, 300.0]
        );
        assert!(parse_number_list("").unwrap().is_empty());
        assert!(parse_number_list("   ").unwrap().is_empty());
        assert!(parse_number_list("1.0 abc").is_err());
    }
    #[test]
    fn test_parse_observations_length_mismatch() {
        let observations = parse_observations("1 2", "3 4").unwrap();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[1], Observation::new(2.0, 4.0));
        assert!(parse_observations("1 2 3", "3 4").is_err());
    }
    #[test]
    fn test_telemetry_event_from_strings() {
        let json = r#"{"sense_x":"6.3","sense_y":"1.9","sense_theta":"0.01",
            "sense_observations_x":"1 2","sense_observations_y":"3 4"}"#;
        let telemetry: Telemetry = serde_json::from_str(json).unwrap();
        match telemetry.event(false).unwrap() {
            TelemetryEvent::Initialize { pose } => {
                assert_approx_eq!(pose.x, 6.3, 1e-12);
                assert_approx_eq!(pose.theta, 0.01, 1e-12);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(telemetry.event(true).is_err());
    }
    #[test]
    fn test_telemetry_event_from_numbers() {
        let json = r#"{"previous_velocity":4.5,"previous_yawrate":-0.2,
            "sense_observations_x":"","sense_observations_y":""}"#;
        let telemetry: Telemetry = serde_json::from_str(json).unwrap();
        assert_eq!(
            telemetry.event(true).unwrap(),
            TelemetryEvent::Control {
                velocity: 4.5,
                yaw_rate: -0.2
            }
        );
        assert!(telemetry.observations().unwrap().is_empty());
    }
    #[test]
    fn test_telemetry_invalid_scalar() {
        let telemetry = Telemetry {
            previous_velocity: Some(Scalar::Text("fast".into())),
            previous_yawrate: Some(0.0.into()),
            ..Default::default()
        };
        assert!(telemetry.event(true).is_err());
    }
    #[test]
    fn test_report_json_field_names() {
        let mut particle = Particle::new(0, Pose::new(1.0, 2.0, 0.5), 1.0);
        particle.record_association(4, &nalgebra::Vector2::new(1.5, 2.5));
        let json = BestParticleReport::from(&particle).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["best_particle_x"], 1.0);
        assert_eq!(value["best_particle_theta"], 0.5);
        assert_eq!(value["best_particle_associations"], "4");
        assert_eq!(value["best_particle_sense_x"], "1.5");
        assert_eq!(value["best_particle_sense_y"], "2.5");
    }
    #[test]
    fn test_decode_frame() {
        assert_eq!(decode_frame("").unwrap(), InboundFrame::Ignored);
        assert_eq!(decode_frame("2").unwrap(), InboundFrame::Ignored);
        assert_eq!(decode_frame("40").unwrap(), InboundFrame::Ignored);
        assert_eq!(
            decode_frame(r#"42["telemetry",null]"#).unwrap(),
            InboundFrame::Manual
        );
        assert_eq!(
            decode_frame(r#"42["other",{"a":1}]"#).unwrap(),
            InboundFrame::Ignored
        );
        let frame = r#"42["telemetry",{"sense_x":"1","sense_y":"2","sense_theta":"0","sense_observations_x":"","sense_observations_y":""}]"#;
        match decode_frame(frame).unwrap() {
            InboundFrame::Telemetry(t) => assert_eq!(t.sense_x, Some(Scalar::Text("1".into()))),
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(decode_frame(r#"42["telemetry",{"sense_x":}]"#).is_err());
    }
    #[test]
    fn test_session_initializes_then_predicts() {
        let mut session = session();
        let first = Telemetry::initial(&Pose::new(0.0, 0.0, 0.0), &[Observation::new(5.0, 5.0)]);
        let report = session.process(&first).unwrap();
        assert!(session.filter().is_initialized());
        assert_eq!(session.steps(), 1);
        assert_eq!(report.best_particle_associations, "1");
        assert_eq!(session.last_observations()[0].id, 1);

        let next = Telemetry::control(
            &ControlInput::new(1.0, 0.0),
            &[Observation::new(4.9, 5.0), Observation::new(9.9, -3.0)],
        );
        let report = session.process(&next).unwrap();
        assert_eq!(session.steps(), 2);
        assert_eq!(report.best_particle_associations.split(' ').count(), 2);
        assert_eq!(session.filter().particles().len(), 50);
    }
    #[test]
    fn test_session_rejects_bad_input_without_side_effects() {
        let mut session = session();
        let mut bad = Telemetry::initial(&Pose::default(), &[]);
        bad.sense_observations_x = "1 2".into();
        bad.sense_observations_y = "1".into();
        assert!(session.process(&bad).is_err());
        assert!(!session.filter().is_initialized());
        assert_eq!(session.steps(), 0);
    }
    #[test]
    fn test_session_rejects_invalid_config() {
        let map = LandmarkMap::new(vec![Landmark::new(1, 5.0, 5.0)]);
        let mut config = SessionConfig::default();
        config.filter.num_particles = 0;
        assert!(LocalizationSession::new(&config, map.clone()).is_err());

        let config = SessionConfig {
            sigma_landmark: [0.0, 0.3],
            ..Default::default()
        };
        let err = LocalizationSession::new(&config, map).unwrap_err();
        assert!(format!("{err:#}").contains("sigma_landmark"), "{err:#}");
    }
    #[test]
    fn test_session_process_frame() {
        let mut session = session();
        assert_eq!(
            session.process_frame(r#"42["telemetry",null]"#).unwrap(),
            Some(MANUAL_FRAME.to_string())
        );
        let frame = r#"42["telemetry",{"sense_x":"0","sense_y":"0","sense_theta":"0","sense_observations_x":"5","sense_observations_y":"5"}]"#;
        let reply = session.process_frame(frame).unwrap().unwrap();
        assert!(reply.starts_with(r#"42["best_particle",{"#));
        assert!(reply.ends_with("}]"));
        assert!(reply.contains(r#""best_particle_associations":"1""#));
    }
}
