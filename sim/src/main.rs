//! PF SIM: replay and simulation tool for the landmark particle filter.
//!
//! The tool has three subcommands:
//!
//! - `run`: replay recorded telemetry (a CSV file or a directory of them) through the filter
//!   against a landmark map and write one estimates CSV per input.
//! - `simulate`: generate a synthetic drive through a landmark map as telemetry CSV, including
//!   ground truth columns.
//! - `config`: write a session configuration file (TOML/JSON/YAML).
//!
//! Session parameters come from `--config` when given, otherwise from the defaults, and are then
//! overridden by any explicit command line flags.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{
    estimates_path, get_csv_files, init_logger, prompt_config_name, prompt_f64_with_default,
    prompt_usize_with_default, validate_file, validate_output_path,
};
use landmark_pf::LandmarkMap;
use landmark_pf::messages::LocalizationSession;
use landmark_pf::particle::ParticleAveragingStrategy;
use landmark_pf::sim::{
    DriveProfile, EstimateRecord, SessionConfig, TelemetryRecord, replay, simulate_drive,
    summarize,
};
use log::{error, info, warn};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const LONG_ABOUT: &str = "PF SIM: replay and simulation tool for the landmark particle filter.

The filter estimates the planar pose (x, y, heading) of a vehicle from a noisy initial GPS fix,
the previous control input (velocity, yaw rate) and body-frame observations of known landmarks.

- run:      replay telemetry CSV files against a landmark map and write the estimates.
- simulate: generate a synthetic telemetry CSV, with ground truth, from a landmark map.
- config:   write a session configuration file (TOML/JSON/YAML).";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Replay and simulation tool for the landmark particle filter.", long_about = LONG_ABOUT)]
struct Cli {
    /// Session configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Replay multiple telemetry files in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Replay telemetry through the particle filter",
        long_about = "Replay telemetry through the particle filter. The first row of each file initializes the filter from its pose reading, every later row predicts with its previous control input. Each row is then weighted against the landmark map and resampled. One estimates CSV is written per input file."
    )]
    Run(RunArgs),
    #[command(
        name = "simulate",
        about = "Generate a synthetic telemetry CSV",
        long_about = "Generate a synthetic drive through a landmark map. The vehicle follows a constant velocity and yaw rate; landmarks within sensor range are observed in the vehicle frame with Gaussian noise. Ground truth is included so replays can report errors."
    )]
    Simulate(SimulateArgs),
    #[command(name = "config", about = "Write a session configuration file")]
    CreateConfig(CreateConfigArgs),
}

/// Filter overrides shared by commands that run the filter
#[derive(Args, Clone, Debug, Default)]
struct FilterOverrides {
    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,
    /// Random seed for the filter
    #[arg(long)]
    seed: Option<u64>,
    /// Point estimate reported per step
    #[arg(long, value_enum)]
    strategy: Option<ParticleAveragingStrategy>,
    /// Sensor range in meters
    #[arg(long)]
    sensor_range: Option<f64>,
    /// Weighting worker threads (0 uses the global pool)
    #[arg(long)]
    threads: Option<usize>,
}
impl FilterOverrides {
    fn apply(&self, config: &mut SessionConfig) {
        if let Some(n) = self.particles {
            config.filter.num_particles = n;
        }
        if let Some(seed) = self.seed {
            config.filter.seed = Some(seed);
        }
        if let Some(strategy) = self.strategy {
            config.filter.averaging_strategy = strategy;
        }
        if let Some(range) = self.sensor_range {
            config.sensor_range = range;
        }
        if let Some(threads) = self.threads {
            config.filter.worker_threads = Some(threads);
        }
    }
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    /// Landmark map file (`x y id` per line)
    #[arg(short, long, value_parser)]
    map: PathBuf,
    /// Telemetry CSV file or directory of CSV files
    #[arg(short, long, value_parser)]
    input: PathBuf,
    /// Output directory for the estimates
    #[arg(short, long, value_parser)]
    output: PathBuf,
    #[command(flatten)]
    overrides: FilterOverrides,
}

#[derive(Args, Clone, Debug)]
struct SimulateArgs {
    /// Landmark map file (`x y id` per line)
    #[arg(short, long, value_parser)]
    map: PathBuf,
    /// Output telemetry CSV file
    #[arg(short, long, value_parser)]
    output: PathBuf,
    /// Number of telemetry messages
    #[arg(long, default_value_t = 200)]
    steps: usize,
    /// Forward velocity (m/s)
    #[arg(long, default_value_t = 10.0)]
    velocity: f64,
    /// Yaw rate (rad/s)
    #[arg(long, default_value_t = 0.02, allow_hyphen_values = true)]
    yaw_rate: f64,
    /// Starting x position (m)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_x: f64,
    /// Starting y position (m)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_y: f64,
    /// Starting heading (rad)
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    start_theta: f64,
    /// Random seed for the synthetic noise
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Args, Clone, Debug)]
struct CreateConfigArgs {
    /// Output path; prompts interactively when omitted
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Replay one telemetry file and write its estimates.
fn process_file(
    input_file: &Path,
    output: &Path,
    map: &LandmarkMap,
    config: &SessionConfig,
) -> Result<(), Box<dyn Error>> {
    info!("Processing file: {}", input_file.display());
    let records = TelemetryRecord::from_csv(input_file)?;
    info!(
        "Read {} records from {}",
        records.len(),
        input_file.display()
    );

    let mut session = LocalizationSession::new(config, map.clone())?;
    let estimates = replay(&mut session, &records)?;

    let output_file = estimates_path(input_file, output)?;
    EstimateRecord::to_csv(&estimates, &output_file)?;
    info!("Results written to {}", output_file.display());

    match summarize(&estimates) {
        Some(summary) => info!(
            "{}: position RMSE {:.3} m (x {:.3}, y {:.3}), heading RMSE {:.4} rad, max error {:.3} m over {} steps",
            input_file.display(),
            summary.rmse_position,
            summary.rmse_x,
            summary.rmse_y,
            summary.rmse_theta,
            summary.max_position_error,
            summary.steps
        ),
        None => info!(
            "{}: no ground truth, error summary skipped",
            input_file.display()
        ),
    }
    Ok(())
}

fn run_filter(args: &RunArgs, mut config: SessionConfig, parallel: bool) -> Result<(), Box<dyn Error>> {
    args.overrides.apply(&mut config);
    config.validate()?;
    validate_file(&args.map, "Map file")?;
    validate_output_path(&args.output)?;

    let map = LandmarkMap::from_file(&args.map)?;
    info!("Loaded {} landmarks from {}", map.len(), args.map.display());
    if map.is_empty() {
        warn!("Landmark map is empty; every observation will be unassociated");
    }

    let csv_files = get_csv_files(&args.input)?;
    let is_multiple = csv_files.len() > 1;
    if is_multiple {
        info!("Processing {} CSV files from directory", csv_files.len());
    }

    if parallel && is_multiple {
        info!("Running in parallel mode");
        let errors = Mutex::new(Vec::new());
        csv_files.par_iter().for_each(|input_file| {
            if let Err(e) = process_file(input_file, &args.output, &map, &config) {
                error!("Error processing {}: {}", input_file.display(), e);
                if let Ok(mut errors) = errors.lock() {
                    errors.push((input_file.clone(), e.to_string()));
                }
            }
        });
        let errors = errors.into_inner().unwrap_or_default();
        if !errors.is_empty() {
            for (file, err) in &errors {
                error!("  {}: {}", file.display(), err);
            }
            return Err(format!("{} file(s) failed to process", errors.len()).into());
        }
    } else {
        let mut failures = 0usize;
        for input_file in &csv_files {
            if let Err(e) = process_file(input_file, &args.output, &map, &config) {
                if !is_multiple {
                    return Err(e);
                }
                failures += 1;
                error!("Error processing {}: {}", input_file.display(), e);
            }
        }
        if failures > 0 {
            return Err(format!("{} file(s) failed to process", failures).into());
        }
    }
    Ok(())
}

fn run_simulation(args: &SimulateArgs, config: &SessionConfig) -> Result<(), Box<dyn Error>> {
    config.validate()?;
    validate_file(&args.map, "Map file")?;
    let map = LandmarkMap::from_file(&args.map)?;
    let profile = DriveProfile {
        steps: args.steps,
        start: landmark_pf::Pose::new(args.start_x, args.start_y, args.start_theta),
        velocity: args.velocity,
        yaw_rate: args.yaw_rate,
        gps_std: config.sigma_pos,
        observation_std: config.sigma_landmark,
        seed: args.seed,
    };
    let records = simulate_drive(&map, &profile, config.delta_t, config.sensor_range);
    if let Some(parent) = args.output.parent()
        && !parent.as_os_str().is_empty()
    {
        validate_output_path(parent)?;
    }
    TelemetryRecord::to_csv(&records, &args.output)?;
    info!(
        "Wrote {} telemetry records to {}",
        records.len(),
        args.output.display()
    );
    Ok(())
}

fn create_config_file(args: &CreateConfigArgs) -> Result<(), Box<dyn Error>> {
    let (path, config) = match &args.output {
        Some(path) => (path.clone(), SessionConfig::default()),
        None => {
            println!("\n=== Particle Filter Configuration Wizard ===\n");
            let path = PathBuf::from(prompt_config_name());
            let defaults = SessionConfig::default();
            let mut config = defaults.clone();
            config.delta_t =
                prompt_f64_with_default("Time between messages (s)", defaults.delta_t, 1e-3, 10.0);
            config.sensor_range =
                prompt_f64_with_default("Sensor range (m)", defaults.sensor_range, 0.0, 1e4);
            config.filter.num_particles = prompt_usize_with_default(
                "Number of particles",
                defaults.filter.num_particles,
                1,
                1_000_000,
            );
            (path, config)
        }
    };
    config.to_file(&path)?;
    println!("Configuration written to {}", path.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => SessionConfig::from_file(path)?,
        None => SessionConfig::default(),
    };

    // CLI flags take precedence over the configuration file
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let config_log_file = config.logging.file.as_ref().map(PathBuf::from);
    let log_file = cli.log_file.as_ref().or(config_log_file.as_ref());
    init_logger(&log_level, log_file.map(|p| p.as_path()))?;

    if let Some(path) = &cli.config {
        info!("Loaded configuration from {}", path.display());
    }

    match cli.command {
        Some(Command::Run(args)) => run_filter(&args, config, cli.parallel),
        Some(Command::Simulate(args)) => run_simulation(&args, &config),
        Some(Command::CreateConfig(args)) => create_config_file(&args),
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}
