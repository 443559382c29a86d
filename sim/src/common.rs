//! Shared helpers for the command line tool: logger setup, path handling and prompts.

use std::error::Error;
use std::io;
use std::path::{Path, PathBuf};

/// Initialize the logger.
///
/// `log_level` is one of off, error, warn, info, debug, trace; anything else falls back to info.
/// Lines go to stderr unless `log_file` is given, in which case they are appended to that file
/// (parent directories are created as needed).
pub fn init_logger(log_level: &str, log_file: Option<&Path>) -> Result<(), Box<dyn Error>> {
    use std::io::Write;

    let level = log_level.parse::<log::LevelFilter>().unwrap_or_else(|_| {
        eprintln!("Invalid log level '{}', defaulting to 'info'", log_level);
        log::LevelFilter::Info
    });

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);
    builder.format(|buf, record| {
        writeln!(
            buf,
            "{} [{}] - {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });

    if let Some(log_path) = log_file {
        if let Some(parent) = log_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let target = Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?,
        );
        builder.target(env_logger::Target::Pipe(target));
    }

    builder.try_init()?;
    Ok(())
}

/// Check that `path` exists and is a regular file.
pub fn validate_file(path: &Path, what: &str) -> Result<(), Box<dyn Error>> {
    if !path.is_file() {
        return Err(format!("{} '{}' does not exist or is not a file.", what, path.display()).into());
    }
    Ok(())
}

/// Telemetry CSV files to replay: the file itself, or every `.csv` in a directory, sorted.
pub fn get_csv_files(input: &Path) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    if input.is_file() {
        if input.extension().and_then(|s| s.to_str()) != Some("csv") {
            return Err(format!("Input file '{}' is not a CSV file.", input.display()).into());
        }
        Ok(vec![input.to_path_buf()])
    } else if input.is_dir() {
        let mut csv_files: Vec<PathBuf> = std::fs::read_dir(input)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("csv")
            })
            .collect();
        if csv_files.is_empty() {
            return Err(format!("No CSV files found in directory '{}'.", input.display()).into());
        }
        csv_files.sort();
        Ok(csv_files)
    } else {
        Err(format!("Input path '{}' does not exist.", input.display()).into())
    }
}

/// Create the output directory if it does not exist yet.
pub fn validate_output_path(output: &Path) -> Result<(), Box<dyn Error>> {
    if !output.exists() {
        std::fs::create_dir_all(output)?;
    }
    Ok(())
}

/// Where the estimates for `input_file` are written: `{output}/{input_stem}_estimates.csv`
pub fn estimates_path(input_file: &Path, output: &Path) -> Result<PathBuf, Box<dyn Error>> {
    let stem = input_file
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Input file path '{}' has no filename", input_file.display()),
            )
        })?;
    Ok(output.join(format!("{}_estimates.csv", stem)))
}

/// Read a trimmed line from stdin. Empty input yields `None`; `q` exits the process.
pub fn read_user_input() -> Option<String> {
    let mut input = String::new();
    if io::stdin().read_line(&mut input).is_err() {
        return None;
    }
    let input = input.trim();

    if input.eq_ignore_ascii_case("q") {
        std::process::exit(0);
    }

    if input.is_empty() {
        None
    } else {
        Some(input.to_string())
    }
}

/// Prompt until a configuration file name is entered.
pub fn prompt_config_name() -> String {
    loop {
        println!(
            "Please name your configuration file with extension (.toml, .json, .yaml) or 'q' to quit:"
        );
        if let Some(input) = read_user_input() {
            return input;
        }
        println!("Error: Configuration path cannot be empty. Please try again.\n");
    }
}

/// Prompt for a number in `[min_val, max_val]`, returning `default` on empty input.
pub fn prompt_f64_with_default(prompt_text: &str, default: f64, min_val: f64, max_val: f64) -> f64 {
    loop {
        println!(
            "{} (press Enter for {}, or 'q' to quit):",
            prompt_text, default
        );
        match read_user_input() {
            None => return default,
            Some(input) => match parse_in_range(&input, min_val, max_val) {
                Ok(val) => return val,
                Err(msg) => println!("Error: {}\n", msg),
            },
        }
    }
}

/// Prompt for a count in `[min_val, max_val]`, returning `default` on empty input.
pub fn prompt_usize_with_default(
    prompt_text: &str,
    default: usize,
    min_val: usize,
    max_val: usize,
) -> usize {
    loop {
        println!(
            "{} (press Enter for {}, or 'q' to quit):",
            prompt_text, default
        );
        match read_user_input() {
            None => return default,
            Some(input) => match parse_in_range(&input, min_val, max_val) {
                Ok(val) => return val,
                Err(msg) => println!("Error: {}\n", msg),
            },
        }
    }
}

fn parse_in_range<T>(input: &str, min_val: T, max_val: T) -> Result<T, String>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
{
    match input.parse::<T>() {
        Ok(val) if val >= min_val && val <= max_val => Ok(val),
        Ok(_) => Err(format!("Value must be between {} and {}.", min_val, max_val)),
        Err(_) => Err("Please enter a valid number.".to_string()),
    }
}
