//! Argument parsing for running from the command line

use std::path::PathBuf;

use clap::Parser;

use crate::{exfil::ExportFormat, window::WindowKind};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// JSON configuration file (missing fields take their defaults)
    #[clap(short, long)]
    pub config: Option<PathBuf>,
    /// Calibration record, read at startup and rewritten by --auto-calibrate
    #[clap(long, default_value = "calibration.json")]
    pub calibration: PathBuf,
    /// Number of spectra to integrate, overriding the config
    #[clap(short, long)]
    #[clap(value_parser = clap::value_parser!(u64).range(1..))]
    pub integrate: Option<u64>,
    /// Directory integrated spectra are written to
    #[clap(short, long, default_value = "data")]
    pub output: PathBuf,
    /// Output format for integrated spectra (json or csv)
    #[clap(short, long, default_value = "json", value_parser = parse_format)]
    pub format: ExportFormat,
    /// Window function (rectangular, hann, hamming, blackman, flat-top)
    #[clap(short, long, value_parser = parse_window)]
    pub window: Option<WindowKind>,
    /// FFT length, must be a power of two
    #[clap(long, value_parser = parse_fft_size)]
    pub fft_size: Option<usize>,
    /// Stop after this many seconds even if the integration is not complete
    #[clap(short, long)]
    pub duration: Option<f64>,
    /// Measure the HI peak at the end of the run and store the correction
    #[clap(long)]
    pub auto_calibrate: bool,
    /// Doppler offset of the simulated hydrogen line (kHz)
    #[clap(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pub line_offset_khz: f64,
    /// Also dump the last live spectrum as CSV
    #[clap(long)]
    pub save_spectrum: bool,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn parse_format(s: &str) -> Result<ExportFormat, String> {
    s.parse()
}

fn parse_window(s: &str) -> Result<WindowKind, String> {
    s.parse()
}

fn parse_fft_size(s: &str) -> Result<usize, String> {
    let n: usize = s.parse().map_err(|_| format!("`{s}` isn't a number"))?;
    if n >= 2 && n.is_power_of_two() {
        Ok(n)
    } else {
        Err(format!("{n} is not a power of two"))
    }
}
