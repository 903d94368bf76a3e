use rustfft::num_complex::Complex;

pub mod args;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod device;
pub mod error;
pub mod exfil;
pub mod f_engine;
pub mod integration;
pub mod monitoring;
pub mod pipeline;
pub mod ring;
pub mod sim;
pub mod window;

pub use error::{Error, Result};

/// Rest frequency of the neutral hydrogen hyperfine transition (MHz)
pub const HI_REST_FREQ_MHZ: f64 = 1420.40575177;
/// Speed of light (km/s)
pub const SPEED_OF_LIGHT_KM_S: f64 = 299_792.458;
/// Full scale of the signed 14-bit ADC, used to normalize raw samples to [-1, 1]
pub const ADC_FULL_SCALE: f32 = 8192.0;
/// Peak magnitude above which a packet counts as ADC saturation
pub const DEFAULT_OVERLOAD_THRESHOLD: u16 = 8000;
/// Default ring buffer capacity (samples per channel)
pub const DEFAULT_RING_CAPACITY: usize = 1_000_000;
/// Floor added before taking logs of magnitudes
pub const POWER_EPSILON: f64 = 1e-10;
/// Minimum peak-over-baseline (dB) for auto-calibration to be trusted
pub const DEFAULT_WEAK_PEAK_DB: f64 = 3.0;

/// A normalized I/Q sample as stored in the ring buffer
pub type ComplexSample = Complex<f32>;

/// Convert a raw ADC pair into a normalized complex sample
pub fn normalize(i: i16, q: i16) -> ComplexSample {
    Complex::new(i as f32 / ADC_FULL_SCALE, q as f32 / ADC_FULL_SCALE)
}

/// Convert a power in dB (10log10 convention) to the linear domain
pub fn db_to_linear(db: f64) -> f64 {
    10f64.powf(db / 10.0)
}

/// Convert a linear power to dB, flooring at [`POWER_EPSILON`]
pub fn linear_to_db(lin: f64) -> f64 {
    10.0 * lin.max(POWER_EPSILON).log10()
}
