//! Frequency calibration and Doppler velocity conversion.
//!
//! Calibration only ever changes the labels on the frequency axis, never the samples.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{exfil::write_atomic, f_engine::Spectrum, HI_REST_FREQ_MHZ, SPEED_OF_LIGHT_KM_S};

/// Half-width of the search window around the rest frequency (MHz)
pub const AUTO_CAL_WINDOW_MHZ: f64 = 2.0;

/// Receiver frequency correction, persisted between runs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationState {
    pub ppm_offset: f64,
    pub khz_offset: f64,
    pub enabled: bool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            ppm_offset: 0.0,
            khz_offset: 0.0,
            enabled: true,
        }
    }
}

impl CalibrationState {
    /// `base * (1 + ppm/1e6) + khz/1000` when enabled
    pub fn effective_frequency(&self, base_mhz: f64) -> f64 {
        if self.enabled {
            base_mhz * (1.0 + self.ppm_offset / 1e6) + self.khz_offset / 1000.0
        } else {
            base_mhz
        }
    }

    pub fn calibrate_axis(&self, freqs_mhz: &[f64]) -> Vec<f64> {
        freqs_mhz
            .iter()
            .map(|&f| self.effective_frequency(f))
            .collect()
    }

    /// Adopt the kHz correction from an auto-calibration run.
    ///
    /// The measurement is taken on the raw axis, so the correction is the whole offset the
    /// peak needs. Any part of it already covered by the ppm term is subtracted out.
    pub fn apply_auto(&mut self, result: &AutoCalibration) {
        let ppm_shift_khz = result.peak_freq_mhz * self.ppm_offset / 1e6 * 1000.0;
        self.khz_offset = result.correction_khz - ppm_shift_khz;
        self.enabled = true;
    }

    /// Load a calibration record, falling back to the default if the file doesn't exist
    pub fn load(path: &Path) -> crate::Result<Self> {
        match fs::read(path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the calibration record at `path`
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &bytes)?;
        info!(
            ppm = self.ppm_offset,
            khz = self.khz_offset,
            "Saved calibration to {}",
            path.display()
        );
        Ok(())
    }
}

/// Radial velocity (km/s) of a frequency relative to the HI rest frequency.
/// Positive is recession (redshift), negative is approach.
pub fn freq_to_velocity(freq_mhz: f64) -> f64 {
    SPEED_OF_LIGHT_KM_S * (HI_REST_FREQ_MHZ - freq_mhz) / HI_REST_FREQ_MHZ
}

pub fn velocity_to_freq(velocity_km_s: f64) -> f64 {
    HI_REST_FREQ_MHZ * (1.0 - velocity_km_s / SPEED_OF_LIGHT_KM_S)
}

pub fn velocity_axis(freqs_mhz: &[f64]) -> Vec<f64> {
    freqs_mhz.iter().map(|&f| freq_to_velocity(f)).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CalibrationError {
    #[error("no spectrum has been captured yet")]
    InsufficientData,
    #[error("no spectral bins within ±2 MHz of the rest frequency")]
    NoPeakInWindow,
}

/// What auto-calibration measured
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoCalibration {
    pub peak_freq_mhz: f64,
    pub peak_power_db: f64,
    pub baseline_db: f64,
    /// Peak minus baseline
    pub snr_db: f64,
    /// How far the observed peak sits from the rest frequency (kHz)
    pub error_khz: f64,
    /// The kHz offset that cancels `error_khz`
    pub correction_khz: f64,
}

/// The caller decides what to do with a weak result; it is never applied implicitly
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationOutcome {
    Confident(AutoCalibration),
    Weak(AutoCalibration),
}

impl CalibrationOutcome {
    pub fn result(&self) -> &AutoCalibration {
        match self {
            CalibrationOutcome::Confident(r) | CalibrationOutcome::Weak(r) => r,
        }
    }

    pub fn is_weak(&self) -> bool {
        matches!(self, CalibrationOutcome::Weak(_))
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Locate the HI peak in the last raw (uncalibrated) spectrum and work out the kHz
/// correction that would move it onto the rest frequency
pub fn auto_calibrate(
    last_raw: Option<&Spectrum>,
    weak_threshold_db: f64,
) -> Result<CalibrationOutcome, CalibrationError> {
    let spectrum = last_raw.ok_or(CalibrationError::InsufficientData)?;
    let (mut window_power, window_freqs): (Vec<f64>, Vec<f64>) = spectrum
        .frequencies
        .iter()
        .zip(&spectrum.power_db)
        .filter(|(f, _)| (**f - HI_REST_FREQ_MHZ).abs() <= AUTO_CAL_WINDOW_MHZ)
        .map(|(f, p)| (*p, *f))
        .unzip();
    let (peak_idx, peak_power_db) = window_power
        .iter()
        .copied()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .ok_or(CalibrationError::NoPeakInWindow)?;
    let peak_freq_mhz = window_freqs[peak_idx];
    let baseline_db = median(&mut window_power);
    let snr_db = peak_power_db - baseline_db;
    let error_khz = (peak_freq_mhz - HI_REST_FREQ_MHZ) * 1000.0;
    let result = AutoCalibration {
        peak_freq_mhz,
        peak_power_db,
        baseline_db,
        snr_db,
        error_khz,
        correction_khz: -error_khz,
    };
    if snr_db >= weak_threshold_db {
        Ok(CalibrationOutcome::Confident(result))
    } else {
        Ok(CalibrationOutcome::Weak(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spectrum_with_peak(peak_at: f64, peak_db: f64) -> Spectrum {
        // 1 kHz grid across ±3 MHz of the rest frequency, flat -100 dB
        let frequencies: Vec<f64> = (-3000..=3000)
            .map(|k| HI_REST_FREQ_MHZ + k as f64 * 1e-3)
            .collect();
        let power_db = frequencies
            .iter()
            .map(|f| {
                if (f - peak_at).abs() < 1e-7 {
                    peak_db
                } else {
                    -100.0
                }
            })
            .collect();
        Spectrum {
            frequencies,
            power_db,
        }
    }

    #[test]
    fn test_disabled_is_identity() {
        let cal = CalibrationState {
            ppm_offset: 5.0,
            khz_offset: 3.0,
            enabled: false,
        };
        assert_eq!(cal.effective_frequency(1420.0), 1420.0);
    }

    #[test]
    fn test_ppm_offset() {
        let cal = CalibrationState {
            ppm_offset: 1.0,
            khz_offset: 0.0,
            enabled: true,
        };
        assert!((cal.effective_frequency(1420.0) - 1420.00142).abs() < 1e-9);
    }

    #[test]
    fn test_khz_offset_axis() {
        let cal = CalibrationState {
            ppm_offset: 0.0,
            khz_offset: -2.5,
            enabled: true,
        };
        let axis = cal.calibrate_axis(&[1420.0, 1421.0]);
        assert!((axis[0] - 1419.9975).abs() < 1e-9);
        assert!((axis[1] - 1420.9975).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_sign_convention() {
        assert_eq!(freq_to_velocity(HI_REST_FREQ_MHZ), 0.0);
        assert!(freq_to_velocity(HI_REST_FREQ_MHZ + 0.1) < 0.0);
        assert!(freq_to_velocity(HI_REST_FREQ_MHZ - 0.1) > 0.0);
        // 1 MHz below rest is ~211 km/s of recession
        assert!((freq_to_velocity(HI_REST_FREQ_MHZ - 1.0) - 211.06).abs() < 0.01);
    }

    #[test]
    fn test_velocity_round_trip() {
        for k in -50..=50 {
            let f = HI_REST_FREQ_MHZ + k as f64 * 0.0731;
            assert!((velocity_to_freq(freq_to_velocity(f)) - f).abs() < 1e-9);
        }
    }

    #[test]
    fn test_auto_calibrate_corrects_positive_error() {
        let s = spectrum_with_peak(HI_REST_FREQ_MHZ + 0.001, -90.0);
        let outcome = auto_calibrate(Some(&s), 3.0).unwrap();
        assert!(!outcome.is_weak());
        let r = outcome.result();
        assert!((r.baseline_db + 100.0).abs() < 1e-12);
        assert!((r.snr_db - 10.0).abs() < 1e-12);
        assert!((r.error_khz - 1.0).abs() < 1e-6);
        assert!((r.correction_khz + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_auto_calibrate_weak_peak() {
        let s = spectrum_with_peak(HI_REST_FREQ_MHZ - 0.010, -98.0);
        let outcome = auto_calibrate(Some(&s), 3.0).unwrap();
        assert!(outcome.is_weak());
        assert!((outcome.result().correction_khz - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_auto_calibrate_ignores_out_of_window() {
        // A much stronger peak 2.5 MHz away must not be picked
        let mut s = spectrum_with_peak(HI_REST_FREQ_MHZ + 0.002, -80.0);
        let far = s
            .frequencies
            .iter()
            .position(|f| (f - (HI_REST_FREQ_MHZ + 2.5)).abs() < 1e-7)
            .unwrap();
        s.power_db[far] = 0.0;
        let r = *auto_calibrate(Some(&s), 3.0).unwrap().result();
        assert!((r.error_khz - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_auto_calibrate_failures() {
        assert_eq!(
            auto_calibrate(None, 3.0),
            Err(CalibrationError::InsufficientData)
        );
        let s = Spectrum {
            frequencies: vec![1400.0, 1401.0],
            power_db: vec![-50.0, -40.0],
        };
        assert_eq!(
            auto_calibrate(Some(&s), 3.0),
            Err(CalibrationError::NoPeakInWindow)
        );
    }

    #[test]
    fn test_apply_auto_moves_peak_to_rest() {
        let s = spectrum_with_peak(HI_REST_FREQ_MHZ + 0.004, -80.0);
        let outcome = auto_calibrate(Some(&s), 3.0).unwrap();
        let mut cal = CalibrationState {
            ppm_offset: 0.7,
            khz_offset: 12.0,
            enabled: false,
        };
        cal.apply_auto(outcome.result());
        assert!(cal.enabled);
        let moved = cal.effective_frequency(outcome.result().peak_freq_mhz);
        assert!((moved - HI_REST_FREQ_MHZ).abs() < 1e-9);
    }

    #[test]
    fn test_median_even_and_odd() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        assert_eq!(
            CalibrationState::load(&path).unwrap(),
            CalibrationState::default()
        );
        let cal = CalibrationState {
            ppm_offset: -0.4,
            khz_offset: 1.25,
            enabled: true,
        };
        cal.save(&path).unwrap();
        assert_eq!(CalibrationState::load(&path).unwrap(), cal);
    }
}
