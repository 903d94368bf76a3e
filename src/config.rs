//! The immutable parameter set handed to every component at construction.
//!
//! Defaults describe the station this was built for: an RSP1A behind an external
//! LNA, tuned to the hydrogen line.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{
    calibration::CalibrationState, device::IfType, f_engine::DcNotch,
    integration::ObservationInfo, window::WindowKind, Error, DEFAULT_OVERLOAD_THRESHOLD,
    DEFAULT_RING_CAPACITY, DEFAULT_WEAK_PEAK_DB, HI_REST_FREQ_MHZ,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverParams {
    pub center_freq_mhz: f64,
    pub sample_rate_mhz: f64,
    /// IF bandwidth (kHz)
    pub bandwidth_khz: u32,
    pub if_type: IfType,
    /// IF gain reduction (dB, 20-59)
    pub gain_reduction_db: u8,
    /// 0-9, lower is more gain
    pub lna_state: u8,
    pub min_gain_reduction_db: u8,
    pub agc_enabled: bool,
    pub dc_offset_correction: bool,
    pub iq_imbalance_correction: bool,
    /// FM broadcast notch
    pub rf_notch: bool,
    /// DAB broadcast notch
    pub dab_notch: bool,
}

impl Default for ReceiverParams {
    fn default() -> Self {
        Self {
            center_freq_mhz: HI_REST_FREQ_MHZ,
            sample_rate_mhz: 6.0,
            bandwidth_khz: 6000,
            if_type: IfType::Zero,
            gain_reduction_db: 55,
            lna_state: 5,
            min_gain_reduction_db: 20,
            agc_enabled: false,
            dc_offset_correction: true,
            iq_imbalance_correction: true,
            rf_notch: false,
            dab_notch: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingParams {
    pub fft_size: usize,
    pub window: WindowKind,
    pub dc_notch_enabled: bool,
    pub dc_notch_width_khz: f64,
    pub integration_count: usize,
    /// Save the integration automatically when it completes
    pub integration_auto_save: bool,
    /// Pipeline cadence
    pub refresh_ms: u64,
    /// ADC peak magnitude counted as an overload
    pub overload_threshold: u16,
    /// Auto-calibration peaks weaker than this (dB over baseline) need confirmation
    pub weak_peak_db: f64,
    pub ring_capacity: usize,
}

impl Default for ProcessingParams {
    fn default() -> Self {
        Self {
            fft_size: 65536,
            window: WindowKind::Hann,
            dc_notch_enabled: true,
            dc_notch_width_khz: 50.0,
            integration_count: 1000,
            integration_auto_save: false,
            refresh_ms: 100,
            overload_threshold: DEFAULT_OVERLOAD_THRESHOLD,
            weak_peak_db: DEFAULT_WEAK_PEAK_DB,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub receiver: ReceiverParams,
    pub processing: ProcessingParams,
    pub calibration: CalibrationState,
}

impl Config {
    /// Read a (possibly partial) JSON config, filling the rest with defaults
    pub fn load(path: &Path) -> crate::Result<Self> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Check ranges once at startup; the core assumes a validated config afterwards
    pub fn validate(&self) -> crate::Result<()> {
        let mut errors = vec![];
        let rx = &self.receiver;
        let p = &self.processing;
        if !(0.2..=10.0).contains(&rx.sample_rate_mhz) {
            errors.push(format!(
                "sample rate must be 0.2-10.0 MHz, got {}",
                rx.sample_rate_mhz
            ));
        }
        if !(20..=59).contains(&rx.gain_reduction_db) {
            errors.push(format!(
                "gain reduction must be 20-59 dB, got {}",
                rx.gain_reduction_db
            ));
        }
        if rx.lna_state > 9 {
            errors.push(format!("LNA state must be 0-9, got {}", rx.lna_state));
        }
        if p.fft_size < 2 || !p.fft_size.is_power_of_two() {
            errors.push(format!(
                "FFT size must be a power of two, got {}",
                p.fft_size
            ));
        }
        if p.integration_count == 0 {
            errors.push("integration count must be at least 1".to_owned());
        }
        if p.ring_capacity < 2 * p.fft_size {
            errors.push(format!(
                "ring capacity {} is too small for FFT size {}",
                p.ring_capacity, p.fft_size
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Config(errors.join("; ")))
        }
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.receiver.sample_rate_mhz * 1e6
    }

    pub fn center_freq_hz(&self) -> f64 {
        self.receiver.center_freq_mhz * 1e6
    }

    pub fn dc_notch(&self) -> Option<DcNotch> {
        self.processing.dc_notch_enabled.then(|| DcNotch {
            width_khz: self.processing.dc_notch_width_khz,
        })
    }

    /// The parameters recorded alongside an integrated spectrum
    pub fn observation_info(&self) -> ObservationInfo {
        ObservationInfo {
            center_freq_mhz: self.receiver.center_freq_mhz,
            sample_rate_mhz: self.receiver.sample_rate_mhz,
            fft_size: self.processing.fft_size,
            window: self.processing.window,
            gain_reduction_db: self.receiver.gain_reduction_db,
            lna_state: self.receiver.lna_state,
        }
    }
}
