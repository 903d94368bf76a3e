//! One pipeline cycle: pull a block, analyze it, relabel the axis, integrate.
//!
//! Calibration and the integrator are shared behind locks so a command thread can
//! adjust the former and start or stop the latter between cycles.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tracing::{info, warn};

use crate::{
    calibration::{
        auto_calibrate, velocity_axis, CalibrationError, CalibrationOutcome, CalibrationState,
    },
    config::Config,
    exfil::Exporter,
    f_engine::{SpectralAnalyzer, Spectrum},
    integration::{IntegrationPhase, Integrator, Progress},
    ring::SharedRing,
    ComplexSample,
};

/// Anything the pipeline can pull fixed-size sample blocks from
pub trait SampleSource {
    /// The newest `n` samples, or `None` if fewer are buffered
    fn pull(&self, n: usize) -> Option<Vec<ComplexSample>>;
}

impl SampleSource for SharedRing {
    fn pull(&self, n: usize) -> Option<Vec<ComplexSample>> {
        SharedRing::pull(self, n)
    }
}

pub type SharedCalibration = Arc<RwLock<CalibrationState>>;
pub type SharedIntegrator = Arc<Mutex<Integrator>>;

/// The running average together with the axis it was integrated on
#[derive(Debug, Clone, PartialEq)]
pub struct IntegratedSpectrum {
    /// Fixed by the first spectrum of the run, so it can lag the live axis
    pub velocity_km_s: Vec<f64>,
    pub power_db: Vec<f64>,
}

/// What a display sink gets each cycle
#[derive(Debug, Clone)]
pub struct Frame {
    pub cycle: u64,
    /// Live spectrum on the calibrated frequency axis
    pub spectrum: Spectrum,
    /// Doppler velocity of each bin (km/s)
    pub velocity_km_s: Vec<f64>,
    /// Running integration average, while a run is active
    pub integrated: Option<IntegratedSpectrum>,
    pub progress: Option<Progress>,
    /// This cycle completed the integration run
    pub completed: bool,
}

pub struct Pipeline {
    analyzer: SpectralAnalyzer,
    fft_size: usize,
    sample_rate_hz: f64,
    center_freq_hz: f64,
    weak_peak_db: f64,
    calibration: SharedCalibration,
    integrator: SharedIntegrator,
    autosave: Option<Exporter>,
    last_raw: Option<Spectrum>,
    cycles: u64,
}

impl Pipeline {
    pub fn new(config: &Config, calibration: CalibrationState) -> Self {
        let p = &config.processing;
        Self {
            analyzer: SpectralAnalyzer::new(p.fft_size, p.window, config.dc_notch()),
            fft_size: p.fft_size,
            sample_rate_hz: config.sample_rate_hz(),
            center_freq_hz: config.center_freq_hz(),
            weak_peak_db: p.weak_peak_db,
            calibration: Arc::new(RwLock::new(calibration)),
            integrator: Arc::new(Mutex::new(Integrator::new(config.observation_info()))),
            autosave: None,
            last_raw: None,
            cycles: 0,
        }
    }

    /// Save each completed integration through `exporter`
    pub fn with_autosave(mut self, exporter: Exporter) -> Self {
        self.autosave = Some(exporter);
        self
    }

    pub fn calibration(&self) -> SharedCalibration {
        self.calibration.clone()
    }

    pub fn integrator(&self) -> SharedIntegrator {
        self.integrator.clone()
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    fn lock_integrator(&self) -> MutexGuard<'_, Integrator> {
        self.integrator.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_calibration(&self) -> CalibrationState {
        *self.calibration.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run one cycle. `Ok(None)` means the source didn't have a full block yet.
    pub fn cycle<S: SampleSource + ?Sized>(&mut self, source: &S) -> crate::Result<Option<Frame>> {
        let samples = match source.pull(self.fft_size) {
            Some(samples) => samples,
            None => return Ok(None),
        };
        let raw = self
            .analyzer
            .analyze(&samples, self.sample_rate_hz, self.center_freq_hz);
        let frequencies = self.current_calibration().calibrate_axis(&raw.frequencies);
        let velocity_km_s = velocity_axis(&frequencies);

        let (integrated, progress, completed) = {
            let mut integ = self.lock_integrator();
            let was_active = integ.is_active();
            let integrated = integ
                .accumulate(&raw.power_db, &velocity_km_s)?
                .map(|power_db| IntegratedSpectrum {
                    velocity_km_s: integ.velocity_axis().to_vec(),
                    power_db,
                });
            let progress = was_active.then(|| integ.progress());
            let completed = was_active && integ.phase() == IntegrationPhase::Complete;
            (integrated, progress, completed)
        };
        if completed {
            self.autosave_completed();
        }

        self.cycles += 1;
        let frame = Frame {
            cycle: self.cycles,
            spectrum: Spectrum {
                frequencies,
                power_db: raw.power_db.clone(),
            },
            velocity_km_s,
            integrated,
            progress,
            completed,
        };
        self.last_raw = Some(raw);
        Ok(Some(frame))
    }

    fn autosave_completed(&self) {
        let exporter = match &self.autosave {
            Some(exporter) => exporter,
            None => return,
        };
        let product = self.lock_integrator().finalize_for_save();
        match product.and_then(|p| exporter.save(&p)) {
            Ok(path) => info!("Auto-saved integration to {}", path.display()),
            Err(e) => warn!("Auto-save failed: {e}"),
        }
    }

    /// The most recent spectrum on the calibrated axis
    pub fn last_spectrum(&self) -> Option<Spectrum> {
        let cal = self.current_calibration();
        self.last_raw.as_ref().map(|raw| Spectrum {
            frequencies: cal.calibrate_axis(&raw.frequencies),
            power_db: raw.power_db.clone(),
        })
    }

    /// Measure the HI peak in the last raw spectrum. Nothing is applied here.
    pub fn auto_calibrate(&self) -> Result<CalibrationOutcome, CalibrationError> {
        auto_calibrate(self.last_raw.as_ref(), self.weak_peak_db)
    }

    /// Adopt an auto-calibration result and return the new calibration
    pub fn apply_calibration(&self, outcome: &CalibrationOutcome) -> CalibrationState {
        let mut cal = self
            .calibration
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        cal.apply_auto(outcome.result());
        info!(
            khz = cal.khz_offset,
            ppm = cal.ppm_offset,
            weak = outcome.is_weak(),
            "Applied auto-calibration"
        );
        *cal
    }
}
