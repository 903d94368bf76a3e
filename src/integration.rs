//! Incoherent integration of successive power spectra.
//!
//! Spectra are summed in the linear power domain and averaged on demand. The live
//! display path calls [`Integrator::accumulate`] every cycle regardless of state; it
//! only does anything while a run is active.

use std::{
    fmt,
    time::{Duration, Instant},
};

use chrono::{DateTime, Datelike, SecondsFormat, Timelike, Utc};
use hifitime::Epoch;
use serde::Serialize;
use tracing::{debug, info};

use crate::{db_to_linear, linear_to_db, window::WindowKind, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationPhase {
    Idle,
    Active,
    Stopped,
    Complete,
}

impl fmt::Display for IntegrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntegrationPhase::Idle => "idle",
            IntegrationPhase::Active => "integrating",
            IntegrationPhase::Stopped => "stopped",
            IntegrationPhase::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Receiver and processing settings recorded with every saved integration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationInfo {
    pub center_freq_mhz: f64,
    pub sample_rate_mhz: f64,
    pub fft_size: usize,
    pub window: WindowKind,
    pub gain_reduction_db: u8,
    pub lna_state: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub count: usize,
    pub target: usize,
    pub percent: f64,
    /// `None` until at least one spectrum has been integrated
    pub eta: Option<Duration>,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.1}%)", self.count, self.target, self.percent)?;
        match self.eta {
            Some(eta) => write!(f, " ETA {:.0}s", eta.as_secs_f64()),
            None => write!(f, " ETA computing..."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationMetadata {
    pub integration_count: usize,
    pub target_count: usize,
    pub center_freq_mhz: f64,
    pub sample_rate_mhz: f64,
    pub fft_size: usize,
    pub window_type: WindowKind,
    /// UTC start of the run, RFC 3339
    pub timestamp: String,
    /// Modified Julian Date of the start of the run
    pub start_mjd: f64,
    pub elapsed_s: f64,
    pub gain_reduction_db: u8,
    pub lna_state: u8,
}

/// Everything the persistence layer needs to write out an integrated spectrum
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntegrationProduct {
    pub velocity_axis: Vec<f64>,
    pub power_db: Vec<f64>,
    pub metadata: IntegrationMetadata,
}

/// MJD (UTC) of a chrono timestamp
pub fn mjd(time: &DateTime<Utc>) -> f64 {
    Epoch::from_gregorian_utc(
        time.year(),
        time.month() as u8,
        time.day() as u8,
        time.hour() as u8,
        time.minute() as u8,
        time.second() as u8,
        time.nanosecond().min(999_999_999),
    )
    .to_mjd_utc_days()
}

pub struct Integrator {
    info: ObservationInfo,
    phase: IntegrationPhase,
    target: usize,
    count: usize,
    // Sized lazily on the first spectrum of a run
    accumulated: Option<Vec<f64>>,
    velocity_axis: Vec<f64>,
    started: Option<Instant>,
    started_at: Option<DateTime<Utc>>,
    finished: Option<Instant>,
}

impl Integrator {
    pub fn new(info: ObservationInfo) -> Self {
        Self {
            info,
            phase: IntegrationPhase::Idle,
            target: 0,
            count: 0,
            accumulated: None,
            velocity_axis: vec![],
            started: None,
            started_at: None,
            finished: None,
        }
    }

    pub fn phase(&self) -> IntegrationPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == IntegrationPhase::Active
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn target(&self) -> usize {
        self.target
    }

    /// Begin a new run, discarding whatever the previous one accumulated
    pub fn start(&mut self, target: usize) {
        self.start_at(target, Instant::now(), Utc::now());
    }

    fn start_at(&mut self, target: usize, now: Instant, wall: DateTime<Utc>) {
        self.phase = IntegrationPhase::Active;
        self.target = target;
        self.count = 0;
        self.accumulated = None;
        self.velocity_axis.clear();
        self.started = Some(now);
        self.started_at = Some(wall);
        self.finished = None;
        info!(target, "Started integration");
    }

    /// Freeze an active run. The data gathered so far stays available for saving.
    pub fn stop(&mut self) {
        if self.phase == IntegrationPhase::Active {
            self.phase = IntegrationPhase::Stopped;
            self.finished = Some(Instant::now());
            info!(count = self.count, target = self.target, "Stopped integration");
        }
    }

    /// Fold one spectrum into the running sum.
    ///
    /// Returns the current average (dB) if the spectrum was integrated, `None` when no run
    /// is active. The first spectrum of a run fixes the length and the velocity axis.
    pub fn accumulate(
        &mut self,
        power_db: &[f64],
        velocity_axis: &[f64],
    ) -> crate::Result<Option<Vec<f64>>> {
        self.accumulate_at(power_db, velocity_axis, Instant::now())
    }

    fn accumulate_at(
        &mut self,
        power_db: &[f64],
        velocity_axis: &[f64],
        now: Instant,
    ) -> crate::Result<Option<Vec<f64>>> {
        if self.phase != IntegrationPhase::Active {
            return Ok(None);
        }
        if velocity_axis.len() != power_db.len() {
            return Err(Error::SpectrumLength {
                expected: power_db.len(),
                got: velocity_axis.len(),
            });
        }
        if self.accumulated.is_none() {
            self.velocity_axis = velocity_axis.to_vec();
        }
        let acc = self
            .accumulated
            .get_or_insert_with(|| vec![0.0; power_db.len()]);
        if acc.len() != power_db.len() {
            return Err(Error::SpectrumLength {
                expected: acc.len(),
                got: power_db.len(),
            });
        }
        for (a, p) in acc.iter_mut().zip(power_db) {
            *a += db_to_linear(*p);
        }
        self.count += 1;
        let average = self.average_db();
        if self.count >= self.target {
            self.phase = IntegrationPhase::Complete;
            self.finished = Some(now);
            info!(count = self.count, "Integration complete");
        } else if self.count % 100 == 0 {
            debug!(count = self.count, target = self.target, "Integrating");
        }
        Ok(Some(average))
    }

    /// The velocity axis fixed by the first spectrum of the run
    pub fn velocity_axis(&self) -> &[f64] {
        &self.velocity_axis
    }

    /// The running average in dB, empty if nothing has been integrated
    pub fn average_db(&self) -> Vec<f64> {
        match &self.accumulated {
            Some(acc) if self.count > 0 => {
                let n = self.count as f64;
                acc.iter().map(|a| linear_to_db(a / n)).collect()
            }
            _ => vec![],
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress_at(Instant::now())
    }

    fn progress_at(&self, now: Instant) -> Progress {
        let percent = if self.target == 0 {
            0.0
        } else {
            self.count as f64 / self.target as f64 * 100.0
        };
        let eta = match self.started {
            Some(started) if self.count > 0 => {
                let end = self.finished.unwrap_or(now);
                let per_spectrum = end.duration_since(started).as_secs_f64() / self.count as f64;
                let remaining = self.target.saturating_sub(self.count) as f64;
                Some(Duration::from_secs_f64(per_spectrum * remaining))
            }
            _ => None,
        };
        Progress {
            count: self.count,
            target: self.target,
            percent,
            eta,
        }
    }

    /// Snapshot the averaged spectrum for saving. Only valid once a run has ended with at
    /// least one spectrum in it; calling it again gives the same product.
    pub fn finalize_for_save(&self) -> crate::Result<IntegrationProduct> {
        match self.phase {
            IntegrationPhase::Stopped | IntegrationPhase::Complete if self.count > 0 => {}
            IntegrationPhase::Stopped | IntegrationPhase::Complete => {
                return Err(Error::invalid_state("save an integration", "it is empty"))
            }
            phase => return Err(Error::invalid_state("save an integration", phase)),
        }
        let started_at = self.started_at.unwrap_or_else(Utc::now);
        let elapsed_s = match (self.started, self.finished) {
            (Some(s), Some(f)) => f.duration_since(s).as_secs_f64(),
            _ => 0.0,
        };
        Ok(IntegrationProduct {
            velocity_axis: self.velocity_axis.clone(),
            power_db: self.average_db(),
            metadata: IntegrationMetadata {
                integration_count: self.count,
                target_count: self.target,
                center_freq_mhz: self.info.center_freq_mhz,
                sample_rate_mhz: self.info.sample_rate_mhz,
                fft_size: self.info.fft_size,
                window_type: self.info.window,
                timestamp: started_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                start_mjd: mjd(&started_at),
                elapsed_s,
                gain_reduction_db: self.info.gain_reduction_db,
                lna_state: self.info.lna_state,
            },
        })
    }
}
