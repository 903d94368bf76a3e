use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use serde::Serialize;

use crate::{window::WindowKind, ComplexSample, POWER_EPSILON};

// To turn a block of I/Q samples into a spectrum, we
// * multiply with the window function
// * FFT
// * shift DC to the middle
// * take the magnitude in dB
// * (optionally) paper over the DC spike

/// A power spectrum with its frequency axis, index aligned
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Spectrum {
    /// Bin frequencies in MHz, ascending
    pub frequencies: Vec<f64>,
    /// Bin power in dB
    pub power_db: Vec<f64>,
}

impl Spectrum {
    pub fn len(&self) -> usize {
        self.power_db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.power_db.is_empty()
    }

    /// Index and value of the strongest bin
    pub fn peak(&self) -> Option<(usize, f64)> {
        self.power_db
            .iter()
            .copied()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(&b.1))
    }
}

/// Interpolate across the zero-IF DC spike
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DcNotch {
    /// Full width of the notch in kHz
    pub width_khz: f64,
}

impl DcNotch {
    /// Half-width of the notch in bins for the given bin spacing
    pub fn half_width_bins(&self, bin_hz: f64) -> usize {
        if bin_hz <= 0.0 || !self.width_khz.is_finite() || self.width_khz <= 0.0 {
            return 0;
        }
        (self.width_khz * 1e3 / 2.0 / bin_hz) as usize
    }

    /// Replace `[center - k, center + k]` by a straight line between its neighbours.
    /// Degenerate notches (zero width, or a quarter of the spectrum or more) are skipped.
    pub fn apply(&self, power_db: &mut [f64], bin_hz: f64) {
        let n = power_db.len();
        let k = self.half_width_bins(bin_hz);
        if k == 0 || k >= n / 4 {
            return;
        }
        let center = n / 2;
        let left = center - k - 1;
        let right = center + k + 1;
        let (lo, hi) = (power_db[left], power_db[right]);
        let span = (right - left) as f64;
        for (offset, p) in power_db[left + 1..right].iter_mut().enumerate() {
            let t = (offset + 1) as f64 / span;
            *p = lo + t * (hi - lo);
        }
    }
}

/// Frequency (Hz, relative to the tuner) of bin `k` after the zero-frequency shift
fn shifted_bin_freq(k: usize, n: usize, sample_rate_hz: f64) -> f64 {
    let j = (k + n - n / 2) % n;
    let signed = if j < (n + 1) / 2 {
        j as f64
    } else {
        j as f64 - n as f64
    };
    signed * sample_rate_hz / n as f64
}

/// Frequency axis (MHz) for an `n` point shifted FFT around `center_freq_hz`
pub fn frequency_axis(n: usize, sample_rate_hz: f64, center_freq_hz: f64) -> Vec<f64> {
    (0..n)
        .map(|k| (shifted_bin_freq(k, n, sample_rate_hz) + center_freq_hz) / 1e6)
        .collect()
}

/// Window, FFT, and convert to a dB power spectrum. Caches the FFT plan and the window
/// for its configured size, rebuilding them if it's handed a block of a different length.
pub struct SpectralAnalyzer {
    kind: WindowKind,
    notch: Option<DcNotch>,
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    planner: FftPlanner<f64>,
    scratch: Vec<Complex<f64>>,
    buf: Vec<Complex<f64>>,
}

impl SpectralAnalyzer {
    pub fn new(fft_size: usize, kind: WindowKind, notch: Option<DcNotch>) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
        Self {
            kind,
            notch,
            fft,
            window: kind.coefficients(fft_size),
            planner,
            scratch,
            buf: Vec::with_capacity(fft_size),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn window_kind(&self) -> WindowKind {
        self.kind
    }

    pub fn set_window(&mut self, kind: WindowKind) {
        self.kind = kind;
        self.window = kind.coefficients(self.window.len());
    }

    pub fn set_notch(&mut self, notch: Option<DcNotch>) {
        self.notch = notch;
    }

    fn resize(&mut self, n: usize) {
        self.fft = self.planner.plan_fft_forward(n);
        self.scratch
            .resize(self.fft.get_inplace_scratch_len(), Complex::default());
        self.window = self.kind.coefficients(n);
    }

    pub fn analyze(
        &mut self,
        samples: &[ComplexSample],
        sample_rate_hz: f64,
        center_freq_hz: f64,
    ) -> Spectrum {
        let n = samples.len();
        if n == 0 {
            return Spectrum {
                frequencies: vec![],
                power_db: vec![],
            };
        }
        if n != self.window.len() {
            self.resize(n);
        }
        self.buf.clear();
        self.buf.extend(
            samples
                .iter()
                .zip(&self.window)
                .map(|(s, w)| Complex::new(s.re as f64 * w, s.im as f64 * w)),
        );
        self.fft.process_with_scratch(&mut self.buf, &mut self.scratch);
        let shift = n - n / 2;
        let mut power_db: Vec<f64> = (0..n)
            .map(|k| 20.0 * (self.buf[(k + shift) % n].norm() + POWER_EPSILON).log10())
            .collect();
        if let Some(notch) = self.notch {
            notch.apply(&mut power_db, sample_rate_hz / n as f64);
        }
        Spectrum {
            frequencies: frequency_axis(n, sample_rate_hz, center_freq_hz),
            power_db,
        }
    }
}

/// One-shot analysis without keeping a plan around
pub fn analyze(
    samples: &[ComplexSample],
    kind: WindowKind,
    sample_rate_hz: f64,
    center_freq_hz: f64,
    notch: Option<DcNotch>,
) -> Spectrum {
    if samples.is_empty() {
        return Spectrum {
            frequencies: vec![],
            power_db: vec![],
        };
    }
    SpectralAnalyzer::new(samples.len(), kind, notch).analyze(
        samples,
        sample_rate_hz,
        center_freq_hz,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOOR_DB: f64 = -200.0;

    fn tone(n: usize, bin: f64) -> Vec<ComplexSample> {
        (0..n)
            .map(|t| {
                let ph = 2.0 * std::f32::consts::PI * bin as f32 * t as f32 / n as f32;
                Complex::new(ph.cos(), ph.sin())
            })
            .collect()
    }

    #[test]
    fn test_dc_block_single_peak() {
        let samples = vec![Complex::new(1.0, 0.0); 8];
        let s = analyze(&samples, WindowKind::Rectangular, 8.0, 0.0, None);
        assert_eq!(s.len(), 8);
        // After the shift DC sits in the middle
        assert_eq!(s.peak().unwrap().0, 4);
        assert!((s.power_db[4] - 20.0 * 8f64.log10()).abs() < 1e-9);
        for (k, p) in s.power_db.iter().enumerate() {
            if k != 4 {
                assert!((p - FLOOR_DB).abs() < 1e-3, "bin {k} = {p}");
            }
        }
    }

    #[test]
    fn test_lengths_and_axis() {
        for kind in WindowKind::ALL {
            for n in [2usize, 8, 64, 256] {
                let samples = tone(n, 3.0);
                let center = 1420.0e6;
                let fs = 2.0e6;
                let s = analyze(&samples, kind, fs, center, None);
                assert_eq!(s.frequencies.len(), n);
                assert_eq!(s.power_db.len(), n);
                let df = fs / n as f64 / 1e6;
                // Bins run from center - fs/2 up to center + fs/2 - df
                assert!((s.frequencies[0] - (1420.0 - 1.0)).abs() < 1e-9);
                assert!((s.frequencies[n - 1] - (1420.0 + 1.0 - df)).abs() < 1e-9);
                let midpoint = (s.frequencies[0] + s.frequencies[n - 1] + df) / 2.0;
                assert!((midpoint - 1420.0).abs() < 1e-9);
                assert!((s.frequencies[n / 2] - 1420.0).abs() < 1e-12);
                for pair in s.frequencies.windows(2) {
                    assert!(pair[1] > pair[0]);
                }
            }
        }
    }

    #[test]
    fn test_tone_lands_in_right_bin() {
        let n = 64;
        let s = analyze(&tone(n, 5.0), WindowKind::Hann, 64.0, 0.0, None);
        let (k, _) = s.peak().unwrap();
        assert_eq!(k, n / 2 + 5);
        assert!((s.frequencies[k] * 1e6 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_negative_tone() {
        let n = 32;
        let s = analyze(&tone(n, -3.0), WindowKind::Rectangular, 32.0, 0.0, None);
        assert_eq!(s.peak().unwrap().0, n / 2 - 3);
    }

    #[test]
    fn test_empty_input() {
        let s = analyze(&[], WindowKind::Hann, 1e6, 0.0, None);
        assert!(s.is_empty());
        assert!(s.frequencies.is_empty());
    }

    #[test]
    fn test_single_sample_tapered_window_is_floor() {
        let s = analyze(&[Complex::new(1.0, 1.0)], WindowKind::Blackman, 1e6, 0.0, None);
        assert_eq!(s.len(), 1);
        assert!((s.power_db[0] - FLOOR_DB).abs() < 1e-6);
    }

    #[test]
    fn test_reproducible() {
        let samples = tone(128, 7.3);
        let mut analyzer = SpectralAnalyzer::new(128, WindowKind::FlatTop, None);
        let a = analyzer.analyze(&samples, 1e6, 1420e6);
        let b = analyzer.analyze(&samples, 1e6, 1420e6);
        assert_eq!(a, b);
    }

    #[test]
    fn test_resizes_for_other_block_lengths() {
        let mut analyzer = SpectralAnalyzer::new(16, WindowKind::Hann, None);
        let s = analyzer.analyze(&tone(32, 2.0), 32.0, 0.0);
        assert_eq!(s.len(), 32);
        assert_eq!(analyzer.fft_size(), 32);
    }

    #[test]
    fn test_notch_interpolates() {
        let mut p: Vec<f64> = (0..64).map(|k| k as f64).collect();
        p[32] = 100.0;
        // 1 kHz bins, 4 kHz wide notch -> 2 bins either side of DC
        let notch = DcNotch { width_khz: 4.0 };
        assert_eq!(notch.half_width_bins(1e3), 2);
        notch.apply(&mut p, 1e3);
        // A ramp interpolates back to itself
        for (k, v) in p.iter().enumerate() {
            assert!((v - k as f64).abs() < 1e-12, "bin {k}");
        }
    }

    #[test]
    fn test_notch_only_touches_its_window() {
        let mut p = vec![-50.0; 64];
        p[31] = 10.0;
        p[32] = 20.0;
        p[33] = 10.0;
        DcNotch { width_khz: 2.0 }.apply(&mut p, 1e3);
        assert!(p.iter().all(|&v| v == -50.0));
    }

    #[test]
    fn test_degenerate_notch_is_noop() {
        let original: Vec<f64> = (0..16).map(|k| (k * k) as f64).collect();
        // Zero bins
        let mut p = original.clone();
        DcNotch { width_khz: 0.5 }.apply(&mut p, 1e3);
        assert_eq!(p, original);
        // Half-width of 4 bins is a quarter of 16
        let mut p = original.clone();
        DcNotch { width_khz: 8.0 }.apply(&mut p, 1e3);
        assert_eq!(p, original);
    }

    #[test]
    fn test_notch_applied_in_analysis() {
        let samples = vec![Complex::new(1.0, 0.0); 64];
        let plain = analyze(&samples, WindowKind::Rectangular, 64e3, 0.0, None);
        let notched = analyze(
            &samples,
            WindowKind::Rectangular,
            64e3,
            0.0,
            Some(DcNotch { width_khz: 4.0 }),
        );
        assert!(plain.power_db[32] > 0.0);
        assert!((notched.power_db[32] - FLOOR_DB).abs() < 1e-3);
    }
}
