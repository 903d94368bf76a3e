//! Window functions applied before the FFT

use std::{f64::consts::PI, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

// Flat-top cosine-sum coefficients
const FLAT_TOP: [f64; 5] = [
    0.21557895,
    0.41663158,
    0.277263158,
    0.083578947,
    0.006947368,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Rectangular,
    #[default]
    Hann,
    Hamming,
    Blackman,
    FlatTop,
}

impl WindowKind {
    pub const ALL: [WindowKind; 5] = [
        WindowKind::Rectangular,
        WindowKind::Hann,
        WindowKind::Hamming,
        WindowKind::Blackman,
        WindowKind::FlatTop,
    ];

    /// Symmetric window coefficients of length `n`.
    ///
    /// Tapered windows need `n - 1` in the denominator, so a single-point tapered
    /// window comes back as `[0.0]` rather than NaN.
    pub fn coefficients(self, n: usize) -> Vec<f64> {
        if self == WindowKind::Rectangular {
            return vec![1.0; n];
        }
        if n < 2 {
            return vec![0.0; n];
        }
        let denom = (n - 1) as f64;
        (0..n)
            .map(|i| {
                let x = 2.0 * PI * i as f64 / denom;
                match self {
                    WindowKind::Rectangular => 1.0,
                    WindowKind::Hann => 0.5 - 0.5 * x.cos(),
                    WindowKind::Hamming => 0.54 - 0.46 * x.cos(),
                    WindowKind::Blackman => 0.42 - 0.5 * x.cos() + 0.08 * (2.0 * x).cos(),
                    WindowKind::FlatTop => cosine_sum(&FLAT_TOP, x),
                }
            })
            .collect()
    }

    pub fn name(self) -> &'static str {
        match self {
            WindowKind::Rectangular => "rectangular",
            WindowKind::Hann => "hann",
            WindowKind::Hamming => "hamming",
            WindowKind::Blackman => "blackman",
            WindowKind::FlatTop => "flat_top",
        }
    }
}

/// a0 - a1 cos(x) + a2 cos(2x) - a3 cos(3x) + ...
fn cosine_sum(coeffs: &[f64], x: f64) -> f64 {
    coeffs
        .iter()
        .enumerate()
        .map(|(k, a)| {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            sign * a * (k as f64 * x).cos()
        })
        .sum()
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WindowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "rectangular" | "rect" | "none" => Ok(WindowKind::Rectangular),
            "hann" | "hanning" => Ok(WindowKind::Hann),
            "hamming" => Ok(WindowKind::Hamming),
            "blackman" => Ok(WindowKind::Blackman),
            "flat_top" | "flattop" => Ok(WindowKind::FlatTop),
            other => Err(format!("unknown window `{other}`")),
        }
    }
}
