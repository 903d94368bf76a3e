//! Periodic acquisition statistics: how full the ring is, how much signal that
//! represents, and how fast samples are arriving.

use std::time::Instant;

use tracing::{info, warn};

use crate::controller::AcquisitionStats;

/// Log every this many pipeline cycles
pub const REPORT_INTERVAL_CYCLES: u64 = 10;

// Warn when the ring is this full, the pipeline is falling behind
const HIGH_FILL_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub stats: AcquisitionStats,
    /// Seconds of signal currently buffered
    pub buffered_s: f64,
    /// Samples per second since the previous report, once there is one
    pub throughput_sps: Option<f64>,
}

pub struct StatsMonitor {
    sample_rate_hz: f64,
    interval: u64,
    cycles: u64,
    last: Option<(Instant, u64)>,
}

impl StatsMonitor {
    pub fn new(sample_rate_hz: f64) -> Self {
        Self {
            sample_rate_hz,
            interval: REPORT_INTERVAL_CYCLES,
            cycles: 0,
            last: None,
        }
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    /// Count a pipeline cycle, reporting on every `interval`th one
    pub fn tick(&mut self, stats: AcquisitionStats) -> Option<StatsReport> {
        self.tick_at(stats, Instant::now())
    }

    fn tick_at(&mut self, stats: AcquisitionStats, now: Instant) -> Option<StatsReport> {
        self.cycles += 1;
        if self.cycles % self.interval != 0 {
            return None;
        }
        let buffered_s = if self.sample_rate_hz > 0.0 {
            stats.buffer_size as f64 / self.sample_rate_hz
        } else {
            0.0
        };
        let throughput_sps = self.last.and_then(|(then, samples)| {
            let dt = now.duration_since(then).as_secs_f64();
            (dt > 0.0).then(|| stats.total_samples.saturating_sub(samples) as f64 / dt)
        });
        self.last = Some((now, stats.total_samples));
        info!(
            buffer = stats.buffer_size,
            fill = format!("{:.1}%", stats.buffer_fill_percent),
            buffered_s = format!("{buffered_s:.3}"),
            total = stats.total_samples,
            overloads = stats.overload_count,
            msps = throughput_sps.map(|t| format!("{:.3}", t / 1e6)),
            "Acquisition stats"
        );
        if stats.buffer_fill_percent >= HIGH_FILL_PERCENT {
            warn!("Sample buffer is {:.1}% full", stats.buffer_fill_percent);
        }
        Some(StatsReport {
            stats,
            buffered_s,
            throughput_sps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn stats(total: u64, buffered: usize) -> AcquisitionStats {
        AcquisitionStats {
            total_samples: total,
            overload_count: 0,
            is_streaming: true,
            buffer_size: buffered,
            buffer_capacity: 1_000_000,
            buffer_fill_percent: buffered as f64 / 1e4,
        }
    }

    #[test]
    fn test_reports_every_interval() {
        let mut mon = StatsMonitor::new(6e6);
        let reports = (0..25).filter_map(|_| mon.tick(stats(0, 0))).count();
        assert_eq!(reports, 2);
    }

    #[test]
    fn test_buffered_seconds_and_throughput() {
        let mut mon = StatsMonitor::new(2e6).with_interval(1);
        let t0 = Instant::now();
        let first = mon.tick_at(stats(1_000_000, 500_000), t0).unwrap();
        assert!((first.buffered_s - 0.25).abs() < 1e-12);
        assert_eq!(first.throughput_sps, None);
        let second = mon
            .tick_at(stats(3_000_000, 500_000), t0 + Duration::from_secs(1))
            .unwrap();
        assert!((second.throughput_sps.unwrap() - 2e6).abs() < 1e-6);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut mon = StatsMonitor::new(1e6).with_interval(0);
        assert!(mon.tick(stats(0, 0)).is_some());
    }
}
