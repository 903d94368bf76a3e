//! A software stand-in for the radio, so the whole chain runs without hardware.
//!
//! Streaming happens on a thread of its own, the same way the vendor layer calls back
//! from its own thread: a reset packet first, then fixed-length packets of 14-bit noise
//! with an optional hydrogen line on top.

use std::{
    f64::consts::TAU,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use rand::Rng;
use tracing::{debug, info, warn};

use crate::{
    device::{ApiStatus, DeviceInfo, DeviceParam, HardwareEvent, HwVersion, RadioApi, StreamHandler},
    HI_REST_FREQ_MHZ,
};

/// Samples per callback, as the RSP1A delivers them in isochronous mode
pub const DEFAULT_PACKET_LEN: usize = 1008;

/// An emission line at a fixed Doppler offset from the HI rest frequency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimLine {
    pub offset_khz: f64,
    /// Peak amplitude in ADC counts
    pub amplitude: f64,
}

pub struct SimulatedRadio {
    devices: Vec<DeviceInfo>,
    packet_len: usize,
    noise: f64,
    line: Option<SimLine>,
    realtime: bool,
    opened: bool,
    selected: Option<DeviceInfo>,
    sample_rate_hz: f64,
    rf_hz: f64,
    applied: Vec<DeviceParam>,
    handler: Option<Arc<dyn StreamHandler>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Default for SimulatedRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRadio {
    pub fn new() -> Self {
        Self {
            devices: vec![DeviceInfo {
                serial: "SIM0001".to_owned(),
                hw_version: HwVersion::Rsp1a,
            }],
            packet_len: DEFAULT_PACKET_LEN,
            noise: 400.0,
            line: Some(SimLine {
                offset_khz: 0.0,
                amplitude: 200.0,
            }),
            realtime: true,
            opened: false,
            selected: None,
            sample_rate_hz: 2e6,
            rf_hz: HI_REST_FREQ_MHZ * 1e6,
            applied: vec![],
            handler: None,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    pub fn with_devices(mut self, devices: Vec<DeviceInfo>) -> Self {
        self.devices = devices;
        self
    }

    pub fn with_line(mut self, line: Option<SimLine>) -> Self {
        self.line = line;
        self
    }

    /// Peak noise amplitude in ADC counts
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    pub fn with_packet_len(mut self, packet_len: usize) -> Self {
        self.packet_len = packet_len.max(1);
        self
    }

    /// Pace packets at the configured sample rate, or deliver them as fast as possible
    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    /// Every parameter write accepted so far, in order
    pub fn applied_params(&self) -> &[DeviceParam] {
        &self.applied
    }

    pub fn is_streaming(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Deliver a hardware event to the registered handler, as the vendor layer would
    pub fn emit(&self, event: HardwareEvent) {
        if let Some(handler) = &self.handler {
            handler.on_event(event);
        }
    }

    fn require_open(&self) -> Result<(), ApiStatus> {
        if self.opened {
            Ok(())
        } else {
            Err(ApiStatus::NotInitialised)
        }
    }

    fn stop_worker(&mut self) -> bool {
        self.running.store(false, Ordering::Release);
        match self.worker.take() {
            Some(worker) => {
                if worker.join().is_err() {
                    warn!("Simulated stream thread panicked");
                }
                true
            }
            None => false,
        }
    }
}

struct Generator {
    packet_len: usize,
    noise: f64,
    // Tone amplitude and phase step per sample
    tone: Option<(f64, f64)>,
    packet_period: Option<Duration>,
}

fn quantize(x: f64) -> i16 {
    (x.round() as i32).clamp(-8192, 8191) as i16
}

impl Generator {
    fn run(self, handler: Arc<dyn StreamHandler>, running: Arc<AtomicBool>) {
        let mut rng = rand::thread_rng();
        let mut xi = vec![0i16; self.packet_len];
        let mut xq = vec![0i16; self.packet_len];
        let mut phase = 0.0f64;
        let mut next = Instant::now();
        handler.on_samples(&[], &[], 0, true);
        while running.load(Ordering::Acquire) {
            for (i, q) in xi.iter_mut().zip(xq.iter_mut()) {
                // Sum of two uniforms, roughly bell shaped
                let mut re = self.noise * (rng.gen_range(-0.5f64..0.5) + rng.gen_range(-0.5..0.5));
                let mut im = self.noise * (rng.gen_range(-0.5f64..0.5) + rng.gen_range(-0.5..0.5));
                if let Some((amplitude, step)) = self.tone {
                    re += amplitude * phase.cos();
                    im += amplitude * phase.sin();
                    phase = (phase + step) % TAU;
                }
                *i = quantize(re);
                *q = quantize(im);
            }
            handler.on_samples(&xi, &xq, self.packet_len, false);
            match self.packet_period {
                Some(period) => {
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        next = now;
                    }
                }
                None => thread::yield_now(),
            }
        }
    }
}

impl RadioApi for SimulatedRadio {
    fn open(&mut self) -> Result<(), ApiStatus> {
        if self.opened {
            return Err(ApiStatus::AlreadyInitialised);
        }
        self.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ApiStatus> {
        self.require_open()?;
        self.stop_worker();
        self.opened = false;
        Ok(())
    }

    fn lock(&mut self) -> Result<(), ApiStatus> {
        self.require_open()
    }

    fn unlock(&mut self) -> Result<(), ApiStatus> {
        self.require_open()
    }

    fn devices(&mut self) -> Result<Vec<DeviceInfo>, ApiStatus> {
        self.require_open()?;
        Ok(self.devices.clone())
    }

    fn select(&mut self, device: &DeviceInfo) -> Result<(), ApiStatus> {
        self.require_open()?;
        if !self.devices.contains(device) {
            return Err(ApiStatus::InvalidParam);
        }
        self.selected = Some(device.clone());
        Ok(())
    }

    fn set_param(&mut self, param: DeviceParam) -> Result<(), ApiStatus> {
        if self.selected.is_none() {
            return Err(ApiStatus::NotInitialised);
        }
        match param {
            DeviceParam::SampleRate { hz } if !(2e5..=1e7).contains(&hz) => {
                return Err(ApiStatus::OutOfRange)
            }
            DeviceParam::SampleRate { hz } => self.sample_rate_hz = hz,
            DeviceParam::RfFrequency { hz } if !(1e6..=2e9).contains(&hz) => {
                return Err(ApiStatus::OutOfRange)
            }
            DeviceParam::RfFrequency { hz } => self.rf_hz = hz,
            DeviceParam::LnaState(state) if state > 9 => return Err(ApiStatus::OutOfRange),
            _ => {}
        }
        self.applied.push(param);
        Ok(())
    }

    fn init(&mut self, handler: Arc<dyn StreamHandler>) -> Result<(), ApiStatus> {
        if self.selected.is_none() {
            return Err(ApiStatus::NotInitialised);
        }
        if self.worker.is_some() {
            return Err(ApiStatus::AlreadyInitialised);
        }
        let fs = self.sample_rate_hz;
        let tone = self.line.and_then(|line| {
            let offset_hz = HI_REST_FREQ_MHZ * 1e6 + line.offset_khz * 1e3 - self.rf_hz;
            (offset_hz.abs() < fs / 2.0).then(|| (line.amplitude, TAU * offset_hz / fs))
        });
        let generator = Generator {
            packet_len: self.packet_len,
            noise: self.noise,
            tone,
            packet_period: self
                .realtime
                .then(|| Duration::from_secs_f64(self.packet_len as f64 / fs)),
        };
        self.running.store(true, Ordering::Release);
        let running = self.running.clone();
        let h = handler.clone();
        let worker = thread::Builder::new()
            .name("sim-stream".to_owned())
            .spawn(move || generator.run(h, running))
            .map_err(|_| {
                self.running.store(false, Ordering::Release);
                ApiStatus::OutOfMemError
            })?;
        self.worker = Some(worker);
        self.handler = Some(handler);
        info!(fs, rf = self.rf_hz, "Simulated stream started");
        Ok(())
    }

    fn uninit(&mut self) -> Result<(), ApiStatus> {
        if self.stop_worker() {
            debug!("Simulated stream stopped");
            Ok(())
        } else {
            Err(ApiStatus::NotInitialised)
        }
    }

    fn release(&mut self, device: &DeviceInfo) -> Result<(), ApiStatus> {
        match &self.selected {
            Some(selected) if selected == device => {
                self.selected = None;
                self.handler = None;
                Ok(())
            }
            _ => Err(ApiStatus::InvalidParam),
        }
    }
}

impl Drop for SimulatedRadio {
    fn drop(&mut self) {
        self.stop_worker();
    }
}
