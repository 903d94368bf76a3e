//! The acquisition controller owns the device lifecycle and the sample ring.
//!
//! The vendor layer calls back into [`StreamState`] on its own thread; that side only
//! touches the mutex-guarded ring and atomic counters and never waits on the pipeline.

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

use tracing::{debug, error, info, trace, warn};

use crate::{
    config::Config,
    device::{
        select_preferred, DeviceInfo, DeviceParams, HardwareEvent, OverloadState, RadioApi,
        StreamHandler,
    },
    normalize,
    pipeline::SampleSource,
    ring::SharedRing,
    ComplexSample, Error,
};

// Only every Nth overloaded packet gets logged
const OVERLOAD_LOG_INTERVAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    Connected,
    Streaming,
    Stopped,
    Released,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControllerState::Uninitialized => "uninitialized",
            ControllerState::Connected => "connected",
            ControllerState::Streaming => "streaming",
            ControllerState::Stopped => "stopped",
            ControllerState::Released => "released",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcquisitionStats {
    pub total_samples: u64,
    pub overload_count: u64,
    pub is_streaming: bool,
    pub buffer_size: usize,
    pub buffer_capacity: usize,
    pub buffer_fill_percent: f64,
}

/// State shared with the vendor callback thread
pub struct StreamState {
    ring: SharedRing,
    total_samples: AtomicU64,
    overload_count: AtomicU64,
    is_streaming: AtomicBool,
    // Set when the device is removed or fails; cleared on initialize
    faulted: AtomicBool,
    overload_threshold: u16,
}

impl StreamState {
    pub fn new(capacity: usize, overload_threshold: u16) -> Self {
        Self {
            ring: SharedRing::new(capacity),
            total_samples: AtomicU64::new(0),
            overload_count: AtomicU64::new(0),
            is_streaming: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
            overload_threshold,
        }
    }

    pub fn ring(&self) -> &SharedRing {
        &self.ring
    }

    pub fn stats(&self) -> AcquisitionStats {
        let buffer_size = self.ring.size();
        let buffer_capacity = self.ring.capacity();
        AcquisitionStats {
            total_samples: self.total_samples.load(Ordering::Relaxed),
            overload_count: self.overload_count.load(Ordering::Relaxed),
            is_streaming: self.is_streaming.load(Ordering::Acquire),
            buffer_size,
            buffer_capacity,
            buffer_fill_percent: buffer_size as f64 / buffer_capacity as f64 * 100.0,
        }
    }

    fn reset_buffer(&self) {
        self.ring.clear();
        self.total_samples.store(0, Ordering::Relaxed);
    }
}

impl StreamHandler for StreamState {
    fn on_samples(&self, xi: &[i16], xq: &[i16], num_samples: usize, reset: bool) {
        if reset {
            debug!("Stream reset, clearing sample buffer");
            self.reset_buffer();
            return;
        }
        let n = num_samples.min(xi.len()).min(xq.len());
        let (xi, xq) = (&xi[..n], &xq[..n]);
        let peak_i = xi.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let peak_q = xq.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        if peak_i > self.overload_threshold || peak_q > self.overload_threshold {
            let count = self.overload_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % OVERLOAD_LOG_INTERVAL == 0 {
                warn!(
                    peak_i,
                    peak_q, count, "ADC saturation, consider more gain reduction"
                );
            }
        }
        self.ring
            .extend(xi.iter().zip(xq).map(|(&i, &q)| normalize(i, q)));
        self.total_samples.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn on_event(&self, event: HardwareEvent) {
        match event {
            HardwareEvent::PowerOverloadChanged(OverloadState::Detected) => {
                warn!("Power overload detected, increase gain reduction or lower the LNA state")
            }
            HardwareEvent::PowerOverloadChanged(OverloadState::Corrected) => {
                info!("Power overload corrected")
            }
            HardwareEvent::DeviceRemoved => {
                error!("Device removed");
                self.faulted.store(true, Ordering::Release);
                self.is_streaming.store(false, Ordering::Release);
            }
            HardwareEvent::DeviceFailure => {
                error!("Device failure");
                self.faulted.store(true, Ordering::Release);
                self.is_streaming.store(false, Ordering::Release);
            }
            HardwareEvent::GainChanged {
                gain_reduction_db,
                lna_gr_db,
            } => trace!(gain_reduction_db, lna_gr_db, "Gain changed"),
            HardwareEvent::Other(id) => debug!(id, "Unhandled device event"),
        }
    }
}

pub struct AcquisitionController<A: RadioApi> {
    api: A,
    state: ControllerState,
    api_open: bool,
    device: Option<DeviceInfo>,
    shared: Arc<StreamState>,
}

impl<A: RadioApi> AcquisitionController<A> {
    pub fn new(api: A, config: &Config) -> Self {
        Self {
            api,
            state: ControllerState::Uninitialized,
            api_open: false,
            device: None,
            shared: Arc::new(StreamState::new(
                config.processing.ring_capacity,
                config.processing.overload_threshold,
            )),
        }
    }

    /// Current state. A device removal or failure reported by the vendor layer drops a
    /// streaming controller back to uninitialized; it then needs `close` + `initialize`.
    pub fn state(&mut self) -> ControllerState {
        if self.state == ControllerState::Streaming && self.shared.faulted.load(Ordering::Acquire)
        {
            warn!("Stream lost, controller needs to be reinitialized");
            self.state = ControllerState::Uninitialized;
        }
        self.state
    }

    pub fn device(&self) -> Option<&DeviceInfo> {
        self.device.as_ref()
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn api_mut(&mut self) -> &mut A {
        &mut self.api
    }

    /// Handle for whoever needs to read the buffer without going through the controller
    pub fn stream_state(&self) -> Arc<StreamState> {
        self.shared.clone()
    }

    /// Open the API, enumerate, and select a device
    pub fn initialize(&mut self) -> crate::Result<()> {
        match self.state() {
            ControllerState::Uninitialized | ControllerState::Released => {}
            state => return Err(Error::invalid_state("initialize", state)),
        }
        if self.api_open {
            return Err(Error::invalid_state(
                "initialize",
                "the previous session is still open",
            ));
        }
        self.shared.faulted.store(false, Ordering::Release);
        if let Err(status) = self.api.open() {
            error!(%status, "Failed to open radio API");
            if let Err(status) = self.api.close() {
                debug!(%status, "Close during cleanup failed");
            }
            return Err(Error::ApiOpen { status });
        }
        self.api_open = true;
        info!("Radio API opened");
        match self.select_device() {
            Ok(device) => {
                info!(serial = %device.serial, hw = %device.hw_version, "Selected device");
                self.device = Some(device);
                self.state = ControllerState::Connected;
                Ok(())
            }
            Err(e) => {
                error!("Initialization failed: {e}");
                // Best effort, failures here are not interesting
                if let Err(status) = self.api.unlock() {
                    debug!(%status, "Unlock during cleanup failed");
                }
                if let Err(status) = self.api.close() {
                    debug!(%status, "Close during cleanup failed");
                }
                self.api_open = false;
                self.state = ControllerState::Uninitialized;
                Err(e)
            }
        }
    }

    fn select_device(&mut self) -> crate::Result<DeviceInfo> {
        if let Err(status) = self.api.lock() {
            return Err(Error::Device {
                op: "lock_device_api",
                status,
            });
        }
        let devices = self.api.devices().map_err(|status| Error::Device {
            op: "get_devices",
            status,
        })?;
        for (i, dev) in devices.iter().enumerate() {
            debug!(index = i, serial = %dev.serial, hw = %dev.hw_version, "Found device");
        }
        let device = select_preferred(&devices)
            .cloned()
            .ok_or(Error::DeviceNotFound)?;
        self.api.select(&device).map_err(|status| Error::Device {
            op: "select_device",
            status,
        })?;
        self.api.unlock().map_err(|status| Error::Device {
            op: "unlock_device_api",
            status,
        })?;
        Ok(device)
    }

    /// Program the device and start streaming
    pub fn configure_and_start(&mut self, params: &DeviceParams) -> crate::Result<()> {
        match self.state() {
            ControllerState::Connected | ControllerState::Stopped => {}
            state => return Err(Error::invalid_state("start streaming", state)),
        }
        info!(
            rf_mhz = params.rf_hz / 1e6,
            fs_msps = params.fs_hz / 1e6,
            gain_reduction_db = params.gain_reduction_db,
            lna_state = params.lna_state,
            "Configuring device"
        );
        for param in params.writes() {
            self.api.set_param(param).map_err(|status| Error::Configuration {
                op: param.op(),
                status,
            })?;
        }
        // Raised before init so a fault reported while starting isn't overwritten
        self.shared.is_streaming.store(true, Ordering::Release);
        let handler: Arc<dyn StreamHandler> = self.shared.clone();
        if let Err(status) = self.api.init(handler) {
            error!(%status, "Failed to start streaming");
            self.shared.is_streaming.store(false, Ordering::Release);
            self.state = ControllerState::Uninitialized;
            return Err(Error::Configuration { op: "init", status });
        }
        self.state = ControllerState::Streaming;
        info!("Streaming started");
        Ok(())
    }

    /// Stop streaming. Does nothing unless currently streaming.
    pub fn stop(&mut self) -> crate::Result<()> {
        if self.state() != ControllerState::Streaming {
            return Ok(());
        }
        match self.api.uninit() {
            Ok(()) => {
                self.shared.is_streaming.store(false, Ordering::Release);
                self.state = ControllerState::Stopped;
                info!("Streaming stopped");
                Ok(())
            }
            Err(status) => Err(Error::Device {
                op: "uninit",
                status,
            }),
        }
    }

    /// Release the device and close the API, whatever state we're in
    pub fn close(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Stopping during close failed: {e}");
        }
        if self.state == ControllerState::Uninitialized && self.device.is_some() {
            // Lost the stream underneath us; make sure the vendor side is torn down too
            if let Err(status) = self.api.uninit() {
                debug!(%status, "Uninit after fault failed");
            }
        }
        if let Some(device) = self.device.take() {
            match self.api.release(&device) {
                Ok(()) => info!(serial = %device.serial, "Device released"),
                Err(status) => warn!(%status, "Releasing device failed"),
            }
        }
        if self.api_open {
            match self.api.close() {
                Ok(()) => info!("Radio API closed"),
                Err(status) => warn!(%status, "Closing API failed"),
            }
            self.api_open = false;
        }
        self.shared.is_streaming.store(false, Ordering::Release);
        self.shared.reset_buffer();
        self.state = ControllerState::Released;
    }

    pub fn get_samples(&self, n: usize) -> Option<Vec<ComplexSample>> {
        self.shared.ring.pull(n)
    }

    pub fn get_stats(&self) -> AcquisitionStats {
        self.shared.stats()
    }
}

impl SampleSource for StreamState {
    fn pull(&self, n: usize) -> Option<Vec<ComplexSample>> {
        self.ring.pull(n)
    }
}

impl<A: RadioApi> SampleSource for AcquisitionController<A> {
    fn pull(&self, n: usize) -> Option<Vec<ComplexSample>> {
        self.get_samples(n)
    }
}

impl<A: RadioApi> Drop for AcquisitionController<A> {
    fn drop(&mut self) {
        if self.state != ControllerState::Released {
            self.close();
        }
    }
}
