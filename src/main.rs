use std::{
    thread,
    time::{Duration, Instant},
};

use clap::Parser;
use crossbeam_channel::{bounded, select, tick, Receiver};
use hi_slurper::{
    args::{convert_filter, Args},
    calibration::CalibrationState,
    config::Config,
    controller::{AcquisitionController, ControllerState},
    device::DeviceParams,
    exfil::Exporter,
    integration::IntegrationPhase,
    monitoring::StatsMonitor,
    pipeline::{Frame, Pipeline},
    sim::{SimLine, SimulatedRadio},
    Error,
};
use tracing::{debug, error, info, warn};

// Amplitude of the simulated line in ADC counts
const SIM_LINE_AMPLITUDE: f64 = 200.0;

fn load_config(args: &Args) -> hi_slurper::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(n) = args.integrate {
        config.processing.integration_count = n as usize;
    }
    if let Some(window) = args.window {
        config.processing.window = window;
    }
    if let Some(fft_size) = args.fft_size {
        config.processing.fft_size = fft_size;
        config.processing.ring_capacity = config.processing.ring_capacity.max(2 * fft_size);
    }
    config.validate()?;
    Ok(config)
}

/// Stand-in for a live display: report the strongest bin of each frame
fn display_consumer(frames: Receiver<Frame>) {
    for frame in frames {
        if let Some((idx, power)) = frame.spectrum.peak() {
            debug!(
                cycle = frame.cycle,
                peak_mhz = frame.spectrum.frequencies[idx],
                peak_km_s = frame.velocity_km_s[idx],
                power_db = power,
                "Live spectrum"
            );
        }
        if let Some(progress) = frame.progress {
            if frame.cycle % 10 == 0 || frame.completed {
                info!("Integration {progress}");
            }
        }
    }
}

fn main() -> hi_slurper::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    let config = load_config(&args)?;
    let calibration = if args.calibration.exists() {
        CalibrationState::load(&args.calibration)?
    } else {
        config.calibration
    };
    info!(
        ppm = calibration.ppm_offset,
        khz = calibration.khz_offset,
        enabled = calibration.enabled,
        "Calibration"
    );
    let exporter = Exporter::new(&args.output, args.format);

    // Hardware
    let radio = SimulatedRadio::new().with_line(Some(SimLine {
        offset_khz: args.line_offset_khz,
        amplitude: SIM_LINE_AMPLITUDE,
    }));
    let mut controller = AcquisitionController::new(radio, &config);
    controller.initialize()?;
    controller.configure_and_start(&DeviceParams::from_config(&config))?;
    let stream = controller.stream_state();

    // Processing
    let auto_save = config.processing.integration_auto_save;
    let mut pipeline = Pipeline::new(&config, calibration);
    if auto_save {
        pipeline = pipeline.with_autosave(exporter.clone());
    }
    let integrator = pipeline.integrator();
    integrator
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .start(config.processing.integration_count);

    // Interrupts come in on a channel so the main loop can select on them
    let (stop_s, stop_r) = bounded(1);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = stop_s.try_send(());
    }) {
        warn!("Couldn't install Ctrl-C handler: {e}");
    }

    let (frame_s, frame_r) = bounded(4);
    let display = thread::Builder::new()
        .name("display".to_owned())
        .spawn(move || display_consumer(frame_r))?;

    let ticker = tick(Duration::from_millis(config.processing.refresh_ms));
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let mut monitor = StatsMonitor::new(config.sample_rate_hz());

    info!("Starting pipeline");
    loop {
        select! {
            recv(stop_r) -> _ => {
                info!("Interrupted");
                break;
            }
            recv(ticker) -> _ => {
                if controller.state() != ControllerState::Streaming {
                    error!("Lost the device, stopping");
                    break;
                }
                let completed = match pipeline.cycle(stream.as_ref())? {
                    Some(frame) => {
                        let completed = frame.completed;
                        // The display may lag; drop frames rather than wait on it
                        let _ = frame_s.try_send(frame);
                        completed
                    }
                    None => false,
                };
                monitor.tick(stream.stats());
                if completed {
                    break;
                }
                if deadline.map_or(false, |d| Instant::now() >= d) {
                    info!("Duration elapsed");
                    break;
                }
            }
        }
    }

    // Save whatever was integrated
    let product = {
        let mut integ = integrator
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        integ.stop();
        let already_saved = auto_save && integ.phase() == IntegrationPhase::Complete;
        if already_saved {
            None
        } else {
            Some(integ.finalize_for_save())
        }
    };
    match product {
        Some(Ok(product)) => {
            exporter.save(&product)?;
        }
        Some(Err(Error::InvalidState { .. })) => warn!("Nothing was integrated, not saving"),
        Some(Err(e)) => return Err(e),
        None => {}
    }
    if args.save_spectrum {
        match pipeline.last_spectrum() {
            Some(spectrum) => {
                exporter.save_spectrum(&spectrum)?;
            }
            None => warn!("No spectrum captured, not saving"),
        }
    }

    if args.auto_calibrate {
        match pipeline.auto_calibrate() {
            Ok(outcome) if outcome.is_weak() => {
                let r = outcome.result();
                warn!(
                    snr_db = r.snr_db,
                    correction_khz = r.correction_khz,
                    "Hydrogen peak is weak, calibration not applied"
                );
            }
            Ok(outcome) => {
                let r = outcome.result();
                info!(
                    peak_mhz = r.peak_freq_mhz,
                    snr_db = r.snr_db,
                    error_khz = r.error_khz,
                    "Found hydrogen peak"
                );
                pipeline.apply_calibration(&outcome).save(&args.calibration)?;
            }
            Err(e) => warn!("Auto-calibration failed: {e}"),
        }
    }

    let stats = controller.get_stats();
    info!(
        total = stats.total_samples,
        overloads = stats.overload_count,
        cycles = pipeline.cycles(),
        "Run finished"
    );
    controller.stop()?;
    controller.close();
    drop(frame_s);
    let _ = display.join();
    Ok(())
}
