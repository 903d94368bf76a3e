use std::{
    fs, thread,
    time::{Duration, Instant},
};

use hi_slurper::{
    calibration::CalibrationState,
    config::Config,
    controller::{AcquisitionController, ControllerState},
    device::{DeviceParams, HardwareEvent},
    exfil::{ExportFormat, Exporter},
    integration::IntegrationPhase,
    pipeline::Pipeline,
    sim::{SimLine, SimulatedRadio},
    window::WindowKind,
    HI_REST_FREQ_MHZ,
};

const LINE_OFFSET_KHZ: f64 = 200.0;

fn config() -> Config {
    let mut config = Config::default();
    config.receiver.sample_rate_mhz = 2.0;
    config.receiver.bandwidth_khz = 1536;
    config.processing.fft_size = 4096;
    config.processing.window = WindowKind::Hann;
    config.processing.integration_count = 5;
    config.processing.ring_capacity = 1 << 16;
    config.validate().unwrap();
    config
}

fn radio() -> SimulatedRadio {
    SimulatedRadio::new()
        .realtime(false)
        .with_packet_len(1008)
        .with_line(Some(SimLine {
            offset_khz: LINE_OFFSET_KHZ,
            amplitude: 400.0,
        }))
}

fn started(config: &Config) -> AcquisitionController<SimulatedRadio> {
    let mut ctl = AcquisitionController::new(radio(), config);
    ctl.initialize().unwrap();
    ctl.configure_and_start(&DeviceParams::from_config(config))
        .unwrap();
    assert_eq!(ctl.state(), ControllerState::Streaming);
    ctl
}

#[test]
fn test_integrate_and_calibrate() {
    let config = config();
    let mut ctl = started(&config);
    let stream = ctl.stream_state();
    let mut pipeline = Pipeline::new(&config, CalibrationState::default());
    let integrator = pipeline.integrator();
    integrator.lock().unwrap().start(config.processing.integration_count);

    let deadline = Instant::now() + Duration::from_secs(30);
    let mut frames = 0;
    loop {
        assert!(Instant::now() < deadline, "integration never completed");
        match pipeline.cycle(stream.as_ref()).unwrap() {
            Some(frame) => {
                frames += 1;
                assert_eq!(frame.spectrum.len(), 4096);
                if frame.completed {
                    break;
                }
            }
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    assert_eq!(frames, 5);
    let stats = ctl.get_stats();
    assert!(stats.total_samples >= 4096);
    assert!(stats.buffer_size <= stats.buffer_capacity);

    ctl.stop().unwrap();
    assert_eq!(ctl.state(), ControllerState::Stopped);

    let product = {
        let integ = integrator.lock().unwrap();
        assert_eq!(integ.phase(), IntegrationPhase::Complete);
        integ.finalize_for_save().unwrap()
    };
    assert_eq!(product.power_db.len(), 4096);
    assert_eq!(product.velocity_axis.len(), 4096);
    assert_eq!(product.metadata.integration_count, 5);
    assert_eq!(product.metadata.fft_size, 4096);

    // The line shows up at its Doppler offset, within a bin (~0.5 kHz)
    let outcome = pipeline.auto_calibrate().unwrap();
    assert!(!outcome.is_weak());
    let r = outcome.result();
    assert!((r.error_khz - LINE_OFFSET_KHZ).abs() < 1.0);
    let cal = pipeline.apply_calibration(&outcome);
    let moved = cal.effective_frequency(r.peak_freq_mhz);
    assert!((moved - HI_REST_FREQ_MHZ).abs() < 1e-9);

    let dir = tempfile::tempdir().unwrap();
    let path = Exporter::new(dir.path(), ExportFormat::Json)
        .save(&product)
        .unwrap();
    let saved: serde_json::Value = serde_json::from_slice(&fs::read(path).unwrap()).unwrap();
    assert_eq!(saved["metadata"]["target_count"], 5);
    assert_eq!(saved["power_db"].as_array().unwrap().len(), 4096);

    cal.save(&dir.path().join("calibration.json")).unwrap();
    assert_eq!(
        CalibrationState::load(&dir.path().join("calibration.json")).unwrap(),
        cal
    );

    ctl.close();
    assert_eq!(ctl.state(), ControllerState::Released);
    assert!(!ctl.api().is_streaming());
}

#[test]
fn test_autosave_on_completion() {
    let config = config();
    let mut ctl = started(&config);
    let stream = ctl.stream_state();
    let dir = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::new(&config, CalibrationState::default())
        .with_autosave(Exporter::new(dir.path(), ExportFormat::Csv));
    pipeline.integrator().lock().unwrap().start(2);

    let deadline = Instant::now() + Duration::from_secs(30);
    while !matches!(pipeline.cycle(stream.as_ref()).unwrap(), Some(f) if f.completed) {
        assert!(Instant::now() < deadline, "integration never completed");
        thread::sleep(Duration::from_millis(1));
    }
    ctl.close();

    let files: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].extension().unwrap(), "csv");
    let text = fs::read_to_string(&files[0]).unwrap();
    assert!(text.contains("# integration_count: 2"));
}

#[test]
fn test_device_removal_stops_the_run() {
    let config = config();
    let mut ctl = started(&config);
    ctl.api().emit(HardwareEvent::DeviceRemoved);
    assert_eq!(ctl.state(), ControllerState::Uninitialized);
    assert!(!ctl.get_stats().is_streaming);
    ctl.close();
    assert!(!ctl.api().is_streaming());

    // And the station comes back after a fresh initialize
    ctl.initialize().unwrap();
    ctl.configure_and_start(&DeviceParams::from_config(&config))
        .unwrap();
    assert_eq!(ctl.state(), ControllerState::Streaming);
}
