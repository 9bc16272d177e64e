//! `run` command implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use config_loader::ConfigLoader;
use contracts::{
    CaptureError, DeviceConfig, DriverConfig, FrameTiming, GrabberConfig, MockDriverConfig,
    Timestamp, V4l2Config, PAL_FRAME_PERIOD_MS,
};
use frame_grabber::{CaptureDriver, MockDriver, MockSchedule};
use observability::CaptureStatsAggregator;
use sync_engine::{FrameSet, SyncEngine};

use crate::cli::{DriverKind, RunArgs};
use crate::error::CliError;

type Engine = SyncEngine<Box<dyn CaptureDriver>>;

/// Repetition settings handed to the capture thread
#[derive(Debug, Clone)]
struct RunPlan {
    frames: Option<u32>,
    repetitions: u32,
    pause: Duration,
    /// Frames times frame period; subtracted from the run time as overhead
    expected: Duration,
}

/// Execute the `run` command
pub async fn run_capture(args: &RunArgs) -> Result<()> {
    let config = build_config(args)?;
    ConfigLoader::validate(&config).context("Invalid capture configuration")?;

    let engine_config = config.to_sync_engine_config();
    info!(
        devices = config.devices.len(),
        driver = driver_name(&config.driver),
        in_sync_ms = engine_config.in_sync_ms,
        no_sync_ms = engine_config.no_sync_ms,
        start_offset_ms = engine_config.start_offset_ms,
        buffers = engine_config.buffer_count,
        frames = config.capture.frames,
        repetitions = config.capture.repetitions,
        "Configuration loaded"
    );

    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&config);
        return Ok(());
    }

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    let mut engine = SyncEngine::with_config(build_driver(&config)?, engine_config);
    register_devices(&mut engine, &config.devices)?;

    let stats = Arc::new(Mutex::new(CaptureStatsAggregator::new()));
    engine.register_callback(frame_reporter(args.show_frames, Arc::clone(&stats)));

    // Setup graceful shutdown handler
    let stop = Arc::new(AtomicBool::new(false));
    let signal_task = {
        let stop = Arc::clone(&stop);
        let halt = engine.halt_handle();
        tokio::spawn(async move {
            shutdown_signal().await;
            warn!("Received shutdown signal, halting capture...");
            stop.store(true, Ordering::SeqCst);
            halt.halt();
        })
    };

    let plan = RunPlan {
        frames: config.capture.max_frames(),
        repetitions: config.capture.repetitions,
        pause: Duration::from_millis(config.capture.pause_ms),
        expected: expected_duration(&config),
    };

    info!("Starting capture...");
    let runner = {
        let stats = Arc::clone(&stats);
        let stop = Arc::clone(&stop);
        tokio::task::spawn_blocking(move || run_repetitions(engine, &plan, &stats, &stop))
    };
    runner.await.context("Capture thread panicked")?;
    signal_task.abort();

    let summary = lock(&stats).summary();
    println!("\n{summary}");

    if summary.runs > 0 && summary.completed_runs == 0 && !stop.load(Ordering::SeqCst) {
        return Err(CliError::NoCompletedRun { runs: summary.runs }.into());
    }

    info!("multi-gee finished");
    Ok(())
}

/// Load the configuration file, or start from defaults, then apply flags
fn build_config(args: &RunArgs) -> Result<GrabberConfig> {
    let mut config = match &args.config {
        Some(path) => {
            if !path.exists() {
                return Err(CliError::config_not_found(path.display().to_string()).into());
            }
            ConfigLoader::load_from_path(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?
        }
        None => {
            if args.devices.is_empty() {
                return Err(CliError::NoDevices.into());
            }
            GrabberConfig {
                version: Default::default(),
                engine: Default::default(),
                timing: None,
                devices: Vec::new(),
                capture: Default::default(),
                driver: Default::default(),
            }
        }
    };

    apply_overrides(&mut config, args);
    Ok(config)
}

/// Apply command-line overrides on top of the loaded configuration
fn apply_overrides(config: &mut GrabberConfig, args: &RunArgs) {
    match (args.driver, &config.driver) {
        (Some(DriverKind::Mock), DriverConfig::V4l2(_)) => {
            config.driver = DriverConfig::Mock(MockDriverConfig::default());
        }
        (Some(DriverKind::V4l2), DriverConfig::Mock(_)) => {
            config.driver = DriverConfig::V4l2(V4l2Config::default());
        }
        _ => {}
    }

    if let (Some(period_ms), DriverConfig::Mock(mock)) = (args.period_ms, &mut config.driver) {
        mock.period_ms = period_ms;
    }

    if !args.devices.is_empty() {
        config.devices = args
            .devices
            .iter()
            .map(|path| DeviceConfig {
                path: path.clone(),
                phase_ms: 0.0,
            })
            .collect();
    }
    if let Some(skew_ms) = args.skew_ms {
        for (index, device) in config.devices.iter_mut().enumerate() {
            device.phase_ms = skew_ms * index as f64;
        }
    }

    let frame_flags = [args.in_sync, args.no_sync, args.start_offset, args.tolerance];
    if frame_flags.iter().any(Option::is_some) {
        let period_ms = mock_period_ms(&config.driver);
        let timing = config.timing.get_or_insert_with(|| FrameTiming {
            frame_period_ms: period_ms.unwrap_or(PAL_FRAME_PERIOD_MS),
            ..FrameTiming::default()
        });
        if let Some(frames) = args.in_sync {
            timing.in_sync_frames = frames;
        }
        if let Some(frames) = args.no_sync {
            timing.no_sync_frames = frames;
        }
        if let Some(frames) = args.start_offset {
            timing.start_offset_frames = frames;
        }
        if let Some(percent) = args.tolerance {
            timing.tolerance_percent = percent;
        }
    }

    if let Some(buffers) = args.buffers {
        config.engine.buffer_count = buffers;
    }
    if let Some(frames) = args.frames {
        config.capture.frames = frames;
    }
    if let Some(repetitions) = args.repetitions {
        config.capture.repetitions = repetitions;
    }
    if let Some(pause_ms) = args.pause_ms {
        config.capture.pause_ms = pause_ms;
    }
}

fn mock_period_ms(driver: &DriverConfig) -> Option<f64> {
    match driver {
        DriverConfig::Mock(mock) => Some(mock.period_ms),
        DriverConfig::V4l2(_) => None,
    }
}

fn driver_name(driver: &DriverConfig) -> &'static str {
    match driver {
        DriverConfig::Mock(_) => "mock",
        DriverConfig::V4l2(_) => "v4l2",
    }
}

/// Nominal duration of one complete run
fn expected_duration(config: &GrabberConfig) -> Duration {
    let period_ms = config
        .timing
        .as_ref()
        .map(|timing| timing.frame_period_ms)
        .or_else(|| mock_period_ms(&config.driver))
        .unwrap_or(PAL_FRAME_PERIOD_MS);
    let nanos = period_ms * f64::from(config.capture.frames) * 1_000_000.0;
    Duration::from_nanos(nanos.round().max(0.0) as u64)
}

fn build_driver(config: &GrabberConfig) -> Result<Box<dyn CaptureDriver>> {
    match &config.driver {
        DriverConfig::Mock(mock) => {
            let driver = config.devices.iter().fold(
                MockDriver::new().with_default_schedule(MockSchedule::from_config(mock, 0.0)),
                |driver, device| {
                    driver.with_schedule(
                        device.path.clone(),
                        MockSchedule::from_config(mock, device.phase_ms),
                    )
                },
            );
            Ok(Box::new(driver))
        }
        #[cfg(feature = "v4l2")]
        DriverConfig::V4l2(v4l2) => Ok(Box::new(frame_grabber::V4l2Driver::new(v4l2.clone()))),
        #[cfg(not(feature = "v4l2"))]
        DriverConfig::V4l2(_) => Err(CliError::DriverUnavailable {
            driver: "v4l2",
            feature: "v4l2",
        }
        .into()),
    }
}

fn register_devices(engine: &mut Engine, devices: &[DeviceConfig]) -> Result<()> {
    for device in devices {
        let id = engine
            .register_device(&device.path, None)
            .map_err(|e| CliError::registration(device.path.clone(), e.to_string()))?;
        println!("dev id = {id} ({})", device.path.display());
    }
    if engine.device_count() < devices.len() {
        warn!(
            configured = devices.len(),
            registered = engine.device_count(),
            "Some paths name the same device"
        );
    }
    Ok(())
}

/// Callback recording each sync point, optionally printing the frame set
fn frame_reporter(
    show_frames: bool,
    stats: Arc<Mutex<CaptureStatsAggregator>>,
) -> impl FnMut(&mut Engine, &FrameSet) + Send + 'static {
    let mut then: Option<Timestamp> = None;
    let mut count: u64 = 0;

    move |engine: &mut Engine, frames: &FrameSet| {
        let spread = frames.spread();
        lock(&stats).record_sync_point(spread);

        if !show_frames {
            return;
        }

        let now = engine.driver().now();
        println!("now: {now}");
        if let Some(then) = then {
            println!("  since last: {:.3} ms", as_ms(now.saturating_since(then)));
        }
        then = Some(now);
        println!("  count   : {count}");
        println!("  spread  : {:.3} ms", as_ms(spread));
        count += 1;

        for frame in frames {
            let name = engine
                .device(frame.device_id())
                .map(|device| device.name())
                .unwrap_or_else(|| frame.device_id().to_string());
            println!("dev: {name}");
            println!(" ts: {}", frame.timestamp());
            println!(
                "  age     : {:.3} ms",
                as_ms(now.saturating_since(frame.timestamp()))
            );
            println!("  sequence: {}", frame.sequence());
        }
        println!();
    }
}

fn run_repetitions(
    mut engine: Engine,
    plan: &RunPlan,
    stats: &Mutex<CaptureStatsAggregator>,
    stop: &AtomicBool,
) {
    for run in 0..plan.repetitions {
        if !pause(plan.pause, stop) {
            break;
        }

        let start = Timestamp::monotonic();
        let result = engine.capture(plan.frames);
        let end = Timestamp::monotonic();
        let elapsed = end.saturating_since(start);

        print_run(run, &result, plan, start, end, elapsed);
        lock(stats).record_run(&result, elapsed, plan.expected);

        if stop.load(Ordering::SeqCst) {
            break;
        }
    }
}

/// Sleep for `duration` unless stopped. Returns false when stopped.
fn pause(duration: Duration, stop: &AtomicBool) -> bool {
    const STEP: Duration = Duration::from_millis(50);

    let mut remaining = duration;
    while !remaining.is_zero() {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(STEP);
        std::thread::sleep(step);
        remaining -= step;
    }
    !stop.load(Ordering::SeqCst)
}

fn print_run(
    run: u32,
    result: &Result<u32, CaptureError>,
    plan: &RunPlan,
    start: Timestamp,
    end: Timestamp,
    elapsed: Duration,
) {
    let code = match result {
        Ok(count) => i64::from(*count),
        Err(e) => i64::from(e.code()),
    };
    println!("run {run}: capture ret = {code}");

    if let (Ok(count), Some(frames)) = (result, plan.frames) {
        if *count == frames {
            let overhead_ms = as_ms(elapsed) - as_ms(plan.expected);
            println!(" **    start: {start}");
            println!(" **      end: {end}");
            println!(" **     diff: {:.3} ms", as_ms(elapsed));
            println!(" ** overhead: {overhead_ms:.3} ms");
        }
    }

    println!("{}", outcome_message(result));
}

fn outcome_message(result: &Result<u32, CaptureError>) -> String {
    match result {
        Ok(count) => format!("captured {count} frames"),
        Err(CaptureError::Undefined) => "should not happen".to_string(),
        Err(CaptureError::NoCallback) => "no callback registered".to_string(),
        Err(CaptureError::SyncLost(loss)) => format!("sync lost: {loss}"),
        Err(CaptureError::Busy) => "multiple call to capture".to_string(),
        Err(CaptureError::NoDevices) => "no devices registered".to_string(),
        Err(CaptureError::Halted) => "capture halted".to_string(),
    }
}

/// Setup Ctrl+C and SIGTERM signal handlers
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn lock(stats: &Mutex<CaptureStatsAggregator>) -> MutexGuard<'_, CaptureStatsAggregator> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Print configuration summary for dry-run mode
fn print_config_summary(config: &GrabberConfig) {
    let engine = config.to_sync_engine_config();

    println!("\n=== Configuration Summary ===\n");
    println!("Driver: {}", driver_name(&config.driver));
    match &config.driver {
        DriverConfig::Mock(mock) => {
            println!("  Period: {} ms", mock.period_ms);
            if !mock.jitter_ms.is_empty() {
                println!("  Jitter: {:?} ms", mock.jitter_ms);
            }
        }
        DriverConfig::V4l2(v4l2) => {
            println!(
                "  Format: {}x{} {} {:?} {:?}",
                v4l2.width, v4l2.height, v4l2.fourcc, v4l2.field, v4l2.standard
            );
        }
    }

    println!("\nDevices ({}):", config.devices.len());
    for device in &config.devices {
        if device.phase_ms != 0.0 {
            println!("  - {} (phase {} ms)", device.path.display(), device.phase_ms);
        } else {
            println!("  - {}", device.path.display());
        }
    }

    println!("\nSync Settings:");
    println!("  In sync: {:.3} ms", engine.in_sync_ms);
    println!("  No sync: {:.3} ms", engine.no_sync_ms);
    println!("  Start offset: {:.3} ms", engine.start_offset_ms);
    println!("  Buffers: {}", engine.buffer_count);

    println!("\nCapture:");
    match config.capture.max_frames() {
        Some(frames) => println!("  Frames per run: {frames}"),
        None => println!("  Frames per run: unbounded"),
    }
    println!("  Repetitions: {}", config.capture.repetitions);
    println!("  Pause: {} ms", config.capture.pause_ms);

    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    use crate::cli::{Cli, Commands};

    fn run_args(argv: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(
            ["multi-gee", "run"].iter().chain(argv.iter()).copied(),
        )
        .unwrap();
        match cli.command {
            Commands::Run(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_devices_from_flags() {
        let args = run_args(&["-d", "/dev/null", "-d", "/dev/zero", "--skew-ms", "2"]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[0].phase_ms, 0.0);
        assert_eq!(config.devices[1].phase_ms, 2.0);
        assert!(ConfigLoader::validate(&config).is_ok());
    }

    #[test]
    fn test_no_devices_without_config() {
        let err = build_config(&run_args(&[])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::NoDevices)
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let err = build_config(&run_args(&["-c", "/nonexistent/multi-gee.toml"])).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::ConfigNotFound { .. })
        ));
    }

    #[test]
    fn test_frame_flags_create_timing() {
        let args = run_args(&[
            "-d",
            "/dev/null",
            "--in-sync",
            "0.5",
            "--no-sync",
            "4",
            "--start-offset",
            "2",
            "--buffers",
            "4",
        ]);
        let config = build_config(&args).unwrap();

        let timing = config.timing.as_ref().unwrap();
        assert_eq!(timing.in_sync_frames, 0.5);
        assert_eq!(timing.tolerance_percent, 5.0);

        let engine = config.to_sync_engine_config();
        assert!((engine.in_sync_ms - 21.0).abs() < 1e-9);
        assert!((engine.no_sync_ms - 168.0).abs() < 1e-9);
        assert_eq!(engine.buffer_count, 4);
    }

    #[test]
    fn test_config_file_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi-gee.toml");
        std::fs::write(
            &path,
            r#"
[[devices]]
path = "/dev/null"

[capture]
frames = 10
repetitions = 2

[driver]
kind = "v4l2"
"#,
        )
        .unwrap();

        let args = run_args(&[
            "-c",
            path.to_str().unwrap(),
            "--driver",
            "mock",
            "--period-ms",
            "20",
            "-n",
            "3",
        ]);
        let config = build_config(&args).unwrap();

        assert_eq!(config.capture.frames, 3);
        assert_eq!(config.capture.repetitions, 2);
        assert_eq!(mock_period_ms(&config.driver), Some(20.0));
        assert_eq!(expected_duration(&config), Duration::from_millis(60));
    }

    #[test]
    fn test_outcome_messages() {
        assert_eq!(outcome_message(&Ok(5)), "captured 5 frames");
        assert_eq!(
            outcome_message(&Err(CaptureError::Busy)),
            "multiple call to capture"
        );
        assert!(outcome_message(&Err(CaptureError::SyncLost(
            contracts::SyncLoss::WaitTimedOut
        )))
        .starts_with("sync lost"));
    }

    #[test]
    fn test_pause_returns_early_when_stopped() {
        let stop = AtomicBool::new(true);
        assert!(!pause(Duration::from_secs(10), &stop));

        let stop = AtomicBool::new(false);
        assert!(pause(Duration::ZERO, &stop));
    }

    #[test]
    fn test_mock_run_completes() {
        let args = run_args(&[
            "-d",
            "/dev/null",
            "-d",
            "/dev/zero",
            "--skew-ms",
            "2",
            "-n",
            "3",
            "-r",
            "2",
            "--pause-ms",
            "0",
        ]);
        let config = build_config(&args).unwrap();
        let mut engine = SyncEngine::with_config(
            build_driver(&config).unwrap(),
            config.to_sync_engine_config(),
        );
        register_devices(&mut engine, &config.devices).unwrap();

        let stats = Arc::new(Mutex::new(CaptureStatsAggregator::new()));
        engine.register_callback(frame_reporter(false, Arc::clone(&stats)));

        let plan = RunPlan {
            frames: config.capture.max_frames(),
            repetitions: config.capture.repetitions,
            pause: Duration::ZERO,
            expected: expected_duration(&config),
        };
        run_repetitions(engine, &plan, &stats, &AtomicBool::new(false));

        let summary = lock(&stats).summary();
        assert_eq!(summary.runs, 2);
        assert_eq!(summary.completed_runs, 2);
        assert_eq!(summary.total_frames, 6);
        assert_eq!(summary.spread_ms.count, 6);
    }
}
