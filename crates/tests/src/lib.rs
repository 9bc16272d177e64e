//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置 -> 驱动 -> 引擎 的完整链路
//! - 基于 mock 驱动的 e2e 采集测试（无需真实设备）

#[cfg(test)]
mod contract_tests {
    use contracts::{CaptureError, SyncLoss};

    #[test]
    fn test_capture_codes_are_stable() {
        // 与原有 C API 的返回值保持一致
        assert_eq!(CaptureError::Undefined.code(), -6);
        assert_eq!(CaptureError::NoCallback.code(), -5);
        assert_eq!(CaptureError::SyncLost(SyncLoss::WaitTimedOut).code(), -4);
        assert_eq!(CaptureError::Busy.code(), -3);
        assert_eq!(CaptureError::NoDevices.code(), -2);
        assert_eq!(CaptureError::Halted.code(), -1);
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{CaptureError, DriverConfig, SyncEngineConfig};
    use frame_grabber::{MockDriver, MockSchedule};
    use observability::CaptureStatsAggregator;
    use sync_engine::SyncEngine;

    const DEV_A: &str = "/dev/null";
    const DEV_B: &str = "/dev/zero";

    fn schedule(period_ms: u64, phase_ms: u64) -> MockSchedule {
        MockSchedule {
            frame_bytes: 16,
            ..MockSchedule::new(
                Duration::from_millis(period_ms),
                Duration::from_millis(phase_ms),
            )
        }
    }

    /// 两个 40ms 周期、相差 2ms 的设备：5 次回调，每次离散度都在窗口内
    #[test]
    fn test_e2e_two_skewed_devices() {
        let driver = MockDriver::new()
            .with_schedule(DEV_A, schedule(40, 0))
            .with_schedule(DEV_B, schedule(40, 2));
        let mut engine = SyncEngine::new(driver);
        let a = engine.register_device(DEV_A, None).unwrap();
        let b = engine.register_device(DEV_B, None).unwrap();
        assert_ne!(a, b);

        let spreads = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&spreads);
        engine.register_callback(move |_, frames| {
            assert_eq!(frames.len(), 2);
            sink.lock().unwrap().push(frames.spread());
        });

        assert_eq!(engine.capture(Some(5)), Ok(5));

        let spreads = spreads.lock().unwrap();
        assert_eq!(spreads.len(), 5);
        assert!(
            spreads.iter().all(|s| *s < Duration::from_millis(22)),
            "spreads out of window: {spreads:?}"
        );
    }

    /// 回调中看到的图像来自对应的缓冲槽
    #[test]
    fn test_images_match_their_slots() {
        let driver = MockDriver::new()
            .with_schedule(DEV_A, schedule(20, 0))
            .with_schedule(DEV_B, schedule(20, 1));
        let mut engine = SyncEngine::new(driver);
        engine.register_device(DEV_A, None).unwrap();
        engine.register_device(DEV_B, None).unwrap();

        let checked = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&checked);
        engine.register_callback(move |engine, frames| {
            for frame in frames {
                let slot = frame.slot().expect("delivered frames carry a slot");
                let image = engine.image(frame).expect("image is mapped");
                assert_eq!(image.len(), 16);
                assert!(image.iter().all(|b| *b == slot as u8));
                *counter.lock().unwrap() += 1;
            }
        });

        assert_eq!(engine.capture(Some(4)), Ok(4));
        assert_eq!(*checked.lock().unwrap(), 8);
    }

    /// 配置文件 -> MockDriver -> SyncEngine
    #[test]
    fn test_config_drives_engine() {
        let content = r#"
[engine]
in_sync_ms = 10.0
no_sync_ms = 100.0
start_offset_ms = 40.0
buffer_count = 4

[[devices]]
path = "/dev/null"

[[devices]]
path = "/dev/zero"
phase_ms = 1.0

[capture]
frames = 3
repetitions = 2
pause_ms = 0

[driver]
kind = "mock"
period_ms = 20.0
frame_bytes = 32
"#;
        let config = ConfigLoader::load_from_str(content, ConfigFormat::Toml).unwrap();
        let DriverConfig::Mock(ref mock) = config.driver else {
            panic!("expected mock driver");
        };

        let driver = config.devices.iter().fold(MockDriver::new(), |driver, device| {
            driver.with_schedule(
                device.path.clone(),
                MockSchedule::from_config(mock, device.phase_ms),
            )
        });
        let mut engine = SyncEngine::with_config(driver, config.to_sync_engine_config());
        for path in config.device_paths() {
            engine.register_device(path, None).unwrap();
        }
        assert_eq!(engine.device_count(), 2);
        for device in engine.devices() {
            assert_eq!(device.buffer_count(), 4);
        }

        let mut stats = CaptureStatsAggregator::new();
        engine.register_callback(|_, _| {});
        for _ in 0..config.capture.repetitions {
            let result = engine.capture(config.capture.max_frames());
            assert_eq!(result, Ok(3));
            stats.record_run(&result, Duration::from_millis(60), Duration::from_millis(60));
        }

        let summary = stats.summary();
        assert_eq!(summary.completed_runs, 2);
        assert_eq!(summary.total_frames, 6);
    }

    /// 设备始终错开时采集以 SyncLost 结束，引擎仍可继续使用
    #[test]
    fn test_sync_lost_then_recover() {
        let driver = MockDriver::new()
            .with_schedule(DEV_A, schedule(40, 0))
            .with_schedule(DEV_B, schedule(40, 20));
        let config = SyncEngineConfig {
            in_sync_ms: 10.0,
            ..SyncEngineConfig::default()
        };
        let mut engine = SyncEngine::with_config(driver, config);
        engine.register_device(DEV_A, None).unwrap();
        let b = engine.register_device(DEV_B, None).unwrap();
        engine.register_callback(|_, _| {});

        let result = engine.capture(Some(5));
        assert!(
            matches!(result, Err(CaptureError::SyncLost(_))),
            "unexpected result {result:?}"
        );
        assert!(!engine.is_busy());

        engine.deregister_device(b).unwrap();
        assert_eq!(engine.capture(Some(2)), Ok(2));
    }

    /// 从另一个任务停止无限采集
    #[tokio::test]
    async fn test_halt_from_another_task() {
        let driver = MockDriver::new()
            .with_schedule(DEV_A, schedule(40, 0))
            .with_schedule(DEV_B, schedule(40, 2));
        let mut engine = SyncEngine::new(driver);
        engine.register_device(DEV_A, None).unwrap();
        engine.register_device(DEV_B, None).unwrap();
        engine.register_callback(|_, _| {});

        let halt = engine.halt_handle();
        let capture = tokio::task::spawn_blocking(move || {
            let result = engine.capture(None);
            (result, engine)
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        halt.halt();

        let joined = tokio::time::timeout(Duration::from_secs(5), capture).await;
        assert!(joined.is_ok(), "capture did not stop");
        let (result, mut engine) = joined.unwrap().unwrap();
        assert_eq!(result, Err(CaptureError::Halted));
        assert!(!halt.is_pending());

        // halt 已被消费，下一次采集正常进行
        assert_eq!(engine.capture(Some(1)), Ok(1));
    }
}
