//! 配置校验模块
//!
//! 校验规则：
//! - 至少一个设备
//! - 设备路径非空且唯一
//! - 同步窗口合法 (in_sync < no_sync, buffer_count >= 2)
//! - 采集次数 > 0
//! - mock: period_ms > 0, jitter_ms 非负
//! - v4l2: 分辨率 > 0, fourcc 为 1..=4 个 ASCII 字符

use std::collections::HashSet;

use contracts::{ContractError, DriverConfig, GrabberConfig, MockDriverConfig, V4l2Config};

/// 校验 GrabberConfig 配置
///
/// 返回第一个遇到的错误，或 Ok(())。
pub fn validate(config: &GrabberConfig) -> Result<(), ContractError> {
    validate_devices(config)?;
    validate_engine(config)?;
    validate_capture(config)?;
    validate_driver(config)?;
    Ok(())
}

/// 校验设备列表
fn validate_devices(config: &GrabberConfig) -> Result<(), ContractError> {
    if config.devices.is_empty() {
        return Err(ContractError::config_validation(
            "devices",
            "at least one device is required",
        ));
    }

    let mut seen = HashSet::new();
    for (index, device) in config.devices.iter().enumerate() {
        if device.path.as_os_str().is_empty() {
            return Err(ContractError::config_validation(
                format!("devices[{index}].path"),
                "device path must not be empty",
            ));
        }
        if !seen.insert(&device.path) {
            return Err(ContractError::config_validation(
                format!("devices[path={}]", device.path.display()),
                "duplicate device path",
            ));
        }
        if !device.phase_ms.is_finite() || device.phase_ms < 0.0 {
            return Err(ContractError::config_validation(
                format!("devices[{index}].phase_ms"),
                format!("phase_ms must be >= 0, got {}", device.phase_ms),
            ));
        }
    }
    Ok(())
}

/// 校验同步窗口 (含帧数换算后的结果)
fn validate_engine(config: &GrabberConfig) -> Result<(), ContractError> {
    let prefix = if config.timing.is_some() {
        "timing"
    } else {
        "engine"
    };
    config
        .to_sync_engine_config()
        .validate()
        .map_err(|e| match e {
            ContractError::ConfigValidation { field, message } => {
                ContractError::config_validation(format!("{prefix}.{field}"), message)
            }
            other => other,
        })
}

/// 校验采集参数
fn validate_capture(config: &GrabberConfig) -> Result<(), ContractError> {
    if config.capture.repetitions == 0 {
        return Err(ContractError::config_validation(
            "capture.repetitions",
            "repetitions must be > 0",
        ));
    }
    Ok(())
}

/// 校验驱动参数
fn validate_driver(config: &GrabberConfig) -> Result<(), ContractError> {
    match &config.driver {
        DriverConfig::Mock(mock) => validate_mock(mock),
        DriverConfig::V4l2(v4l2) => validate_v4l2(v4l2),
    }
}

fn validate_mock(mock: &MockDriverConfig) -> Result<(), ContractError> {
    if !mock.period_ms.is_finite() || mock.period_ms <= 0.0 {
        return Err(ContractError::config_validation(
            "driver.period_ms",
            format!("period_ms must be > 0, got {}", mock.period_ms),
        ));
    }
    if let Some((index, jitter)) = mock
        .jitter_ms
        .iter()
        .enumerate()
        .find(|(_, j)| !j.is_finite() || **j < 0.0)
    {
        return Err(ContractError::config_validation(
            format!("driver.jitter_ms[{index}]"),
            format!("jitter must be >= 0, got {jitter}"),
        ));
    }
    if mock.frame_bytes == 0 {
        return Err(ContractError::config_validation(
            "driver.frame_bytes",
            "frame_bytes must be > 0",
        ));
    }
    Ok(())
}

fn validate_v4l2(v4l2: &V4l2Config) -> Result<(), ContractError> {
    if v4l2.width == 0 || v4l2.height == 0 {
        return Err(ContractError::config_validation(
            "driver.width",
            format!(
                "frame size must be non-zero, got {}x{}",
                v4l2.width, v4l2.height
            ),
        ));
    }
    let len = v4l2.fourcc.len();
    if !(1..=4).contains(&len) || !v4l2.fourcc.is_ascii() {
        return Err(ContractError::config_validation(
            "driver.fourcc",
            format!("fourcc must be 1 to 4 ASCII characters, got {:?}", v4l2.fourcc),
        ));
    }
    Ok(())
}
