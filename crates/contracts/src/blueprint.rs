//! GrabberConfig - Config Loader 输出
//!
//! 描述一次采集会话：同步窗口、设备列表、采集次数、驱动参数。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{FrameTiming, SyncEngineConfig};

/// 配置版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConfigVersion {
    #[default]
    V1,
}

/// 完整的采集配置蓝图
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrabberConfig {
    /// 配置版本
    #[serde(default)]
    pub version: ConfigVersion,

    /// 同步窗口 (毫秒)
    #[serde(default)]
    pub engine: SyncEngineConfig,

    /// 以帧数表示的同步窗口；存在时覆盖 `engine` 中的窗口
    #[serde(default)]
    pub timing: Option<FrameTiming>,

    /// 设备列表
    pub devices: Vec<DeviceConfig>,

    /// 采集次数与间隔
    #[serde(default)]
    pub capture: CaptureRunConfig,

    /// 驱动参数
    #[serde(default)]
    pub driver: DriverConfig,
}

/// 单个设备
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 设备节点路径 (e.g., "/dev/video0")
    pub path: PathBuf,

    /// mock 驱动下该设备相对第一帧的偏移 (毫秒)
    #[serde(default)]
    pub phase_ms: f64,
}

/// 采集参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureRunConfig {
    /// 每次采集的同步帧数；0 表示直到停止
    pub frames: u32,

    /// 采集次数
    pub repetitions: u32,

    /// 两次采集之间的等待 (毫秒)
    pub pause_ms: u64,
}

impl Default for CaptureRunConfig {
    fn default() -> Self {
        Self {
            frames: 5,
            repetitions: 5,
            pause_ms: 1000,
        }
    }
}

impl CaptureRunConfig {
    /// Frame budget for one run, `None` when unbounded.
    pub fn max_frames(&self) -> Option<u32> {
        (self.frames > 0).then_some(self.frames)
    }
}

/// 驱动选择
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DriverConfig {
    /// 软件模拟的设备
    Mock(MockDriverConfig),
    /// V4L2 mmap 流式采集
    V4l2(V4l2Config),
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig::Mock(MockDriverConfig::default())
    }
}

/// Mock 驱动参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockDriverConfig {
    /// 帧周期 (毫秒)
    pub period_ms: f64,

    /// 逐帧抖动 (毫秒)，循环使用
    pub jitter_ms: Vec<f64>,

    /// 每帧图像字节数
    pub frame_bytes: usize,
}

impl Default for MockDriverConfig {
    fn default() -> Self {
        Self {
            period_ms: crate::PAL_FRAME_PERIOD_MS,
            jitter_ms: Vec::new(),
            frame_bytes: 768 * 576,
        }
    }
}

/// 场序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrder {
    Any,
    None,
    #[default]
    Interlaced,
}

/// 视频制式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStandard {
    #[default]
    Pal,
    Ntsc,
}

/// V4L2 驱动参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct V4l2Config {
    pub input: u32,
    pub standard: VideoStandard,
    /// 制式设置失败时是否中止初始化
    pub strict_standard: bool,
    pub width: u32,
    pub height: u32,
    /// 四字符像素格式 (e.g., "GREY")
    pub fourcc: String,
    pub field: FieldOrder,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            input: 0,
            standard: VideoStandard::Pal,
            strict_standard: false,
            width: 768,
            height: 576,
            fourcc: "GREY".to_string(),
            field: FieldOrder::Interlaced,
        }
    }
}

impl GrabberConfig {
    /// Engine windows, with frame-count timing applied when configured.
    pub fn to_sync_engine_config(&self) -> SyncEngineConfig {
        match &self.timing {
            Some(timing) => timing.to_engine_config(self.engine.buffer_count),
            None => self.engine.clone(),
        }
    }

    pub fn device_paths(&self) -> impl Iterator<Item = &PathBuf> {
        self.devices.iter().map(|device| &device.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> GrabberConfig {
        GrabberConfig {
            version: ConfigVersion::V1,
            engine: SyncEngineConfig::default(),
            timing: None,
            devices: vec![
                DeviceConfig {
                    path: "/dev/video0".into(),
                    phase_ms: 0.0,
                },
                DeviceConfig {
                    path: "/dev/video1".into(),
                    phase_ms: 2.0,
                },
            ],
            capture: CaptureRunConfig::default(),
            driver: DriverConfig::default(),
        }
    }

    #[test]
    fn test_engine_config_without_timing() {
        let config = sample_config();
        assert_eq!(config.to_sync_engine_config(), SyncEngineConfig::default());
    }

    #[test]
    fn test_timing_overrides_windows_but_keeps_buffers() {
        let mut config = sample_config();
        config.engine.buffer_count = 4;
        config.timing = Some(FrameTiming {
            in_sync_frames: 1.0,
            tolerance_percent: 0.0,
            ..Default::default()
        });

        let engine = config.to_sync_engine_config();
        assert!((engine.in_sync_ms - 40.0).abs() < 1e-9);
        assert_eq!(engine.buffer_count, 4);
    }

    #[test]
    fn test_unbounded_capture() {
        let run = CaptureRunConfig {
            frames: 0,
            ..Default::default()
        };
        assert_eq!(run.max_frames(), None);
        assert_eq!(CaptureRunConfig::default().max_frames(), Some(5));
    }

    #[test]
    fn test_driver_tagging() {
        let json = r#"{"kind": "v4l2", "width": 640}"#;
        let driver: DriverConfig = serde_json::from_str(json).unwrap();
        match driver {
            DriverConfig::V4l2(v4l2) => {
                assert_eq!(v4l2.width, 640);
                assert_eq!(v4l2.height, 576);
                assert_eq!(v4l2.fourcc, "GREY");
            }
            other => panic!("unexpected driver {other:?}"),
        }
    }
}
