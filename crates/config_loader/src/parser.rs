//! 配置解析模块
//!
//! 支持 TOML (主要) 和 JSON (可选) 格式。

use contracts::{ContractError, GrabberConfig};

/// 配置文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// TOML 格式 (推荐)
    Toml,
    /// JSON 格式
    Json,
}

impl ConfigFormat {
    /// 从文件扩展名推断格式
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "toml" => Some(Self::Toml),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// 解析 TOML 格式配置
pub fn parse_toml(content: &str) -> Result<GrabberConfig, ContractError> {
    toml::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("TOML parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 解析 JSON 格式配置
pub fn parse_json(content: &str) -> Result<GrabberConfig, ContractError> {
    serde_json::from_str(content).map_err(|e| ContractError::ConfigParse {
        message: format!("JSON parse error: {e}"),
        source: Some(Box::new(e)),
    })
}

/// 根据格式解析配置
pub fn parse(content: &str, format: ConfigFormat) -> Result<GrabberConfig, ContractError> {
    match format {
        ConfigFormat::Toml => parse_toml(content),
        ConfigFormat::Json => parse_json(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DriverConfig;

    #[test]
    fn test_parse_toml_minimal() {
        let content = r#"
[[devices]]
path = "/dev/video0"

[[devices]]
path = "/dev/video1"
"#;
        let result = parse_toml(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.engine.buffer_count, 3);
        assert_eq!(config.capture.frames, 5);
        assert!(matches!(config.driver, DriverConfig::Mock(_)));
    }

    #[test]
    fn test_parse_toml_full() {
        let content = r#"
version = "V1"

[engine]
in_sync_ms = 15.0
no_sync_ms = 120.0
start_offset_ms = 40.0
buffer_count = 4

[timing]
frame_period_ms = 40.0
in_sync_frames = 0.5
no_sync_frames = 25.0
start_offset_frames = 0.0
tolerance_percent = 5.0

[[devices]]
path = "/dev/video0"

[[devices]]
path = "/dev/video1"
phase_ms = 2.5

[capture]
frames = 10
repetitions = 3
pause_ms = 500

[driver]
kind = "v4l2"
width = 640
height = 480
fourcc = "YUYV"
field = "none"
standard = "ntsc"
strict_standard = true
"#;
        let config = parse_toml(content).unwrap();
        assert_eq!(config.engine.buffer_count, 4);
        assert_eq!(config.devices[1].phase_ms, 2.5);
        assert_eq!(config.capture.repetitions, 3);
        assert!(config.timing.is_some());
        match config.driver {
            DriverConfig::V4l2(v4l2) => {
                assert_eq!(v4l2.width, 640);
                assert_eq!(v4l2.fourcc, "YUYV");
                assert!(v4l2.strict_standard);
            }
            other => panic!("unexpected driver {other:?}"),
        }
    }

    #[test]
    fn test_parse_json_minimal() {
        let content = r#"{
            "devices": [{ "path": "/dev/video0" }],
            "driver": { "kind": "mock", "period_ms": 20.0, "jitter_ms": [0.0, 1.0] }
        }"#;
        let result = parse_json(content);
        assert!(result.is_ok(), "Failed: {:?}", result.err());
        match result.unwrap().driver {
            DriverConfig::Mock(mock) => assert_eq!(mock.jitter_ms.len(), 2),
            other => panic!("unexpected driver {other:?}"),
        }
    }

    #[test]
    fn test_parse_toml_syntax_error() {
        let content = "invalid toml [[[";
        let result = parse_toml(content);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ContractError::ConfigParse { .. }));
    }

    #[test]
    fn test_missing_devices_is_parse_error() {
        let result = parse_toml("[capture]\nframes = 1\n");
        assert!(matches!(result, Err(ContractError::ConfigParse { .. })));
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ConfigFormat::from_extension("toml"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("TOML"),
            Some(ConfigFormat::Toml)
        );
        assert_eq!(
            ConfigFormat::from_extension("json"),
            Some(ConfigFormat::Json)
        );
        assert_eq!(ConfigFormat::from_extension("yaml"), None);
    }
}
