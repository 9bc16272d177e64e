//! `validate` command implementation.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use contracts::{DriverConfig, GrabberConfig};

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    driver: String,
    device_count: usize,
    in_sync_ms: f64,
    no_sync_ms: f64,
    start_offset_ms: f64,
    buffer_count: u32,
    frames: u32,
    repetitions: u32,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(config) => {
            let warnings = collect_warnings(&config);
            let engine = config.to_sync_engine_config();

            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", config.version),
                    driver: match config.driver {
                        DriverConfig::Mock(_) => "mock".to_string(),
                        DriverConfig::V4l2(_) => "v4l2".to_string(),
                    },
                    device_count: config.devices.len(),
                    in_sync_ms: engine.in_sync_ms,
                    no_sync_ms: engine.no_sync_ms,
                    start_offset_ms: engine.start_offset_ms,
                    buffer_count: engine.buffer_count,
                    frames: config.capture.frames,
                    repetitions: config.capture.repetitions,
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(config: &GrabberConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.devices.len() == 1 {
        warnings.push("Only one device configured - every frame is in sync".to_string());
    }

    if config.capture.max_frames().is_none() {
        warnings.push("capture.frames is 0 - each run lasts until sync is lost".to_string());
    }

    if let Some(ref timing) = config.timing {
        let engine = &config.engine;
        if engine.in_sync_ms != timing.frame_time_ms(timing.in_sync_frames)
            || engine.no_sync_ms != timing.frame_time_ms(timing.no_sync_frames)
        {
            warnings.push("[timing] overrides the windows in [engine]".to_string());
        }
    }

    // Mock phases further apart than the in-sync window never line up
    if let DriverConfig::Mock(_) = config.driver {
        let in_sync_ms = config.to_sync_engine_config().in_sync_ms;
        let phases = config.devices.iter().map(|device| device.phase_ms);
        let min = phases.clone().fold(f64::INFINITY, f64::min);
        let max = phases.fold(f64::NEG_INFINITY, f64::max);
        if max - min >= in_sync_ms {
            warnings.push(format!(
                "Device phases span {:.3} ms, at least the {:.3} ms in-sync window",
                max - min,
                in_sync_ms
            ));
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Driver: {}", summary.driver);
            println!("  Devices: {}", summary.device_count);
            println!(
                "  Windows: in-sync {:.3} ms, no-sync {:.3} ms, start offset {:.3} ms",
                summary.in_sync_ms, summary.no_sync_ms, summary.start_offset_ms
            );
            println!("  Buffers: {}", summary.buffer_count);
            println!(
                "  Capture: {} frames x {} runs",
                summary.frames, summary.repetitions
            );
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}
