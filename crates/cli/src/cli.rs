//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use observability::LogTarget;

/// multi-gee - synchronized capture from several video devices
#[derive(Parser, Debug)]
#[command(
    name = "multi-gee",
    author,
    version,
    about = "Synchronized multi-camera frame capture",
    long_about = "Captures frame sets from several free-running video devices.\n\n\
                  Each run waits for frames whose timestamps fall inside the in-sync \n\
                  window and reports timing and overhead per run."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "MULTI_GEE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "compact",
        global = true,
        env = "MULTI_GEE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Log destination: "stderr", "stdout" or a file path
    #[arg(long, default_value = "stderr", global = true, env = "MULTI_GEE_LOG_TARGET")]
    pub log_target: LogTarget,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run repeated captures and report timing
    Run(RunArgs),

    /// Validate configuration file without running
    Validate(ValidateArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(short, long, env = "MULTI_GEE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Device to capture from (repeatable, replaces the configured list)
    #[arg(short, long = "device", value_name = "PATH")]
    pub devices: Vec<PathBuf>,

    /// Capture driver
    #[arg(long, value_enum, env = "MULTI_GEE_DRIVER")]
    pub driver: Option<DriverKind>,

    /// Max timestamp spread that still counts as in sync (frames)
    #[arg(long, value_name = "FRAMES")]
    pub in_sync: Option<f64>,

    /// Spread or time without sync that ends a run (frames)
    #[arg(long, value_name = "FRAMES")]
    pub no_sync: Option<f64>,

    /// Assumed distance to the previous sync point at capture start (frames)
    #[arg(long, value_name = "FRAMES")]
    pub start_offset: Option<f64>,

    /// Tolerance added to frame-count windows (percent, default 5)
    #[arg(long, value_name = "PERCENT")]
    pub tolerance: Option<f64>,

    /// Number of capture buffers per device (>1)
    #[arg(long, env = "MULTI_GEE_BUFFERS")]
    pub buffers: Option<u32>,

    /// Synced frames per run (0 = until stopped)
    #[arg(short = 'n', long)]
    pub frames: Option<u32>,

    /// Number of runs
    #[arg(short, long)]
    pub repetitions: Option<u32>,

    /// Pause before each run in milliseconds
    #[arg(long)]
    pub pause_ms: Option<u64>,

    /// Mock frame period in milliseconds
    #[arg(long)]
    pub period_ms: Option<f64>,

    /// Mock phase step between consecutive devices in milliseconds
    #[arg(long)]
    pub skew_ms: Option<f64>,

    /// Print every delivered frame set
    #[arg(long)]
    pub show_frames: bool,

    /// Validate configuration and exit without capturing
    #[arg(long)]
    pub dry_run: bool,

    /// Metrics server port (0 = disabled)
    #[arg(long, default_value = "0", env = "MULTI_GEE_METRICS_PORT")]
    pub metrics_port: u16,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "multi-gee.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Capture driver selection
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverKind {
    /// Software devices on a fixed schedule
    Mock,
    /// V4L2 mmap streaming
    V4l2,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    Pretty,
    /// Compact single-line format
    #[default]
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "multi-gee",
            "run",
            "-d",
            "/dev/video0",
            "-d",
            "/dev/video1",
            "--in-sync",
            "0.5",
            "--no-sync",
            "4",
            "--buffers",
            "3",
            "-n",
            "5",
            "--driver",
            "mock",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.devices.len(), 2);
        assert_eq!(args.in_sync, Some(0.5));
        assert_eq!(args.buffers, Some(3));
        assert_eq!(args.frames, Some(5));
        assert_eq!(args.driver, Some(DriverKind::Mock));
        assert!(args.config.is_none());
    }

    #[test]
    fn test_log_target_flag() {
        let cli = Cli::try_parse_from([
            "multi-gee",
            "--log-target",
            "/tmp/multi-gee.log",
            "validate",
        ])
        .unwrap();
        assert!(matches!(cli.log_target, LogTarget::File(_)));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        let result = Cli::try_parse_from(["multi-gee", "-q", "-v", "validate"]);
        assert!(result.is_err());
    }
}
