//! Command-line interface for unitctl.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{
    config::SupervisorConfig,
    constants::{DEFAULT_SERVICE_DIR, DEFAULT_STATE_FILE},
};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let level = match trimmed.to_ascii_lowercase().as_str() {
            "off" | "quiet" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for unitctl.
#[derive(Parser, Debug)]
#[command(name = "unitctl", version)]
#[command(
    about = "Start, stop and inspect services described by systemd-style unit files",
    long_about = None
)]
pub struct Cli {
    /// Directory containing `<name>.service` unit files.
    #[arg(long, value_name = "PATH", global = true, default_value = DEFAULT_SERVICE_DIR)]
    pub service_dir: PathBuf,

    /// Registry file shared by every invocation.
    #[arg(long, value_name = "PATH", global = true, default_value = DEFAULT_STATE_FILE)]
    pub state_file: PathBuf,

    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Supervisor configuration described by the global flags.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(Some(self.service_dir.clone()), Some(self.state_file.clone()))
    }
}

/// Available commands for unitctl.
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start a service from its unit file.
    Start {
        /// Service name, with or without the `.service` suffix.
        service: String,
    },

    /// Stop a running service.
    Stop {
        /// Service name, with or without the `.service` suffix.
        service: String,
    },

    /// Stop and then start a service.
    Restart {
        /// Service name, with or without the `.service` suffix.
        service: String,
    },

    /// Show the status of one service.
    Status {
        /// Service name, with or without the `.service` suffix.
        service: String,

        /// Emit machine-readable JSON output.
        #[arg(long)]
        json: bool,
    },

    /// List every known service.
    ListUnits {
        /// Emit machine-readable JSON output instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Re-read unit files and flag running services whose command changed.
    DaemonReload,
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
