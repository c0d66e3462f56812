//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use dispenser_core::PillSize;
use dispenser_traits::WallTime;
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "dispenser", version, about = "Medication dispenser controller")]
pub struct Cli {
    /// Path to config TOML; built-in defaults when omitted
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra schedules from a CSV file (strict header)
    #[arg(long, value_name = "FILE")]
    pub schedules: Option<PathBuf>,

    /// Log and report as JSON lines instead of pretty text
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the scheduling loop until Ctrl-C
    Run {
        /// Replay from a simulated wall time instead of the system clock,
        /// e.g. "mon 07:55". Ticks advance without sleeping.
        #[arg(long, value_name = "WHEN", value_parser = parse_wall_time)]
        sim_start: Option<WallTime>,
        /// Stop after this many ticks
        #[arg(long, value_name = "N")]
        max_ticks: Option<u64>,
    },
    /// Dispense one pill now, bypassing the schedule
    Dispense {
        /// Dispenser index (0-based)
        #[arg(long)]
        dispenser: u8,
        /// Pill size: small, medium, large or custom
        #[arg(long, default_value = "medium", value_parser = parse_size)]
        size: PillSize,
        /// Label the request as a remote command instead of a manual test
        #[arg(long, action = ArgAction::SetTrue)]
        remote: bool,
    },
    /// Bring the actuation channel up and report its state
    SelfCheck,
    /// Run the bus recovery sequence (re-handshake on a relay channel)
    RecoverBus,
    /// List the loaded schedules
    Schedules {
        /// Also report the next dose after this wall time, e.g. "tue 07:00"
        #[arg(long, value_name = "WHEN", value_parser = parse_wall_time)]
        at: Option<WallTime>,
    },
}

fn parse_wall_time(s: &str) -> Result<WallTime, String> {
    s.parse::<WallTime>().map_err(|e| e.to_string())
}

fn parse_size(s: &str) -> Result<PillSize, String> {
    s.parse::<PillSize>().map_err(|e| e.to_string())
}
