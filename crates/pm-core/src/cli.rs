//! Command-line interface.
//!
//! The same parser reads the flags a person types and the flags the
//! continuation artifact replays after a restart; the hidden flags only
//! ever come from the latter.

use crate::logging::LogLevel;
use clap::builder::{PossibleValuesParser, TypedValueParser};
use clap::Parser;
use pm_common::Operation;
use std::path::PathBuf;

/// Log levels accepted on the command line.
pub const LOG_LEVEL_CHOICES: [&str; 6] = ["notset", "debug", "info", "warning", "error", "critical"];

#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "pm-core")]
#[command(version, about = "Run power management operation as many times as needed")]
#[command(
    after_help = "Arguments after -- are passed to the underlying command: pm-suspend, pm-hibernate, poweroff or reboot."
)]
pub struct Cli {
    /// Power management operation to be performed
    #[arg(value_enum)]
    pub operation: Operation,

    /// Number of times that the power management operation has to be repeated
    #[arg(short, long, default_value_t = 1)]
    pub repetitions: u32,

    /// Timeout in seconds for the wakeup alarm (not scheduled for reboot)
    #[arg(short, long, default_value_t = 60)]
    pub wakeup: u64,

    /// Minimum time in seconds that each cycle should take
    /// (0 for reboot and wakeup time minus two seconds otherwise)
    #[arg(long)]
    pub min_pm_time: Option<u64>,

    /// Maximum time in seconds that each cycle should take
    #[arg(long, default_value_t = 300)]
    pub max_pm_time: u64,

    /// Delay in seconds after hardware information has been gathered and
    /// before executing the power management operation
    #[arg(long, default_value_t = 5)]
    pub pm_delay: u64,

    /// Delay in seconds before gathering hardware information
    #[arg(long, default_value_t = 30)]
    pub hardware_delay: u64,

    /// Don't show any notice when the test ends, for automated runs
    #[arg(long)]
    pub silent: bool,

    /// Console log level [default: PM_LOG, else info]
    #[arg(
        long,
        value_parser = PossibleValuesParser::new(LOG_LEVEL_CHOICES)
            .map(|level| level.parse::<LogLevel>().unwrap_or_default())
    )]
    pub log_level: Option<LogLevel>,

    /// Settings file (paths and external tools)
    #[arg(long, env = "PM_CORE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Campaign start time (epoch seconds)
    #[arg(long, hide = true)]
    pub start: Option<i64>,

    /// Time the previous operation was issued (epoch seconds)
    #[arg(long, hide = true)]
    pub pm_timestamp: Option<i64>,

    /// Repetitions requested when the campaign started
    #[arg(long, hide = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub total: Option<u32>,

    /// Keep writing the existing campaign log
    #[arg(long, hide = true)]
    pub append: bool,

    /// Extra arguments for the power command
    #[arg(last = true)]
    pub extra_args: Vec<String>,
}
