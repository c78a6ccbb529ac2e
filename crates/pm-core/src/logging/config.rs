//! Logging configuration.
//!
//! Supports configuration via:
//! - Environment variables (PM_LOG, PM_LOG_FORMAT, RUST_LOG)
//! - CLI flags (--log-level, --append)

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Number of rolled-over campaign logs kept next to the live one.
pub const LOG_BACKUP_COUNT: usize = 3;

/// Console log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable console format (default).
    #[default]
    Human,
    /// Machine-parseable JSON lines.
    Jsonl,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" | "console" | "pretty" => Ok(LogFormat::Human),
            "jsonl" | "json" | "structured" | "machine" => Ok(LogFormat::Jsonl),
            _ => Err(format!("unknown log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Jsonl => write!(f, "jsonl"),
        }
    }
}

/// Console log level.
///
/// `NotSet` disables console output entirely; the campaign log file is
/// written at debug level regardless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No console output.
    NotSet,
    /// Most verbose.
    Trace,
    /// Debug information.
    Debug,
    /// Standard operational info (default).
    #[default]
    Info,
    /// Warnings only.
    Warning,
    /// Errors only.
    Error,
    /// Errors only; kept for command-line compatibility.
    Critical,
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "notset" | "off" | "none" | "quiet" => Ok(LogLevel::NotSet),
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            "critical" => Ok(LogLevel::Critical),
            _ => Err(format!("unknown log level: {}", s)),
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::NotSet => write!(f, "notset"),
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warning => write!(f, "warning"),
            LogLevel::Error => write!(f, "error"),
            LogLevel::Critical => write!(f, "critical"),
        }
    }
}

impl From<LogLevel> for tracing_subscriber::filter::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::NotSet => tracing_subscriber::filter::LevelFilter::OFF,
            LogLevel::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
            LogLevel::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
            LogLevel::Info => tracing_subscriber::filter::LevelFilter::INFO,
            LogLevel::Warning => tracing_subscriber::filter::LevelFilter::WARN,
            LogLevel::Error | LogLevel::Critical => tracing_subscriber::filter::LevelFilter::ERROR,
        }
    }
}

/// Where the campaign log file lives and whether to continue it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileConfig {
    /// Path of the live log file.
    pub path: PathBuf,
    /// Keep appending instead of rolling the previous file over.
    pub append: bool,
    /// Rolled-over files to keep.
    pub backup_count: usize,
}

impl LogFileConfig {
    pub fn new(path: impl Into<PathBuf>, append: bool) -> Self {
        Self {
            path: path.into(),
            append,
            backup_count: LOG_BACKUP_COUNT,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Console output format.
    pub format: LogFormat,
    /// Console level.
    pub level: LogLevel,
    /// `RUST_LOG` directives. Unset when the level came from the CLI.
    pub directives: Option<String>,
    /// Campaign log file, written at debug level.
    pub file: Option<LogFileConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            format: LogFormat::Human,
            level: LogLevel::Info,
            directives: None,
            file: None,
        }
    }
}

impl LogConfig {
    /// Create config from environment and CLI overrides.
    ///
    /// Precedence: `--log-level`, then `RUST_LOG`, then `PM_LOG`, then info.
    pub fn from_env(cli_level: Option<LogLevel>, cli_format: Option<LogFormat>) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), cli_level, cli_format)
    }

    fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
        cli_level: Option<LogLevel>,
        cli_format: Option<LogFormat>,
    ) -> Self {
        let mut config = LogConfig::default();

        if let Some(level) = lookup("PM_LOG").and_then(|val| val.parse::<LogLevel>().ok()) {
            config.level = level;
        }
        if let Some(format) = lookup("PM_LOG_FORMAT").and_then(|val| val.parse::<LogFormat>().ok()) {
            config.format = format;
        }

        // CLI overrides take final precedence
        match cli_level {
            Some(level) => config.level = level,
            None => config.directives = lookup("RUST_LOG").filter(|d| !d.trim().is_empty()),
        }
        if let Some(format) = cli_format {
            config.format = format;
        }

        config
    }

    /// Attach the campaign log file.
    pub fn with_file(mut self, file: LogFileConfig) -> Self {
        self.file = Some(file);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_log_level_parse() {
        assert_eq!("notset".parse::<LogLevel>().unwrap(), LogLevel::NotSet);
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("warn".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("ERROR".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert_eq!("critical".parse::<LogLevel>().unwrap(), LogLevel::Critical);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_display_roundtrip() {
        for level in [
            LogLevel::NotSet,
            LogLevel::Trace,
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warning,
            LogLevel::Error,
            LogLevel::Critical,
        ] {
            assert_eq!(level.to_string().parse::<LogLevel>().unwrap(), level);
        }
    }

    #[test]
    fn test_level_filters() {
        assert_eq!(LevelFilter::from(LogLevel::NotSet), LevelFilter::OFF);
        assert_eq!(LevelFilter::from(LogLevel::Critical), LevelFilter::ERROR);
        assert_eq!(LevelFilter::from(LogLevel::Warning), LevelFilter::WARN);
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("human".parse::<LogFormat>().unwrap(), LogFormat::Human);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Jsonl);
        assert_eq!(LogFormat::Jsonl.to_string(), "jsonl");
    }

    fn lookup(vars: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            vars.iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_pm_log_applies_without_cli_level() {
        let config = LogConfig::from_lookup(lookup(&[("PM_LOG", "debug"), ("PM_LOG_FORMAT", "json")]), None, None);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Jsonl);
        assert_eq!(config.directives, None);
    }

    #[test]
    fn test_cli_level_beats_environment() {
        let config = LogConfig::from_lookup(
            lookup(&[("PM_LOG", "debug"), ("RUST_LOG", "trace")]),
            Some(LogLevel::Warning),
            None,
        );
        assert_eq!(config.level, LogLevel::Warning);
        assert_eq!(config.directives, None);
    }

    #[test]
    fn test_rust_log_kept_without_cli_level() {
        let config = LogConfig::from_lookup(lookup(&[("RUST_LOG", "pm_core=trace")]), None, None);
        assert_eq!(config.level, LogLevel::Info);
        assert_eq!(config.directives.as_deref(), Some("pm_core=trace"));
    }

    #[test]
    fn test_log_file_attached() {
        let config = LogConfig::default().with_file(LogFileConfig::new("/tmp/pm.log", true));
        let file = config.file.unwrap();
        assert!(file.append);
        assert_eq!(file.backup_count, LOG_BACKUP_COUNT);
    }
}
