//! Structured logging for pm-core.
//!
//! Two sinks are installed once per process:
//! - stderr console output at the user-selected level (human or JSONL)
//! - the campaign log file at debug level, rolled over on every fresh
//!   campaign and appended to by the invocations that resume it
//!
//! # Usage
//!
//! ```ignore
//! use pm_core::logging::{init_logging, LogConfig, LogFileConfig};
//!
//! let config = LogConfig::from_env(None, None)
//!     .with_file(LogFileConfig::new("/var/log/pm-core.reboot.3.log", false));
//! init_logging(&config)?;
//! ```

pub mod config;
pub mod events;

pub use config::{LogConfig, LogFileConfig, LogFormat, LogLevel, LOG_BACKUP_COUNT};
pub use events::{event_names, LogContext, Stage};

use pm_common::Operation;
use std::fs::{self, OpenOptions};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

/// Errors raised while installing the logging sinks.
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot roll over log file {path}: {source}")]
    Rollover {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("logging already initialized")]
    AlreadyInitialized,
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Initialize the logging subsystem.
///
/// Must be called once at startup before any logging occurs.
pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.level != LogLevel::NotSet {
        layers.push(console_layer(config));
    }

    if let Some(file) = &config.file {
        layers.push(file_layer(file)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|_| LoggingError::AlreadyInitialized)
}

/// Console filter: `directives` when they parse, `level` otherwise.
fn console_filter(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::default().add_directive(LevelFilter::from(level).into()))
}

fn console_layer(config: &LogConfig) -> BoxedLayer {
    let filter = console_filter(config.level, config.directives.as_deref());
    match config.format {
        LogFormat::Human => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_ansi(std::io::stderr().is_terminal())
            .without_time()
            .with_filter(filter)
            .boxed(),
        LogFormat::Jsonl => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed(),
    }
}

fn file_layer(file: &LogFileConfig) -> Result<BoxedLayer, LoggingError> {
    if let Some(parent) = file.path.parent() {
        fs::create_dir_all(parent).map_err(|source| LoggingError::Open {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    if !file.append {
        roll_over(&file.path, file.backup_count)?;
    }

    let handle = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&file.path)
        .map_err(|source| LoggingError::Open {
            path: file.path.clone(),
            source,
        })?;

    Ok(fmt::layer()
        .with_writer(Mutex::new(handle))
        .with_ansi(false)
        .with_target(false)
        .with_filter(LevelFilter::DEBUG)
        .boxed())
}

/// Shift `path` into a numbered chain `path.1 .. path.N`, dropping the
/// oldest file once `backup_count` is reached.
///
/// A missing live file is not an error: there is nothing to roll over.
pub fn roll_over(path: &Path, backup_count: usize) -> Result<(), LoggingError> {
    if !path.exists() {
        return Ok(());
    }
    let rollover_err = |source| LoggingError::Rollover {
        path: path.to_path_buf(),
        source,
    };

    if backup_count == 0 {
        return fs::remove_file(path).map_err(rollover_err);
    }

    let oldest = numbered(path, backup_count);
    if oldest.exists() {
        fs::remove_file(&oldest).map_err(rollover_err)?;
    }
    for index in (1..backup_count).rev() {
        let from = numbered(path, index);
        if from.exists() {
            fs::rename(&from, numbered(path, index + 1)).map_err(rollover_err)?;
        }
    }
    fs::rename(path, numbered(path, 1)).map_err(rollover_err)
}

fn numbered(path: &Path, index: usize) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".{}", index));
    PathBuf::from(name)
}

/// Campaign log file name: the operation and the campaign size make the
/// file identifiable at a glance.
pub fn campaign_log_path(log_dir: &Path, operation: Operation, total: u32) -> PathBuf {
    log_dir.join(format!("pm-core.{}.{}.log", operation, total))
}

/// Generate a unique run ID for this invocation.
pub fn generate_run_id() -> String {
    let uuid = uuid::Uuid::new_v4();
    // Shorten to first 12 hex chars for readability
    format!("run-{}", &uuid.to_string()[..12])
}

/// Get the host ID for logging.
///
/// Uses machine-id on Linux or generates a stable ID from hostname.
pub fn get_host_id() -> String {
    if let Ok(id) = fs::read_to_string("/etc/machine-id") {
        let id = id.trim();
        if id.len() >= 8 {
            return format!("host-{}", &id[..8]);
        }
    }

    if let Ok(hostname) = std::env::var("HOSTNAME") {
        let hash = hash_string(&hostname);
        return format!("host-{}", &hash[..8]);
    }

    format!("host-{}", &uuid::Uuid::new_v4().to_string()[..8])
}

fn hash_string(s: &str) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Convenience macro for structured event logging with context.
///
/// Usage:
/// ```ignore
/// log_event!(ctx, INFO, event_names::GATE_PASSED, Stage::Gate, "Reboot time: 42s",
///     elapsed_secs = 42);
/// ```
#[macro_export]
macro_rules! log_event {
    ($ctx:expr, INFO, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::info!(
            event = $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            operation = %$ctx.operation,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
    ($ctx:expr, DEBUG, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::debug!(
            event = $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            operation = %$ctx.operation,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
    ($ctx:expr, WARN, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::warn!(
            event = $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            operation = %$ctx.operation,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
    ($ctx:expr, ERROR, $event:expr, $stage:expr, $msg:expr $(, $key:ident = $val:expr)*) => {
        tracing::error!(
            event = $event,
            run_id = %$ctx.run_id,
            host_id = %$ctx.host_id,
            operation = %$ctx.operation,
            stage = %$stage,
            $($key = $val,)*
            "{}", $msg
        )
    };
}
