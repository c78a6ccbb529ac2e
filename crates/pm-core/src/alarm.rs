//! Wake alarm programming and verification.
//!
//! The RTC wake alarm is the only thing that brings a suspended, hibernated
//! or powered-off machine back, so every write is read back and cross
//! checked against the RTC status table before a cycle is allowed to
//! proceed. Drivers disagree on whether the register holds UTC or local
//! epoch seconds, so either interpretation is accepted.

use crate::clock::Clock;
use crate::countdown::CancelToken;
use crate::runner::{CommandExecutor, CommandSpec, RunnerError};
use chrono::{DateTime, Local};
use pm_common::Error;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, trace};

/// Maximum distance, in seconds, between the stored alarm and a candidate.
pub const ALARM_TOLERANCE_SECS: i64 = 1;

/// Verdict the self-test harness prints on its last line when it passes.
pub const SELF_TEST_PASSED: &str = "PASSED";

/// Errors from the wake alarm controller.
#[derive(Debug, Error)]
pub enum AlarmError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid wakeup time format: {0:?}")]
    InvalidFormat(String),

    #[error("wakeup time not stored correctly: {stored} is neither {utc} (utc) nor {local} (local)")]
    Mismatch { stored: i64, utc: i64, local: i64 },

    #[error("RTC status: {0}")]
    RtcStatus(String),

    #[error("{0} not found")]
    MissingInterface(PathBuf),

    #[error("wake alarm self-test failed: {0}")]
    SelfTestFailed(String),

    #[error("wake alarm self-test cancelled")]
    SelfTestCancelled,

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

impl From<AlarmError> for Error {
    fn from(err: AlarmError) -> Self {
        match err {
            AlarmError::Mismatch { stored, utc, local } => Error::AlarmMismatch {
                stored,
                expected_utc: utc,
                expected_local: local,
            },
            AlarmError::Io { .. } | AlarmError::InvalidFormat(_) | AlarmError::RtcStatus(_) => {
                Error::AlarmWrite(err.to_string())
            }
            AlarmError::MissingInterface(_)
            | AlarmError::SelfTestFailed(_)
            | AlarmError::SelfTestCancelled
            | AlarmError::Runner(_) => Error::HardwarePrecondition(err.to_string()),
        }
    }
}

/// The two plausible readings of "now + N" in the alarm register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmCandidates {
    pub utc: i64,
    pub local: i64,
}

impl AlarmCandidates {
    pub fn compute(now_epoch: i64, local_offset_secs: i64, seconds: u64) -> Self {
        let timeout = i64::try_from(seconds).unwrap_or(i64::MAX);
        Self {
            utc: now_epoch.saturating_add(timeout),
            local: now_epoch
                .saturating_add(local_offset_secs)
                .saturating_add(timeout),
        }
    }

    /// Whether `stored` matches either candidate within the tolerance.
    pub fn accepts(&self, stored: i64) -> bool {
        stored.abs_diff(self.utc) <= ALARM_TOLERANCE_SECS as u64
            || stored.abs_diff(self.local) <= ALARM_TOLERANCE_SECS as u64
    }
}

/// Parse the alarm register contents: a plain non-negative integer.
pub fn parse_stored_value(raw: &str) -> Option<i64> {
    let value = raw.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

static RTC_SEPARATOR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+:\s+").unwrap());

/// Parse the RTC status table (`key : value` per line).
///
/// Lines without a separator are ignored.
pub fn parse_rtc_status(raw: &str) -> BTreeMap<String, String> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = RTC_SEPARATOR.splitn(line.trim_end(), 2);
            let key = parts.next()?.trim();
            let value = parts.next()?;
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

/// Check that the RTC reports an armed alarm with a fully specified date.
pub fn verify_rtc_status(status: &BTreeMap<String, String>) -> Result<(), AlarmError> {
    let irq = status
        .get("alarm_IRQ")
        .ok_or_else(|| AlarmError::RtcStatus("alarm_IRQ missing".to_string()))?;
    if irq != "yes" {
        return Err(AlarmError::RtcStatus(format!(
            "alarm_IRQ not set properly: {}",
            irq
        )));
    }

    let date = status
        .get("alrm_date")
        .ok_or_else(|| AlarmError::RtcStatus("alrm_date missing".to_string()))?;
    if date.contains('*') {
        return Err(AlarmError::RtcStatus(format!(
            "alrm_date not set properly: {}",
            date
        )));
    }
    Ok(())
}

/// Raw access to the alarm register and the RTC status table.
pub trait AlarmDevice {
    fn write_alarm(&self, value: &str) -> Result<(), AlarmError>;
    fn read_alarm(&self) -> Result<String, AlarmError>;
    fn read_rtc_status(&self) -> Result<String, AlarmError>;
}

/// The sysfs/procfs RTC interfaces.
#[derive(Debug, Clone)]
pub struct SysfsAlarmDevice {
    pub alarm_path: PathBuf,
    pub rtc_path: PathBuf,
}

impl SysfsAlarmDevice {
    pub fn new(alarm_path: impl Into<PathBuf>, rtc_path: impl Into<PathBuf>) -> Self {
        Self {
            alarm_path: alarm_path.into(),
            rtc_path: rtc_path.into(),
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> AlarmError + '_ {
    move |source| AlarmError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl AlarmDevice for SysfsAlarmDevice {
    fn write_alarm(&self, value: &str) -> Result<(), AlarmError> {
        trace!(path = %self.alarm_path.display(), value, "writing wake alarm");
        fs::write(&self.alarm_path, format!("{}\n", value)).map_err(io_err(&self.alarm_path))
    }

    fn read_alarm(&self) -> Result<String, AlarmError> {
        fs::read_to_string(&self.alarm_path).map_err(io_err(&self.alarm_path))
    }

    fn read_rtc_status(&self) -> Result<String, AlarmError> {
        fs::read_to_string(&self.rtc_path).map_err(io_err(&self.rtc_path))
    }
}

/// Something that can arm the wake alarm `seconds` from now.
pub trait WakeAlarmControl {
    /// Arm and verify; returns the epoch value the register holds.
    fn arm(&self, seconds: u64) -> Result<i64, AlarmError>;
}

/// Wake alarm controller over an [`AlarmDevice`].
pub struct WakeAlarm<D, C> {
    device: D,
    clock: C,
}

impl<D: AlarmDevice, C: Clock> WakeAlarm<D, C> {
    pub fn new(device: D, clock: C) -> Self {
        Self { device, clock }
    }

    fn read_back(&self) -> Result<Option<i64>, AlarmError> {
        let raw = self.device.read_alarm()?;
        Ok(parse_stored_value(&raw))
    }
}

impl<D: AlarmDevice, C: Clock> WakeAlarmControl for WakeAlarm<D, C> {
    fn arm(&self, seconds: u64) -> Result<i64, AlarmError> {
        let candidates = AlarmCandidates::compute(
            self.clock.epoch_secs(),
            self.clock.local_offset_secs(),
            seconds,
        );

        self.device.write_alarm("0")?;
        self.device.write_alarm(&candidates.utc.to_string())?;

        let stored = match self.read_back()? {
            Some(value) => value,
            None => {
                debug!("absolute wakeup time rejected, retrying with relative offset");
                self.device.write_alarm(&format!("+{}", seconds))?;
                let raw = self.device.read_alarm()?;
                match parse_stored_value(&raw) {
                    Some(value) => value,
                    None => {
                        error!(value = ?raw, "Invalid wakeup time format");
                        return Err(AlarmError::InvalidFormat(raw.trim().to_string()));
                    }
                }
            }
        };

        match DateTime::from_timestamp(stored, 0) {
            Some(at) => debug!(
                "Wakeup timestamp: {} ({})",
                stored,
                at.with_timezone(&Local).format("%c")
            ),
            None => return Err(AlarmError::InvalidFormat(stored.to_string())),
        }

        if !candidates.accepts(stored) {
            error!(stored, utc = candidates.utc, local = candidates.local, "Wakeup time not stored correctly");
            return Err(AlarmError::Mismatch {
                stored,
                utc: candidates.utc,
                local: candidates.local,
            });
        }

        let status = parse_rtc_status(&self.device.read_rtc_status()?);
        debug!(
            "RTC data:\n{}",
            status
                .iter()
                .map(|(key, value)| format!("- {}: {}", key, value))
                .collect::<Vec<_>>()
                .join("\n")
        );
        verify_rtc_status(&status)?;

        Ok(stored)
    }
}

/// Check that the wake alarm can be used at all, before any cycle runs.
///
/// Both kernel interfaces must exist and the self-test harness has to end
/// its output with [`SELF_TEST_PASSED`]. The harness is polled every `tick`
/// so the check stays cancellable.
pub fn preflight(
    alarm_path: &Path,
    rtc_path: &Path,
    self_test: &CommandSpec,
    runner: &dyn CommandExecutor,
    cancel: &CancelToken,
    tick: Duration,
) -> Result<(), AlarmError> {
    for path in [alarm_path, rtc_path] {
        if !path.exists() {
            return Err(AlarmError::MissingInterface(path.to_path_buf()));
        }
    }

    info!("Checking wakeup alarm...");
    let output = runner
        .run_cancellable(self_test, cancel, tick, &mut || trace!("self-test running"))?
        .ok_or(AlarmError::SelfTestCancelled)?;

    match output.last_line() {
        Some(verdict) if verdict == SELF_TEST_PASSED => Ok(()),
        Some(verdict) => Err(AlarmError::SelfTestFailed(verdict)),
        None => Err(AlarmError::SelfTestFailed("no verdict reported".to_string())),
    }
}
