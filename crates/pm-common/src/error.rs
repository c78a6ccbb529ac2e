//! Campaign error taxonomy.
//!
//! Errors are grouped in two families with different propagation rules:
//! - Fatal environment problems (privilege, hardware preconditions, wake
//!   alarm programming, I/O, config). These end the process with no cleanup
//!   beyond what was already committed.
//! - Campaign outcomes (duration bounds violated, user cancellation). These
//!   are caught once at the top level, trigger a full teardown and are
//!   reported to the user unless running silently.
//!
//! Cancellation is deliberately not a failure: `is_failure()` is false for
//! [`Error::UserCancelled`].

use crate::operation::Operation;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for campaign operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Not running with the required privileges.
    Privilege,
    /// Wake-alarm interfaces missing or the hardware self-test failed.
    Hardware,
    /// Wake alarm could not be programmed or verified.
    Alarm,
    /// A cycle finished outside its expected duration window.
    Bounds,
    /// The user cancelled a countdown.
    Cancelled,
    /// Configuration could not be loaded.
    Config,
    /// File or process I/O.
    Io,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCategory::Privilege => write!(f, "privilege"),
            ErrorCategory::Hardware => write!(f, "hardware"),
            ErrorCategory::Alarm => write!(f, "alarm"),
            ErrorCategory::Bounds => write!(f, "bounds"),
            ErrorCategory::Cancelled => write!(f, "cancelled"),
            ErrorCategory::Config => write!(f, "config"),
            ErrorCategory::Io => write!(f, "io"),
        }
    }
}

/// Unified campaign error.
#[derive(Error, Debug)]
pub enum Error {
    #[error("this program needs superuser permissions to run correctly")]
    Privilege,

    #[error("hardware precondition failed: {0}")]
    HardwarePrecondition(String),

    #[error("could not program the wake alarm: {0}")]
    AlarmWrite(String),

    #[error(
        "wakeup time not stored correctly: read back {stored}, expected {expected_utc} (utc) or {expected_local} (local)"
    )]
    AlarmMismatch {
        stored: i64,
        expected_utc: i64,
        expected_local: i64,
    },

    #[error("{} time less than expected: {elapsed:?} < {min:?}", .operation.title())]
    DurationTooShort {
        operation: Operation,
        elapsed: Duration,
        min: Duration,
    },

    #[error("{} time greater than expected: {elapsed:?} > {max:?}", .operation.title())]
    DurationTooLong {
        operation: Operation,
        elapsed: Duration,
        max: Duration,
    },

    #[error("{} test cancelled by user", .0.title())]
    UserCancelled(Operation),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the error category for grouping and filtering.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Privilege => ErrorCategory::Privilege,
            Error::HardwarePrecondition(_) => ErrorCategory::Hardware,
            Error::AlarmWrite(_) | Error::AlarmMismatch { .. } => ErrorCategory::Alarm,
            Error::DurationTooShort { .. } | Error::DurationTooLong { .. } => {
                ErrorCategory::Bounds
            }
            Error::UserCancelled(_) => ErrorCategory::Cancelled,
            Error::Config(_) => ErrorCategory::Config,
            Error::Io(_) => ErrorCategory::Io,
        }
    }

    /// Whether this error is a test failure to be reported as such.
    pub fn is_failure(&self) -> bool {
        !self.is_cancellation()
    }

    /// Whether the user asked to stop the campaign.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::UserCancelled(_))
    }

    /// Whether this is a campaign outcome that must be caught at the top
    /// level and followed by a full teardown.
    ///
    /// Everything else terminates the process as-is.
    pub fn requires_teardown(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Bounds | ErrorCategory::Cancelled
        )
    }

    /// Returns a human-readable remediation hint.
    pub fn remediation(&self) -> &'static str {
        match self {
            Error::Privilege => "Run the test through sudo or as root.",
            Error::HardwarePrecondition(_) => {
                "Check that /sys/class/rtc/rtc0/wakealarm and /proc/driver/rtc exist and that 'fwts wakealarm' passes."
            }
            Error::AlarmWrite(_) | Error::AlarmMismatch { .. } => {
                "The RTC rejected the wakeup time. Check the RTC driver and the BIOS wake settings."
            }
            Error::DurationTooShort { .. } | Error::DurationTooLong { .. } => {
                "Inspect the campaign log for the failing cycle, or widen --min-pm-time/--max-pm-time."
            }
            Error::UserCancelled(_) => "No action needed.",
            Error::Config(_) => "Check the syntax of the configuration file.",
            Error::Io(_) => "Check permissions and free space, then retry.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounds_messages_name_the_operation() {
        let err = Error::DurationTooShort {
            operation: Operation::Poweroff,
            elapsed: Duration::from_secs(50),
            min: Duration::from_secs(60),
        };
        assert_eq!(err.to_string(), "Poweroff time less than expected: 50s < 60s");

        let err = Error::DurationTooLong {
            operation: Operation::Suspend,
            elapsed: Duration::from_secs(310),
            max: Duration::from_secs(300),
        };
        assert_eq!(
            err.to_string(),
            "Suspend time greater than expected: 310s > 300s"
        );
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        let err = Error::UserCancelled(Operation::Reboot);
        assert!(err.is_cancellation());
        assert!(!err.is_failure());
        assert!(err.requires_teardown());
        assert_eq!(err.to_string(), "Reboot test cancelled by user");
    }

    #[test]
    fn fatal_errors_skip_teardown() {
        assert!(!Error::Privilege.requires_teardown());
        assert!(!Error::HardwarePrecondition("x".into()).requires_teardown());
        assert!(!Error::AlarmWrite("x".into()).requires_teardown());
        assert!(Error::AlarmWrite("x".into()).is_failure());
    }

    #[test]
    fn categories() {
        let mismatch = Error::AlarmMismatch {
            stored: 1,
            expected_utc: 10,
            expected_local: 20,
        };
        assert_eq!(mismatch.category(), ErrorCategory::Alarm);
        assert_eq!(Error::Privilege.category(), ErrorCategory::Privilege);
        assert_eq!(ErrorCategory::Bounds.to_string(), "bounds");
        assert_eq!(
            serde_json::to_string(&ErrorCategory::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }
}
