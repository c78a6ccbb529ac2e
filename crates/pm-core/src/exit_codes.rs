//! Exit codes for the pm-core CLI.
//!
//! Automated harnesses read the campaign outcome from the exit status:
//! - 0: the invocation finished normally (campaign complete, or the next
//!   reboot/poweroff cycle has been issued)
//! - 1: the user cancelled, or the campaign was aborted before any cycle
//!   (missing privileges, wake alarm pre-flight failure, bad config)
//! - 2: a cycle failed (duration out of bounds, wake alarm rejected)

use pm_common::{Error, ErrorCategory};

/// Exit codes for pm-core invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Completed normally.
    Completed,

    /// Cancelled by the user during a countdown.
    Cancelled,

    /// Aborted before a single cycle ran.
    Aborted,

    /// A cycle failed its checks.
    Failed,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub fn as_i32(self) -> i32 {
        match self {
            ExitCode::Completed => 0,
            ExitCode::Cancelled | ExitCode::Aborted => 1,
            ExitCode::Failed => 2,
        }
    }

    /// Check if this exit code indicates success.
    pub fn is_success(self) -> bool {
        matches!(self, ExitCode::Completed)
    }

    /// Get the code name as a string constant (for JSON log output).
    pub fn code_name(&self) -> &'static str {
        match self {
            ExitCode::Completed => "OK_COMPLETED",
            ExitCode::Cancelled => "ERR_CANCELLED",
            ExitCode::Aborted => "ERR_ABORTED",
            ExitCode::Failed => "ERR_FAILED",
        }
    }

    /// Map a campaign error to the exit code it produces.
    pub fn for_error(error: &Error) -> Self {
        match error.category() {
            ErrorCategory::Cancelled => ExitCode::Cancelled,
            ErrorCategory::Privilege
            | ErrorCategory::Hardware
            | ErrorCategory::Config => ExitCode::Aborted,
            ErrorCategory::Alarm | ErrorCategory::Bounds | ErrorCategory::Io => ExitCode::Failed,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code.as_i32()
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.as_i32() as u8)
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.code_name(), self.as_i32())
    }
}
