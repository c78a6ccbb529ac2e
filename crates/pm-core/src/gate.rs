//! Duration gate for completed power-management cycles.

use chrono::{DateTime, Utc};
use pm_common::{Error, Operation};
use std::time::Duration;
use thiserror::Error;

/// A cycle finished outside its window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("{} time less than expected: {elapsed:?} < {min:?}", .operation.title())]
    TooShort {
        operation: Operation,
        elapsed: Duration,
        min: Duration,
    },

    #[error("{} time greater than expected: {elapsed:?} > {max:?}", .operation.title())]
    TooLong {
        operation: Operation,
        elapsed: Duration,
        max: Duration,
    },
}

impl From<GateError> for Error {
    fn from(err: GateError) -> Self {
        match err {
            GateError::TooShort {
                operation,
                elapsed,
                min,
            } => Error::DurationTooShort {
                operation,
                elapsed,
                min,
            },
            GateError::TooLong {
                operation,
                elapsed,
                max,
            } => Error::DurationTooLong {
                operation,
                elapsed,
                max,
            },
        }
    }
}

/// Accepts a cycle duration within `[min, max]`, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleGate {
    pub operation: Operation,
    pub min: Duration,
    pub max: Duration,
}

impl CycleGate {
    pub fn new(operation: Operation, min_secs: u64, max_secs: u64) -> Self {
        Self {
            operation,
            min: Duration::from_secs(min_secs),
            max: Duration::from_secs(max_secs),
        }
    }

    /// Validate a measured duration and hand it back for logging.
    pub fn check(&self, elapsed: Duration) -> Result<Duration, GateError> {
        if elapsed < self.min {
            return Err(GateError::TooShort {
                operation: self.operation,
                elapsed,
                min: self.min,
            });
        }
        if elapsed > self.max {
            return Err(GateError::TooLong {
                operation: self.operation,
                elapsed,
                max: self.max,
            });
        }
        Ok(elapsed)
    }

    /// Validate the time between issuing an operation and `now`.
    ///
    /// A clock that went backwards counts as zero elapsed time.
    pub fn check_since(
        &self,
        issued_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Duration, GateError> {
        let elapsed = (now - issued_at).to_std().unwrap_or(Duration::ZERO);
        self.check(elapsed)
    }
}
