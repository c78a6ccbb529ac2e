//! Power-management operations that a campaign can exercise.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single power-management transition type.
///
/// Fixed for the whole lifetime of a campaign.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Suspend to RAM (`pm-suspend`).
    Suspend,
    /// Suspend to disk (`pm-hibernate`).
    Hibernate,
    /// Full power off; the wake alarm powers the machine back on.
    Poweroff,
    /// Warm reboot.
    Reboot,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Suspend,
        Operation::Hibernate,
        Operation::Poweroff,
        Operation::Reboot,
    ];

    /// Lowercase name as used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Suspend => "suspend",
            Operation::Hibernate => "hibernate",
            Operation::Poweroff => "poweroff",
            Operation::Reboot => "reboot",
        }
    }

    /// Capitalized name for titles and messages ("Suspend test complete").
    pub fn title(&self) -> &'static str {
        match self {
            Operation::Suspend => "Suspend",
            Operation::Hibernate => "Hibernate",
            Operation::Poweroff => "Poweroff",
            Operation::Reboot => "Reboot",
        }
    }

    /// Whether the wake alarm has to be armed before the transition.
    ///
    /// A reboot brings the machine back by itself.
    pub fn needs_wake_alarm(&self) -> bool {
        !matches!(self, Operation::Reboot)
    }

    /// Whether the transition kills this process, so the campaign has to be
    /// continued by a fresh invocation after the OS comes back.
    pub fn restarts_process(&self) -> bool {
        matches!(self, Operation::Poweroff | Operation::Reboot)
    }

    /// Whether the issuing command blocks until the machine resumes.
    pub fn blocks_until_resume(&self) -> bool {
        matches!(self, Operation::Suspend | Operation::Hibernate)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
