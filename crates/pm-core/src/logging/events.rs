//! Structured event vocabulary for campaign logging.
//!
//! Every campaign event carries the invocation's run id, the host id and
//! the stage of the cycle state machine it was emitted from.

use pm_common::Operation;
use serde::{Deserialize, Serialize};

/// Stages of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Privilege check, pre-flight and state reconstruction.
    Init,
    /// One-time environment changes and continuation persistence.
    Setup,
    /// Validation of the previous cycle's duration.
    Gate,
    /// Countdown, hardware inventory and power command.
    Cycle,
    /// Wake alarm programming and verification.
    Alarm,
    /// Final summary of a completed campaign.
    Finalize,
    /// Reverting environment changes after completion, failure or cancel.
    Teardown,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Setup => "setup",
            Stage::Gate => "gate",
            Stage::Cycle => "cycle",
            Stage::Alarm => "alarm",
            Stage::Finalize => "finalize",
            Stage::Teardown => "teardown",
        };
        write!(f, "{}", s)
    }
}

/// Standard event names used in logging.
pub mod event_names {
    // Campaign lifecycle
    pub const CAMPAIGN_RESUMED: &str = "campaign.resumed";
    pub const CAMPAIGN_FINISHED: &str = "campaign.finished";
    pub const CAMPAIGN_ABORTED: &str = "campaign.aborted";

    // Setup stage
    pub const ENV_ENABLED: &str = "setup.env_enabled";
    pub const CONTINUATION_WRITTEN: &str = "setup.continuation_written";

    // Gate stage
    pub const GATE_PASSED: &str = "gate.passed";
    pub const GATE_FAILED: &str = "gate.failed";

    // Cycle stage
    pub const CYCLE_STARTED: &str = "cycle.started";
    pub const COUNTDOWN_CANCELLED: &str = "cycle.countdown_cancelled";
    pub const POWER_ISSUED: &str = "cycle.power_issued";
    pub const POWER_RESUMED: &str = "cycle.power_resumed";

    // Alarm stage
    pub const ALARM_ARMED: &str = "alarm.armed";

    // Teardown stage
    pub const ENV_RESTORED: &str = "teardown.env_restored";
    pub const CONTINUATION_CLEARED: &str = "teardown.continuation_cleared";
}

/// Context for emitting events with consistent correlation fields.
#[derive(Debug, Clone)]
pub struct LogContext {
    /// Unique ID for this invocation.
    pub run_id: String,
    /// Host identifier.
    pub host_id: String,
    /// Operation under test.
    pub operation: Operation,
}

impl LogContext {
    /// Create a new log context.
    pub fn new(run_id: impl Into<String>, host_id: impl Into<String>, operation: Operation) -> Self {
        LogContext {
            run_id: run_id.into(),
            host_id: host_id.into(),
            operation,
        }
    }
}
