//! Campaign state.
//!
//! A campaign lives entirely in the argument vector: each invocation
//! rebuilds a [`CampaignState`] from its command line and, before the
//! machine goes down, hands the next invocation an argument vector for the
//! state one cycle further on. Nothing else is persisted.

use crate::cli::Cli;
use crate::gate::CycleGate;
use crate::logging::LogLevel;
use crate::runner::{validate_argument, RunnerError};
use chrono::{DateTime, TimeDelta, Utc};
use pm_common::{Error, Operation};
use thiserror::Error;

/// Seconds subtracted from the wakeup time to get the default minimum
/// cycle duration; wake timers fire slightly early.
pub const MIN_DURATION_SLACK_SECS: u64 = 2;

/// Errors reconstructing a campaign from its arguments.
#[derive(Debug, Error)]
pub enum CampaignError {
    #[error("total repetitions must be at least 1")]
    NoRepetitions,

    #[error("{remaining} repetitions remaining exceeds the campaign total of {total}")]
    RemainingExceedsTotal { remaining: u32, total: u32 },

    #[error("minimum cycle time {min}s exceeds maximum {max}s")]
    InvertedBounds { min: u64, max: u64 },

    #[error(transparent)]
    UnsafeArgument(#[from] RunnerError),
}

impl From<CampaignError> for Error {
    fn from(err: CampaignError) -> Self {
        Error::Config(err.to_string())
    }
}

/// Everything a campaign needs to carry from one invocation to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignState {
    pub operation: Operation,
    pub repetitions_remaining: u32,
    pub total_repetitions: u32,
    pub wakeup_seconds: u64,
    pub min_duration: u64,
    pub max_duration: u64,
    pub pm_delay: u64,
    pub hardware_delay: u64,
    /// Epoch seconds of the first invocation.
    pub campaign_start: i64,
    /// Epoch seconds at which the previous operation was issued.
    pub last_operation_timestamp: Option<i64>,
    pub silent: bool,
    /// Only set when given on the command line.
    pub log_level: Option<LogLevel>,
    /// Continue the existing campaign log instead of starting a new one.
    pub append: bool,
    /// Passed through to the power command.
    pub extra_args: Vec<String>,
}

impl CampaignState {
    /// Normalize parsed flags into a campaign.
    ///
    /// `now` fills in the start time of a fresh campaign. Reboot never arms
    /// the wake alarm, so its wakeup time and minimum duration are zeroed
    /// whatever the flags say.
    pub fn from_cli(cli: &Cli, now: i64) -> Result<Self, CampaignError> {
        let total = cli.total.unwrap_or(cli.repetitions);
        if total == 0 {
            return Err(CampaignError::NoRepetitions);
        }
        if cli.repetitions > total {
            return Err(CampaignError::RemainingExceedsTotal {
                remaining: cli.repetitions,
                total,
            });
        }
        for arg in &cli.extra_args {
            validate_argument(arg)?;
        }

        let (wakeup_seconds, min_duration) = if cli.operation == Operation::Reboot {
            (0, 0)
        } else {
            let min = cli
                .min_pm_time
                .unwrap_or_else(|| cli.wakeup.saturating_sub(MIN_DURATION_SLACK_SECS));
            (cli.wakeup, min)
        };
        if min_duration > cli.max_pm_time {
            return Err(CampaignError::InvertedBounds {
                min: min_duration,
                max: cli.max_pm_time,
            });
        }

        Ok(Self {
            operation: cli.operation,
            repetitions_remaining: cli.repetitions,
            total_repetitions: total,
            wakeup_seconds,
            min_duration,
            max_duration: cli.max_pm_time,
            pm_delay: cli.pm_delay,
            hardware_delay: cli.hardware_delay,
            campaign_start: cli.start.unwrap_or(now),
            last_operation_timestamp: cli.pm_timestamp,
            silent: cli.silent,
            log_level: cli.log_level,
            append: cli.append,
            extra_args: cli.extra_args.clone(),
        })
    }

    /// Index of the current cycle: 0 for the first, `total` for the summary.
    pub fn iteration(&self) -> u32 {
        self.total_repetitions - self.repetitions_remaining
    }

    /// True only for the invocation that started the campaign.
    pub fn is_first_cycle(&self) -> bool {
        self.repetitions_remaining == self.total_repetitions
    }

    /// True when no power operation is left and only the summary remains.
    pub fn is_complete(&self) -> bool {
        self.repetitions_remaining == 0
    }

    /// Mark one cycle as done.
    pub fn complete_cycle(&mut self) {
        self.repetitions_remaining = self.repetitions_remaining.saturating_sub(1);
    }

    pub fn gate(&self) -> CycleGate {
        CycleGate::new(self.operation, self.min_duration, self.max_duration)
    }

    pub fn last_operation_at(&self) -> Option<DateTime<Utc>> {
        self.last_operation_timestamp
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    /// State the next invocation starts from, given that the operation is
    /// issued at `issued_at`.
    pub fn continuation(&self, issued_at: i64) -> Self {
        let mut next = self.clone();
        next.complete_cycle();
        next.last_operation_timestamp = Some(issued_at);
        next.append = true;
        next
    }

    /// Command-line arguments (without the program name) that reproduce
    /// this state through [`Cli`].
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-r".to_string(),
            self.repetitions_remaining.to_string(),
            "-w".to_string(),
            self.wakeup_seconds.to_string(),
            "--hardware-delay".to_string(),
            self.hardware_delay.to_string(),
            "--pm-delay".to_string(),
            self.pm_delay.to_string(),
            "--min-pm-time".to_string(),
            self.min_duration.to_string(),
            "--max-pm-time".to_string(),
            self.max_duration.to_string(),
        ];
        if self.append {
            args.push("--append".to_string());
        }
        args.extend([
            "--total".to_string(),
            self.total_repetitions.to_string(),
            "--start".to_string(),
            self.campaign_start.to_string(),
        ]);
        if let Some(ts) = self.last_operation_timestamp {
            args.extend(["--pm-timestamp".to_string(), ts.to_string()]);
        }
        if self.silent {
            args.push("--silent".to_string());
        }
        if let Some(level) = self.log_level {
            args.push(format!("--log-level={}", level));
        }
        args.push(self.operation.to_string());
        if !self.extra_args.is_empty() {
            args.push("--".to_string());
            args.extend(self.extra_args.iter().cloned());
        }
        args
    }

    /// Aggregate statistics for a finished campaign.
    ///
    /// The average recovery time removes the countdowns and the per-cycle
    /// sleep (grace delay for reboot, wakeup time otherwise) from the total.
    pub fn summary(&self, now: i64, grace_delay_secs: u64) -> CampaignSummary {
        let sleep = if self.operation == Operation::Reboot {
            grace_delay_secs
        } else {
            self.wakeup_seconds
        };
        let cycles = u64::from(self.total_repetitions.max(1));
        let wait = self
            .pm_delay
            .saturating_add(self.hardware_delay)
            .saturating_mul(cycles);

        let elapsed_ms = now.saturating_sub(self.campaign_start).saturating_mul(1000);
        let average_ms = (elapsed_ms.saturating_sub(secs_to_ms(wait)) / cycles as i64)
            .saturating_sub(secs_to_ms(sleep));

        CampaignSummary {
            total_elapsed: delta_ms(elapsed_ms),
            average_recovery: delta_ms(average_ms),
        }
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX).saturating_mul(1000)
}

fn delta_ms(ms: i64) -> TimeDelta {
    TimeDelta::milliseconds(ms.max(-i64::MAX))
}

/// Timing figures reported when a campaign completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CampaignSummary {
    pub total_elapsed: TimeDelta,
    pub average_recovery: TimeDelta,
}

impl std::fmt::Display for CampaignSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Total elapsed time: {}\nAverage recovery time: {}",
            format_delta(self.total_elapsed),
            format_delta(self.average_recovery)
        )
    }
}

/// `[-]H:MM:SS[.mmm]`
pub fn format_delta(delta: TimeDelta) -> String {
    let sign = if delta < TimeDelta::zero() { "-" } else { "" };
    let millis = delta.num_milliseconds().unsigned_abs();
    let secs = millis / 1000;
    let mut out = format!("{}{}:{:02}:{:02}", sign, secs / 3600, (secs / 60) % 60, secs % 60);
    if millis % 1000 != 0 {
        out.push_str(&format!(".{:03}", millis % 1000));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("pm-core").chain(args.iter().copied())).unwrap()
    }

    fn state(args: &[&str]) -> CampaignState {
        CampaignState::from_cli(&parse(args), NOW).unwrap()
    }

    #[test]
    fn fresh_campaign_defaults() {
        let s = state(&["-r", "3", "suspend"]);
        assert_eq!(s.total_repetitions, 3);
        assert_eq!(s.repetitions_remaining, 3);
        assert_eq!(s.campaign_start, NOW);
        assert_eq!(s.min_duration, 58);
        assert_eq!(s.last_operation_timestamp, None);
        assert!(s.is_first_cycle());
        assert_eq!(s.iteration(), 0);
    }

    #[test]
    fn reboot_forces_zero_wakeup_and_min() {
        let s = state(&["-w", "120", "--min-pm-time", "40", "reboot"]);
        assert_eq!(s.wakeup_seconds, 0);
        assert_eq!(s.min_duration, 0);
    }

    #[test]
    fn min_default_clamps_at_zero() {
        assert_eq!(state(&["-w", "1", "poweroff"]).min_duration, 0);
        assert_eq!(state(&["-w", "2", "poweroff"]).min_duration, 0);
        assert_eq!(state(&["-w", "3", "poweroff"]).min_duration, 1);
        assert_eq!(state(&["-w", "90", "--min-pm-time", "30", "poweroff"]).min_duration, 30);
    }

    #[test]
    fn rejects_inconsistent_counts() {
        let cli = parse(&["-r", "0", "reboot"]);
        assert!(matches!(
            CampaignState::from_cli(&cli, NOW),
            Err(CampaignError::NoRepetitions)
        ));

        let cli = parse(&["-r", "4", "--total", "3", "reboot"]);
        assert!(matches!(
            CampaignState::from_cli(&cli, NOW),
            Err(CampaignError::RemainingExceedsTotal { remaining: 4, total: 3 })
        ));
    }

    #[test]
    fn rejects_inverted_bounds_and_shell_arguments() {
        let cli = parse(&["--min-pm-time", "400", "suspend"]);
        assert!(matches!(
            CampaignState::from_cli(&cli, NOW),
            Err(CampaignError::InvertedBounds { .. })
        ));

        let cli = parse(&["reboot", "--", "now;", "id"]);
        let err = CampaignState::from_cli(&cli, NOW).unwrap_err();
        assert!(matches!(Error::from(err), Error::Config(_)));
    }

    #[test]
    fn continuation_decrements_and_stamps() {
        let s = state(&["-r", "3", "poweroff"]);
        let next = s.continuation(NOW + 40);
        assert_eq!(next.repetitions_remaining, 2);
        assert_eq!(next.total_repetitions, 3);
        assert_eq!(next.campaign_start, NOW);
        assert_eq!(next.last_operation_timestamp, Some(NOW + 40));
        assert!(next.append);
        assert_eq!(next.iteration(), 1);
        assert!(!next.is_first_cycle());
    }

    #[test]
    fn args_round_trip_through_cli() {
        let s = state(&["-r", "3", "-w", "90", "--silent", "--log-level", "debug", "poweroff", "--", "--no-wall"]);
        let next = s.continuation(NOW + 12);
        let args = next.to_args();

        assert!(args.contains(&"--append".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--no-wall"));

        let reparsed = CampaignState::from_cli(
            &Cli::try_parse_from(std::iter::once("pm-core".to_string()).chain(args)).unwrap(),
            NOW + 999,
        )
        .unwrap();
        assert_eq!(reparsed, next);
    }

    #[test]
    fn log_level_only_carried_when_given() {
        let implicit = state(&["-r", "2", "reboot"]).continuation(NOW + 1);
        assert!(!implicit.to_args().iter().any(|a| a.starts_with("--log-level")));

        let explicit = state(&["-r", "2", "--log-level", "error", "reboot"]).continuation(NOW + 1);
        assert!(explicit.to_args().contains(&"--log-level=error".to_string()));
    }

    #[test]
    fn summary_subtracts_waits_and_sleep() {
        let mut s = state(&["-r", "2", "--pm-delay", "5", "--hardware-delay", "30", "reboot"]);
        s.repetitions_remaining = 0;
        // 2 cycles: 2 * (5 + 30) = 70s of countdowns, 5s grace each.
        let summary = s.summary(NOW + 270, 5);
        assert_eq!(summary.total_elapsed, TimeDelta::seconds(270));
        assert_eq!(summary.average_recovery, TimeDelta::seconds(95));
        assert_eq!(
            summary.to_string(),
            "Total elapsed time: 0:04:30\nAverage recovery time: 0:01:35"
        );
    }

    #[test]
    fn summary_uses_wakeup_for_alarm_operations() {
        let s = state(&["-r", "1", "-w", "60", "--pm-delay", "0", "--hardware-delay", "0", "suspend"]);
        let summary = s.summary(NOW + 75, 5);
        assert_eq!(summary.average_recovery, TimeDelta::seconds(15));
    }

    #[test]
    fn format_delta_handles_negative_and_fractions() {
        assert_eq!(format_delta(TimeDelta::seconds(-61)), "-0:01:01");
        assert_eq!(format_delta(TimeDelta::milliseconds(3_723_500)), "1:02:03.500");
    }

    proptest! {
        #[test]
        fn remaining_decreases_by_one_until_complete(total in 1u32..50) {
            let cli = parse(&["-r", &total.to_string(), "poweroff"]);
            let mut s = CampaignState::from_cli(&cli, NOW).unwrap();
            let mut cycles = 0;
            while !s.is_complete() {
                let before = s.repetitions_remaining;
                s = s.continuation(NOW + i64::from(cycles));
                prop_assert_eq!(s.repetitions_remaining, before - 1);
                prop_assert_eq!(s.total_repetitions, total);
                cycles += 1;
            }
            prop_assert_eq!(cycles, total);
            prop_assert_eq!(s.iteration(), total);
        }

        #[test]
        fn min_duration_normalization(wakeup in 0u64..10_000, reboot in any::<bool>()) {
            let op = if reboot { "reboot" } else { "suspend" };
            let cli = parse(&["-w", &wakeup.to_string(), "--max-pm-time", "20000", op]);
            let s = CampaignState::from_cli(&cli, NOW).unwrap();
            if reboot {
                prop_assert_eq!(s.wakeup_seconds, 0);
                prop_assert_eq!(s.min_duration, 0);
            } else {
                prop_assert_eq!(s.min_duration, wakeup.saturating_sub(2));
            }
        }
    }
}
