//! Test cycle orchestrator.
//!
//! One invocation of pm-core drives the campaign forward from whatever
//! state its arguments describe:
//!
//! ```text
//! setup ─► gate ─► countdown ─► arm alarm ─► power command ─┐
//!            ▲                                               │ suspend/hibernate
//!            └───────────────────────────────────────────────┘
//!                      remaining == 0 ─► countdown ─► teardown ─► summary
//! ```
//!
//! Reboot and poweroff run a single pass: the continuation entry is
//! written before the delayed power command is spawned, and the next
//! invocation picks up from there after the restart. Suspend and hibernate
//! loop in-process because the blocking command returns on resume.
//!
//! Bounds failures and cancellations are caught once in
//! [`Orchestrator::execute`], which tears the campaign down and notifies
//! the operator. Every other error propagates untouched.

use crate::alarm::WakeAlarmControl;
use crate::campaign::{CampaignState, CampaignSummary};
use crate::clock::Clock;
use crate::continuation::ContinuationStore;
use crate::countdown::{schedule, timed_wait, CancelToken, CountdownKind, CountdownStep};
use crate::environment::EnvironmentChange;
use crate::hwinfo::HardwareInventory;
use crate::log_event;
use crate::logging::{event_names, LogContext, Stage};
use crate::notify::{Notice, Notifier};
use crate::runner::{delayed, CommandExecutor, CommandSpec};
use pm_common::{Error, Result};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// External systems the orchestrator drives.
pub struct Collaborators<'a> {
    pub runner: &'a dyn CommandExecutor,
    pub alarm: &'a dyn WakeAlarmControl,
    pub continuation: &'a dyn ContinuationStore,
    /// Applied in order on the first cycle, reverted in reverse order.
    pub environment: Vec<&'a dyn EnvironmentChange>,
    pub inventory: &'a dyn HardwareInventory,
    pub notifier: &'a dyn Notifier,
    pub clock: &'a dyn Clock,
}

/// Timing knobs that are not part of the campaign itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Countdown polling interval.
    pub tick: Duration,
    /// Delay between spawning reboot/poweroff and the transition.
    pub grace_delay_secs: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            grace_delay_secs: 5,
        }
    }
}

/// How an invocation ended when nothing went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The last cycle was validated and the campaign is over.
    Completed(CampaignSummary),
    /// A reboot/poweroff was requested; the campaign continues after the
    /// restart with `remaining` operations left.
    RestartPending { remaining: u32 },
}

pub struct Orchestrator<'a> {
    state: CampaignState,
    deps: Collaborators<'a>,
    cancel: CancelToken,
    ctx: LogContext,
    timing: Timing,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        state: CampaignState,
        deps: Collaborators<'a>,
        cancel: CancelToken,
        ctx: LogContext,
        timing: Timing,
    ) -> Self {
        Self {
            state,
            deps,
            cancel,
            ctx,
            timing,
        }
    }

    pub fn state(&self) -> &CampaignState {
        &self.state
    }

    /// Run this invocation's share of the campaign.
    ///
    /// A bounds failure or a cancellation reverts the environment, removes
    /// the continuation entry and notifies the operator before the error is
    /// returned.
    pub fn execute(&mut self) -> Result<Outcome> {
        if self.state.last_operation_timestamp.is_some() {
            log_event!(
                self.ctx,
                INFO,
                event_names::CAMPAIGN_RESUMED,
                Stage::Init,
                format!("Resuming {} campaign", self.state.operation),
                iteration = self.state.iteration(),
                total = self.state.total_repetitions
            );
        }
        let result = self.setup().and_then(|()| self.run());

        match result {
            Err(err) if err.requires_teardown() => {
                if let Err(teardown_err) = self.teardown() {
                    error!(error = %teardown_err, "teardown incomplete");
                }
                let notice = if err.is_cancellation() {
                    Notice::cancelled(self.state.operation)
                } else {
                    log_event!(
                        self.ctx,
                        ERROR,
                        event_names::CAMPAIGN_ABORTED,
                        Stage::Teardown,
                        err.to_string(),
                        category = tracing::field::display(err.category())
                    );
                    Notice::failed(self.state.operation)
                };
                self.notify(&notice);
                Err(err)
            }
            other => other,
        }
    }

    /// One-time preparation for campaigns that survive a restart.
    pub fn setup(&mut self) -> Result<()> {
        if !self.state.operation.restarts_process() {
            return Ok(());
        }

        if self.state.is_first_cycle() {
            for change in &self.deps.environment {
                change.enable()?;
                log_event!(
                    self.ctx,
                    DEBUG,
                    event_names::ENV_ENABLED,
                    Stage::Setup,
                    format!("{} enabled", change.name())
                );
            }
        }

        // Written now so that a transition killing this process early still
        // resumes; refreshed right before the power command is issued.
        if !self.state.is_complete() {
            self.persist_continuation(Stage::Setup)?;
        }
        Ok(())
    }

    /// Drive cycles until the campaign completes or the machine restarts.
    pub fn run(&mut self) -> Result<Outcome> {
        loop {
            let outcome = self.run_one_cycle()?;
            if self.state.operation.restarts_process() {
                return Ok(outcome);
            }
            if let Outcome::Completed(_) = outcome {
                return Ok(outcome);
            }
            self.state.complete_cycle();
        }
    }

    fn run_one_cycle(&mut self) -> Result<Outcome> {
        log_event!(
            self.ctx,
            INFO,
            event_names::CYCLE_STARTED,
            Stage::Cycle,
            format!(
                "{} operations remaining: {}",
                self.state.operation, self.state.repetitions_remaining
            ),
            iteration = self.state.iteration(),
            total = self.state.total_repetitions
        );

        self.check_last_cycle()?;
        if self.state.is_complete() {
            self.summary()
        } else {
            self.run_power_command()
        }
    }

    /// Validate how long the previous (restarting) cycle took.
    fn check_last_cycle(&self) -> Result<()> {
        let Some(issued_at) = self.state.last_operation_at() else {
            return Ok(());
        };
        match self.state.gate().check_since(issued_at, self.deps.clock.now()) {
            Ok(elapsed) => {
                log_event!(
                    self.ctx,
                    INFO,
                    event_names::GATE_PASSED,
                    Stage::Gate,
                    format!("{} time: {:?}", self.state.operation.title(), elapsed),
                    elapsed_secs = elapsed.as_secs_f64()
                );
                Ok(())
            }
            Err(err) => {
                log_event!(
                    self.ctx,
                    ERROR,
                    event_names::GATE_FAILED,
                    Stage::Gate,
                    err.to_string()
                );
                Err(err.into())
            }
        }
    }

    /// Countdowns and hardware inventory for the current iteration.
    fn countdown(&self) -> Result<()> {
        let iteration = self.state.iteration();
        let total = self.state.total_repetitions;
        info!(progress = %format!("{}/{}", iteration, total), "{} test", self.state.operation.title());

        for step in schedule(iteration, total, self.state.pm_delay, self.state.hardware_delay) {
            match step {
                CountdownStep::GatherHardwareInfo => {
                    self.deps.inventory.collect();
                }
                CountdownStep::Wait { kind, seconds } => {
                    let label = match kind {
                        CountdownKind::PowerOperation => format!("Next {}", self.state.operation),
                        CountdownKind::HardwareInfo => "Gathering hardware information".to_string(),
                    };
                    info!("{} in {} seconds...", label, seconds);
                    let waited = timed_wait(
                        Duration::from_secs(seconds),
                        self.timing.tick,
                        &self.cancel,
                        |left| debug!("{} in {} seconds...", label, left),
                    );
                    if waited.is_err() {
                        log_event!(
                            self.ctx,
                            WARN,
                            event_names::COUNTDOWN_CANCELLED,
                            Stage::Cycle,
                            "Countdown cancelled",
                            iteration = iteration
                        );
                        return Err(Error::UserCancelled(self.state.operation));
                    }
                }
            }
        }
        Ok(())
    }

    fn run_power_command(&mut self) -> Result<Outcome> {
        self.countdown()?;

        let operation = self.state.operation;
        if operation.needs_wake_alarm() {
            let stored = self.deps.alarm.arm(self.state.wakeup_seconds)?;
            log_event!(
                self.ctx,
                DEBUG,
                event_names::ALARM_ARMED,
                Stage::Alarm,
                format!("Wake alarm set for {} seconds", self.state.wakeup_seconds),
                wakeup_at = stored
            );
        }

        info!("Executing new {:?} operation...", operation.as_str());
        if operation.blocks_until_resume() {
            let command = CommandSpec::new(format!("pm-{}", operation), self.state.extra_args.clone())
                .quiet();
            let output = self.deps.runner.run(&command)?;
            if !output.success() {
                warn!(exit_code = ?output.exit_code, "{} returned a failure status", command.program);
            }
            let elapsed = self.state.gate().check(output.duration).map_err(|err| {
                log_event!(self.ctx, ERROR, event_names::GATE_FAILED, Stage::Gate, err.to_string());
                Error::from(err)
            })?;
            log_event!(
                self.ctx,
                INFO,
                event_names::POWER_RESUMED,
                Stage::Cycle,
                format!("{} time: {:?}", operation.title(), elapsed),
                elapsed_secs = elapsed.as_secs_f64()
            );
        } else {
            self.persist_continuation(Stage::Cycle)?;
            let command = delayed(
                self.timing.grace_delay_secs,
                operation.as_str(),
                &self.state.extra_args,
            );
            self.deps.runner.spawn_detached(&command)?;
            log_event!(
                self.ctx,
                INFO,
                event_names::POWER_ISSUED,
                Stage::Cycle,
                format!("{} requested in {} seconds", operation, self.timing.grace_delay_secs)
            );
        }

        Ok(Outcome::RestartPending {
            remaining: self.state.repetitions_remaining.saturating_sub(1),
        })
    }

    fn persist_continuation(&self, stage: Stage) -> Result<()> {
        let next = self.state.continuation(self.deps.clock.epoch_secs());
        self.deps.continuation.persist(&next)?;
        log_event!(
            self.ctx,
            DEBUG,
            event_names::CONTINUATION_WRITTEN,
            stage,
            "Continuation entry written",
            remaining = next.repetitions_remaining
        );
        Ok(())
    }

    /// Final inventory, teardown and statistics.
    fn summary(&mut self) -> Result<Outcome> {
        self.countdown()?;
        self.teardown()?;

        let summary = self
            .state
            .summary(self.deps.clock.epoch_secs(), self.timing.grace_delay_secs);
        log_event!(
            self.ctx,
            INFO,
            event_names::CAMPAIGN_FINISHED,
            Stage::Finalize,
            summary.to_string(),
            total_secs = summary.total_elapsed.num_seconds(),
            average_ms = summary.average_recovery.num_milliseconds()
        );

        self.notify(&Notice::completed(self.state.operation));
        Ok(Outcome::Completed(summary))
    }

    /// Revert environment changes and drop the continuation entry.
    ///
    /// Every step is attempted; the first error is returned.
    pub fn teardown(&self) -> Result<()> {
        if !self.state.operation.restarts_process() {
            return Ok(());
        }
        let mut first_error: Option<Error> = None;

        match self.deps.continuation.clear() {
            Ok(()) => log_event!(
                self.ctx,
                DEBUG,
                event_names::CONTINUATION_CLEARED,
                Stage::Teardown,
                "Continuation entry removed"
            ),
            Err(e) => {
                error!(error = %e, "could not remove continuation entry");
                first_error.get_or_insert(e.into());
            }
        }

        for change in self.deps.environment.iter().rev() {
            match change.disable() {
                Ok(()) => log_event!(
                    self.ctx,
                    DEBUG,
                    event_names::ENV_RESTORED,
                    Stage::Teardown,
                    format!("{} restored", change.name())
                ),
                Err(e) => {
                    error!(change = change.name(), error = %e, "could not restore");
                    first_error.get_or_insert(e.into());
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn notify(&self, notice: &Notice) {
        if self.state.silent {
            info!("{}", notice.message);
        } else {
            self.deps.notifier.acknowledge(notice);
        }
    }
}
