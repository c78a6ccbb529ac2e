//! Test doubles shared by the campaign integration tests.
#![allow(dead_code)]

use pm_core::alarm::{AlarmError, WakeAlarmControl};
use pm_core::countdown::CancelToken;
use pm_core::hwinfo::{HardwareInventory, HardwareReport};
use pm_core::notify::{Notice, Notifier};
use pm_core::runner::{CommandExecutor, CommandOutput, CommandSpec, RunnerError};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

/// Runner that never starts a process.
///
/// Blocking commands report `resume_after` as their duration; a scripted
/// queue of self-test outputs answers cancellable runs.
#[derive(Default)]
pub struct ScriptedRunner {
    pub resume_after: Duration,
    pub self_test_output: RefCell<VecDeque<String>>,
    pub runs: RefCell<Vec<CommandSpec>>,
    pub spawned: RefCell<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn resuming_after(secs: u64) -> Self {
        Self {
            resume_after: Duration::from_secs(secs),
            ..Self::default()
        }
    }

    pub fn with_self_test(self, output: &str) -> Self {
        self.self_test_output.borrow_mut().push_back(output.to_string());
        self
    }

    pub fn spawned_programs(&self) -> Vec<String> {
        self.spawned
            .borrow()
            .iter()
            .map(|spec| spec.args.get(4).cloned().unwrap_or_default())
            .collect()
    }
}

impl CommandExecutor for ScriptedRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        self.runs.borrow_mut().push(spec.clone());
        Ok(CommandOutput {
            exit_code: Some(0),
            stdout: Vec::new(),
            stderr: Vec::new(),
            duration: self.resume_after,
        })
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<(), RunnerError> {
        self.spawned.borrow_mut().push(spec.clone());
        Ok(())
    }

    fn run_cancellable(
        &self,
        spec: &CommandSpec,
        cancel: &CancelToken,
        _tick: Duration,
        _on_tick: &mut dyn FnMut(),
    ) -> Result<Option<CommandOutput>, RunnerError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        self.runs.borrow_mut().push(spec.clone());
        let stdout = self.self_test_output.borrow_mut().pop_front().unwrap_or_default();
        Ok(Some(CommandOutput {
            exit_code: Some(0),
            stdout: stdout.into_bytes(),
            stderr: Vec::new(),
            duration: Duration::ZERO,
        }))
    }
}

/// Wake alarm that accepts every request.
#[derive(Default)]
pub struct AcceptingAlarm {
    pub armed: RefCell<Vec<u64>>,
}

impl WakeAlarmControl for AcceptingAlarm {
    fn arm(&self, seconds: u64) -> Result<i64, AlarmError> {
        self.armed.borrow_mut().push(seconds);
        Ok(seconds as i64)
    }
}

pub struct EmptyInventory;

impl HardwareInventory for EmptyInventory {
    fn collect(&self) -> HardwareReport {
        HardwareReport::default()
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: RefCell<Vec<Notice>>,
}

impl Notifier for RecordingNotifier {
    fn acknowledge(&self, notice: &Notice) {
        self.notices.borrow_mut().push(notice.clone());
    }
}
