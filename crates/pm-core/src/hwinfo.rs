//! Hardware inventory logged around every cycle.
//!
//! The inventory is diagnostic only: a missing tool or a failing kernel log
//! check is logged and never fails the campaign.

use crate::runner::{CommandExecutor, CommandSpec, RunnerError};
use tracing::{debug, error, info, warn};

/// One titled block of inventory output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySection {
    pub title: &'static str,
    pub body: String,
}

/// What one inventory run found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareReport {
    pub sections: Vec<InventorySection>,
    /// Whether the kernel log check passed; None when it could not run.
    pub kernel_log_clean: Option<bool>,
}

impl HardwareReport {
    pub fn section(&self, title: &str) -> Option<&str> {
        self.sections
            .iter()
            .find(|section| section.title == title)
            .map(|section| section.body.as_str())
    }
}

/// Collector invoked at the hardware-information points of each cycle.
pub trait HardwareInventory {
    fn collect(&self) -> HardwareReport;
}

/// Inventory gathered with the usual Linux userland tools.
pub struct SystemInventory<'a> {
    runner: &'a dyn CommandExecutor,
    kernel_log: Option<CommandSpec>,
}

impl<'a> SystemInventory<'a> {
    /// `kernel_log_command` is a whitespace separated command line; an
    /// empty one disables the check.
    pub fn new(runner: &'a dyn CommandExecutor, kernel_log_command: &str) -> Self {
        Self {
            runner,
            kernel_log: CommandSpec::from_command_line(kernel_log_command),
        }
    }

    fn stdout_of(&self, program: &str, args: &[&str]) -> Option<String> {
        let spec = CommandSpec::new(program, args.iter().map(|a| a.to_string()).collect());
        match self.runner.run(&spec) {
            Ok(output) => Some(output.stdout_str()),
            Err(RunnerError::SpawnFailed { command, .. }) => {
                debug!(command = %command, "tool not available, skipping");
                None
            }
            Err(e) => {
                warn!(command = %program, error = %e, "inventory command failed");
                None
            }
        }
    }

    fn check_kernel_log(&self) -> Option<bool> {
        let spec = self.kernel_log.as_ref()?;
        match self.runner.run(spec) {
            Ok(output) if output.success() => Some(true),
            Ok(_) => {
                error!("Problem found in logs by {}", spec.program);
                Some(false)
            }
            Err(e) => {
                warn!(command = %spec.display(), error = %e, "kernel log check could not run");
                None
            }
        }
    }
}

/// Lines of `text` containing any of `needles`.
pub fn lines_matching(text: &str, needles: &[&str]) -> String {
    text.lines()
        .filter(|line| needles.iter().any(|needle| line.contains(needle)))
        .collect::<Vec<_>>()
        .join("\n")
}

impl HardwareInventory for SystemInventory<'_> {
    fn collect(&self) -> HardwareReport {
        info!("Gathering hardware information...");
        let lspci = self.stdout_of("lspci", &[]).unwrap_or_default();

        let mut networking = lines_matching(&lspci, &["Network", "Ethernet"]);
        if let Some(links) = self.stdout_of("ip", &["-o", "link"]) {
            networking.push('\n');
            networking.push_str(links.trim_end());
        }

        let sections = vec![
            InventorySection {
                title: "Networking",
                body: networking,
            },
            InventorySection {
                title: "Bluetooth Device",
                body: self.stdout_of("hciconfig", &["-a"]).unwrap_or_default(),
            },
            InventorySection {
                title: "Video Card",
                body: lines_matching(&lspci, &["VGA"]),
            },
            InventorySection {
                title: "Touchpad and Keyboard",
                body: self.stdout_of("xinput", &["list"]).unwrap_or_default(),
            },
            InventorySection {
                title: "Audio Device",
                body: lines_matching(
                    &self.stdout_of("pactl", &["stat"]).unwrap_or_default(),
                    &["Sink"],
                ),
            },
        ];
        for section in &sections {
            debug!("{}:\n{}", section.title, section.body.trim_end());
        }

        HardwareReport {
            sections,
            kernel_log_clean: self.check_kernel_log(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::countdown::CancelToken;
    use crate::runner::CommandOutput;
    use std::cell::RefCell;
    use std::time::Duration;

    /// Answers from a table keyed by program name.
    struct TableRunner {
        table: Vec<(&'static str, &'static str, i32)>,
        calls: RefCell<Vec<String>>,
    }

    impl CommandExecutor for TableRunner {
        fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
            self.calls.borrow_mut().push(spec.display());
            match self.table.iter().find(|(program, _, _)| *program == spec.program) {
                Some((_, stdout, code)) => Ok(CommandOutput {
                    exit_code: Some(*code),
                    stdout: stdout.as_bytes().to_vec(),
                    stderr: Vec::new(),
                    duration: Duration::ZERO,
                }),
                None => Err(RunnerError::SpawnFailed {
                    command: spec.program.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                }),
            }
        }

        fn spawn_detached(&self, _spec: &CommandSpec) -> Result<(), RunnerError> {
            Ok(())
        }

        fn run_cancellable(
            &self,
            spec: &CommandSpec,
            _cancel: &CancelToken,
            _tick: Duration,
            _on_tick: &mut dyn FnMut(),
        ) -> Result<Option<CommandOutput>, RunnerError> {
            self.run(spec).map(Some)
        }
    }

    const LSPCI: &str = "00:02.0 VGA compatible controller: Intel\n00:19.0 Ethernet controller: Intel\n03:00.0 Network controller: Atheros\n00:1b.0 Audio device: Intel\n";

    #[test]
    fn filters_lspci_output() {
        let runner = TableRunner {
            table: vec![("lspci", LSPCI, 0), ("fwts", "", 0)],
            calls: RefCell::new(Vec::new()),
        };
        let report = SystemInventory::new(&runner, "fwts -r stdout klog dmesg_common oops").collect();

        assert_eq!(
            report.section("Video Card"),
            Some("00:02.0 VGA compatible controller: Intel")
        );
        let networking = report.section("Networking").unwrap();
        assert!(networking.contains("Ethernet controller"));
        assert!(networking.contains("Network controller"));
        assert!(!networking.contains("Audio"));
        assert_eq!(report.kernel_log_clean, Some(true));
    }

    #[test]
    fn missing_tools_are_skipped() {
        let runner = TableRunner {
            table: vec![],
            calls: RefCell::new(Vec::new()),
        };
        let report = SystemInventory::new(&runner, "fwts -r stdout klog").collect();
        assert_eq!(report.sections.len(), 5);
        assert_eq!(report.section("Bluetooth Device"), Some(""));
        assert_eq!(report.kernel_log_clean, None);
    }

    #[test]
    fn kernel_log_problems_do_not_fail() {
        let runner = TableRunner {
            table: vec![("fwts", "oops found", 1)],
            calls: RefCell::new(Vec::new()),
        };
        let report = SystemInventory::new(&runner, "fwts -r stdout klog dmesg_common oops").collect();
        assert_eq!(report.kernel_log_clean, Some(false));
        assert!(runner
            .calls
            .borrow()
            .contains(&"fwts -r stdout klog dmesg_common oops".to_string()));
    }

    #[test]
    fn empty_kernel_log_command_disables_check() {
        let runner = TableRunner {
            table: vec![("fwts", "", 1)],
            calls: RefCell::new(Vec::new()),
        };
        let report = SystemInventory::new(&runner, "").collect();
        assert_eq!(report.kernel_log_clean, None);
    }

    #[test]
    fn lines_matching_any_needle() {
        assert_eq!(lines_matching("a Sink\nb\nc Sink", &["Sink"]), "a Sink\nc Sink");
        assert_eq!(lines_matching("", &["x"]), "");
    }
}
