//! End-of-campaign notices.

use pm_common::Operation;
use std::io::Write;
use std::sync::Mutex;

/// How a notice should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// A message the operator has to see when the campaign ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub severity: Severity,
}

impl Notice {
    pub fn completed(operation: Operation) -> Self {
        Self {
            title: format!("{} test", operation.title()),
            message: format!("{} test complete", operation.title()),
            severity: Severity::Info,
        }
    }

    pub fn cancelled(operation: Operation) -> Self {
        Self {
            title: format!("{} test", operation.title()),
            message: format!("{} test cancelled by user", operation.title()),
            severity: Severity::Error,
        }
    }

    pub fn failed(operation: Operation) -> Self {
        Self {
            title: format!("{} test", operation.title()),
            message: format!("{} test failed", operation.title()),
            severity: Severity::Error,
        }
    }
}

/// Surface that shows notices to the operator.
pub trait Notifier {
    fn acknowledge(&self, notice: &Notice);
}

/// Writes notices to a terminal stream (stderr by default).
pub struct TerminalNotifier<W: Write + Send = std::io::Stderr> {
    out: Mutex<W>,
}

impl TerminalNotifier {
    pub fn stderr() -> Self {
        Self {
            out: Mutex::new(std::io::stderr()),
        }
    }
}

impl<W: Write + Send> TerminalNotifier<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> Notifier for TerminalNotifier<W> {
    fn acknowledge(&self, notice: &Notice) {
        let marker = match notice.severity {
            Severity::Info => "",
            Severity::Error => "[!] ",
        };
        if let Ok(mut out) = self.out.lock() {
            let _ = writeln!(out, "{}{}: {}", marker, notice.title, notice.message);
            let _ = out.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notice_texts() {
        assert_eq!(Notice::completed(Operation::Reboot).message, "Reboot test complete");
        assert_eq!(
            Notice::cancelled(Operation::Suspend).message,
            "Suspend test cancelled by user"
        );
        let failed = Notice::failed(Operation::Poweroff);
        assert_eq!(failed.title, "Poweroff test");
        assert_eq!(failed.message, "Poweroff test failed");
        assert_eq!(failed.severity, Severity::Error);
    }

    #[test]
    fn terminal_notifier_writes_line() {
        let notifier = TerminalNotifier::new(Vec::new());
        notifier.acknowledge(&Notice::completed(Operation::Hibernate));
        notifier.acknowledge(&Notice::failed(Operation::Hibernate));
        let text = String::from_utf8(notifier.into_inner()).unwrap();
        assert_eq!(
            text,
            "Hibernate test: Hibernate test complete\n[!] Hibernate test: Hibernate test failed\n"
        );
    }
}
