//! Command runner for the external tools a campaign drives.
//!
//! Every external program (power commands, the wake alarm self-test,
//! hardware inventory tools) is executed through here:
//!
//! - Commands are structured argument vectors, never interpolated shell
//!   strings; operator-supplied extra arguments are validated
//! - A non-zero exit status is data, not an error; only spawn failures are
//! - Wall-clock duration is measured around the blocking wait, which is the
//!   quantity under test for suspend/hibernate
//! - Long-running tools can be polled cooperatively and killed when the
//!   campaign is cancelled
//!
//! # Example
//!
//! ```ignore
//! use pm_core::runner::{CommandExecutor, CommandSpec, SystemRunner};
//!
//! let output = SystemRunner::new().run(&CommandSpec::new("pm-suspend", vec![]))?;
//! println!("resumed after {:?}", output.duration);
//! ```

use crate::countdown::CancelToken;
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, trace, warn};

/// Errors that can occur while executing a command.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid argument {0:?}: shell metacharacters are not allowed")]
    InvalidArgument(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RunnerError> for pm_common::Error {
    fn from(err: RunnerError) -> Self {
        match err {
            RunnerError::SpawnFailed { source, .. } | RunnerError::Io(source) => {
                pm_common::Error::Io(source)
            }
            RunnerError::InvalidArgument(_) => pm_common::Error::Config(err.to_string()),
        }
    }
}

/// A command to run: program plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (looked up on PATH).
    pub program: String,
    /// Arguments passed verbatim, without shell interpretation.
    pub args: Vec<String>,
    /// Capture and log stdout/stderr.
    pub verbose: bool,
}

impl CommandSpec {
    /// Create a verbose command.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            verbose: true,
        }
    }

    /// Build from a whitespace separated command line such as
    /// `"fwts wakealarm --stdout-summary"`.
    ///
    /// Only used for fixed command lines from configuration; no quoting rules.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    /// Do not keep stdout/stderr.
    pub fn quiet(mut self) -> Self {
        self.verbose = false;
        self
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code (None when killed by a signal).
    pub exit_code: Option<i32>,
    /// Standard output (empty unless verbose).
    pub stdout: Vec<u8>,
    /// Standard error (empty unless verbose).
    pub stderr: Vec<u8>,
    /// Wall-clock time between spawn and exit.
    pub duration: Duration,
}

impl CommandOutput {
    /// Get stdout as string (lossy UTF-8 conversion).
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as string (lossy UTF-8 conversion).
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// Check if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Last non-empty line of stdout, e.g. a test harness verdict.
    pub fn last_line(&self) -> Option<String> {
        self.stdout_str()
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
    }
}

/// Seam between the campaign logic and the operating system.
pub trait CommandExecutor {
    /// Run to completion, blocking the caller.
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError>;

    /// Spawn without waiting. The child outlives this process if the OS
    /// does not tear it down first.
    fn spawn_detached(&self, spec: &CommandSpec) -> Result<(), RunnerError>;

    /// Run while polling `cancel` every `tick`. `on_tick` is invoked on each
    /// poll (progress pulse). Returns `None` if the command was cancelled
    /// and killed.
    fn run_cancellable(
        &self,
        spec: &CommandSpec,
        cancel: &CancelToken,
        tick: Duration,
        on_tick: &mut dyn FnMut(),
    ) -> Result<Option<CommandOutput>, RunnerError>;
}

/// Executes commands on the local system.
#[derive(Debug, Default, Clone)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }

    fn build_command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command.stdin(Stdio::null());
        if spec.verbose {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        command
    }

    fn spawn(spec: &CommandSpec) -> Result<Child, RunnerError> {
        debug!(command = %spec.display(), "executing");
        Self::build_command(spec)
            .spawn()
            .map_err(|source| {
                error!(command = %spec.program, error = %source, "failed to spawn");
                RunnerError::SpawnFailed {
                    command: spec.program.clone(),
                    source,
                }
            })
    }

    fn log_output(spec: &CommandSpec, output: &CommandOutput) {
        if !spec.verbose {
            return;
        }
        let mut message = format!("Output:\n- returncode:\n{:?}", output.exit_code);
        if !output.stdout.is_empty() {
            message.push_str(&format!("\n- stdout:\n{}", output.stdout_str()));
        }
        if !output.stderr.is_empty() {
            message.push_str(&format!("\n- stderr:\n{}", output.stderr_str()));
        }
        debug!(command = %spec.display(), "{}", message);
    }
}

impl CommandExecutor for SystemRunner {
    fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, RunnerError> {
        let start = Instant::now();
        let child = Self::spawn(spec)?;
        let raw = child.wait_with_output()?;
        let duration = start.elapsed();

        let output = CommandOutput {
            exit_code: raw.status.code(),
            stdout: raw.stdout,
            stderr: raw.stderr,
            duration,
        };
        Self::log_output(spec, &output);
        Ok(output)
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<(), RunnerError> {
        let quiet = spec.clone().quiet();
        let child = Self::spawn(&quiet)?;
        debug!(pid = child.id(), command = %spec.display(), "spawned detached");
        Ok(())
    }

    fn run_cancellable(
        &self,
        spec: &CommandSpec,
        cancel: &CancelToken,
        tick: Duration,
        on_tick: &mut dyn FnMut(),
    ) -> Result<Option<CommandOutput>, RunnerError> {
        let start = Instant::now();
        let mut child = Self::spawn(spec)?;
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        let mut stdout = child.stdout.take();
        let mut stderr = child.stderr.take();
        let mut chunk = vec![0u8; 8192];

        loop {
            if cancel.is_cancelled() {
                warn!(command = %spec.display(), "cancelled, killing command");
                let _ = child.kill();
                let _ = child.wait();
                return Ok(None);
            }

            if let Some(ref mut out) = stdout {
                drain_available(out, &mut chunk, &mut stdout_buf)?;
            }
            if let Some(ref mut err) = stderr {
                drain_available(err, &mut chunk, &mut stderr_buf)?;
            }

            match child.try_wait()? {
                Some(status) => {
                    if let Some(ref mut out) = stdout {
                        out.read_to_end(&mut stdout_buf)?;
                    }
                    if let Some(ref mut err) = stderr {
                        err.read_to_end(&mut stderr_buf)?;
                    }
                    trace!(exit_code = ?status.code(), "process exited");
                    let output = CommandOutput {
                        exit_code: status.code(),
                        stdout: stdout_buf,
                        stderr: stderr_buf,
                        duration: start.elapsed(),
                    };
                    Self::log_output(spec, &output);
                    return Ok(Some(output));
                }
                None => {
                    on_tick();
                    thread::sleep(tick);
                }
            }
        }
    }
}

fn drain_available<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    chunk: &mut [u8],
    buf: &mut Vec<u8>,
) -> std::io::Result<()> {
    loop {
        match try_read_nonblocking(stream, chunk)? {
            0 => return Ok(()),
            n => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

/// Try to read from a stream without blocking.
///
/// Sets O_NONBLOCK on the file descriptor for the duration of the read and
/// restores the original flags. Returns Ok(0) if no data is available.
fn try_read_nonblocking<R: Read + std::os::unix::io::AsRawFd>(
    stream: &mut R,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    let fd = stream.as_raw_fd();

    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }

    let was_nonblocking = (flags & libc::O_NONBLOCK) != 0;
    if !was_nonblocking {
        let result = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
        if result < 0 {
            return Err(std::io::Error::last_os_error());
        }
    }

    let result = stream.read(buf);

    if !was_nonblocking {
        unsafe {
            libc::fcntl(fd, libc::F_SETFL, flags);
        }
    }

    match result {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) => Err(e),
    }
}

/// Reject arguments that only make sense to a shell.
///
/// Extra arguments for the power command come from the operator's command
/// line and are forwarded as separate argv entries; anything that looks like
/// an attempt to chain or substitute commands is refused outright.
pub fn validate_argument(arg: &str) -> Result<(), RunnerError> {
    if arg.contains(['|', '&', ';', '$', '`', '<', '>', '\n', '\r']) {
        return Err(RunnerError::InvalidArgument(arg.to_string()));
    }
    Ok(())
}

/// Wrap `program args..` so it starts after `delay` seconds.
///
/// The delay lets this process report its status before a reboot or
/// poweroff takes the machine down. The script text is constant; the
/// delay, program and arguments travel as positional parameters.
pub fn delayed(delay: u64, program: &str, args: &[String]) -> CommandSpec {
    let mut argv = vec![
        "-c".to_string(),
        r#"sleep "$1"; shift; exec "$@""#.to_string(),
        "pm-core".to_string(),
        delay.to_string(),
        program.to_string(),
    ];
    argv.extend(args.iter().cloned());
    CommandSpec::new("sh", argv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_echo() {
        let runner = SystemRunner::new();
        let output = runner
            .run(&CommandSpec::new("echo", vec!["hello".into(), "world".into()]))
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout_str().trim(), "hello world");
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let runner = SystemRunner::new();
        let output = runner
            .run(&CommandSpec::new("sh", vec!["-c".into(), "exit 42".into()]))
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(42));
    }

    #[test]
    fn test_quiet_discards_output() {
        let runner = SystemRunner::new();
        let output = runner
            .run(&CommandSpec::new("echo", vec!["hidden".into()]).quiet())
            .unwrap();

        assert!(output.success());
        assert!(output.stdout.is_empty());
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let runner = SystemRunner::new();
        let result = runner.run(&CommandSpec::new("/nonexistent/pm-tool", vec![]));
        match result {
            Err(RunnerError::SpawnFailed { command, .. }) => {
                assert_eq!(command, "/nonexistent/pm-tool")
            }
            other => panic!("expected SpawnFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_duration_is_measured() {
        let runner = SystemRunner::new();
        let output = runner
            .run(&CommandSpec::new("sleep", vec!["0.2".into()]))
            .unwrap();
        assert!(output.duration >= Duration::from_millis(150));
    }

    #[test]
    fn test_run_cancellable_completes() {
        let runner = SystemRunner::new();
        let cancel = CancelToken::new();
        let mut ticks = 0;
        let output = runner
            .run_cancellable(
                &CommandSpec::new("sh", vec!["-c".into(), "sleep 0.1; echo PASSED".into()]),
                &cancel,
                Duration::from_millis(10),
                &mut || ticks += 1,
            )
            .unwrap()
            .unwrap();

        assert_eq!(output.last_line().as_deref(), Some("PASSED"));
        assert!(ticks > 0);
    }

    #[test]
    fn test_run_cancellable_honours_cancel() {
        let runner = SystemRunner::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let start = Instant::now();
        let output = runner
            .run_cancellable(
                &CommandSpec::new("sleep", vec!["10".into()]),
                &cancel,
                Duration::from_millis(10),
                &mut || {},
            )
            .unwrap();

        assert!(output.is_none());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_last_line_skips_blank_lines() {
        let output = CommandOutput {
            exit_code: Some(0),
            stdout: b"test 1\nsummary\nFAILED\n\n".to_vec(),
            stderr: Vec::new(),
            duration: Duration::ZERO,
        };
        assert_eq!(output.last_line().as_deref(), Some("FAILED"));
    }

    #[test]
    fn test_validate_argument() {
        assert!(validate_argument("--quirk-s3-bios").is_ok());
        assert!(validate_argument("now").is_ok());
        assert!(matches!(
            validate_argument("; rm -rf /"),
            Err(RunnerError::InvalidArgument(_))
        ));
        assert!(validate_argument("$(id)").is_err());
        assert!(validate_argument("a|b").is_err());
    }

    #[test]
    fn test_delayed_keeps_arguments_out_of_script() {
        let spec = delayed(5, "reboot", &["--force".to_string()]);
        assert_eq!(spec.program, "sh");
        assert_eq!(spec.args[1], r#"sleep "$1"; shift; exec "$@""#);
        assert_eq!(&spec.args[3..], &["5", "reboot", "--force"]);
    }

    #[test]
    fn test_delayed_runs_program() {
        let runner = SystemRunner::new();
        let output = runner
            .run(&delayed(0, "echo", &["done".to_string()]))
            .unwrap();
        assert_eq!(output.stdout_str().trim(), "done");
    }

    #[test]
    fn test_from_command_line() {
        let spec = CommandSpec::from_command_line("fwts wakealarm --stdout-summary").unwrap();
        assert_eq!(spec.program, "fwts");
        assert_eq!(spec.args, vec!["wakealarm", "--stdout-summary"]);
        assert!(CommandSpec::from_command_line("   ").is_none());
    }
}
