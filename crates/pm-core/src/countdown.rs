//! Cancellable countdowns.
//!
//! User-visible waits before each power operation are cooperative: the
//! waiting thread polls a [`CancelToken`] on a fixed tick, so SIGINT/SIGTERM
//! (or a test harness) can stop the campaign at any tick boundary. Once a
//! power command has been issued nothing here is consulted any more.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Set from the signal handler; shared by every signal-aware token.
static SIGNAL_RECEIVED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination_signal(_signal: libc::c_int) {
    SIGNAL_RECEIVED.store(true, Ordering::SeqCst);
}

/// Cancellation flag shared between the campaign and whoever may stop it.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    watch_signals: bool,
}

impl CancelToken {
    /// A token that is only tripped through [`CancelToken::cancel`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is also tripped by SIGINT or SIGTERM.
    ///
    /// Installs the process-wide handlers; calling it more than once is
    /// harmless.
    pub fn with_signal_handlers() -> Self {
        let handler = handle_termination_signal as extern "C" fn(libc::c_int);
        // SAFETY: the handler only stores into an atomic, which is
        // async-signal-safe.
        unsafe {
            libc::signal(libc::SIGINT, handler as libc::sighandler_t);
            libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
        }
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            watch_signals: true,
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || (self.watch_signals && SIGNAL_RECEIVED.load(Ordering::SeqCst))
    }
}

/// A countdown was interrupted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("countdown cancelled")]
pub struct Cancelled;

/// Block for `duration` unless `cancel` trips first.
///
/// `on_tick` receives the time still left (rounded up to whole seconds)
/// once per tick, before sleeping.
pub fn timed_wait(
    duration: Duration,
    tick: Duration,
    cancel: &CancelToken,
    mut on_tick: impl FnMut(u64),
) -> Result<(), Cancelled> {
    let tick = tick.max(Duration::from_millis(1));
    // Measured from the start so an arbitrarily large delay cannot overflow.
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        let remaining = duration.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Ok(());
        }
        on_tick(ceil_secs(remaining));
        thread::sleep(tick.min(remaining));
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_secs().saturating_add(u64::from(duration.subsec_nanos() > 0))
}

/// What a countdown is counting down to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownKind {
    /// Hardware information is gathered when the countdown ends.
    HardwareInfo,
    /// The power operation is issued when the countdown ends.
    PowerOperation,
}

/// One step of the pre-operation schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownStep {
    Wait { kind: CountdownKind, seconds: u64 },
    GatherHardwareInfo,
}

/// Steps to run before cycle `iteration` of `total`.
///
/// The first cycle gathers hardware information straight away, middle
/// cycles wait before gathering it, and the final (summary) cycle only
/// waits and gathers before the campaign is finalized.
pub fn schedule(iteration: u32, total: u32, pm_delay: u64, hardware_delay: u64) -> Vec<CountdownStep> {
    let hardware_wait = CountdownStep::Wait {
        kind: CountdownKind::HardwareInfo,
        seconds: hardware_delay,
    };
    let pm_wait = CountdownStep::Wait {
        kind: CountdownKind::PowerOperation,
        seconds: pm_delay,
    };

    if iteration == 0 {
        vec![CountdownStep::GatherHardwareInfo, pm_wait]
    } else if iteration < total {
        vec![hardware_wait, CountdownStep::GatherHardwareInfo, pm_wait]
    } else {
        vec![hardware_wait, CountdownStep::GatherHardwareInfo]
    }
}
