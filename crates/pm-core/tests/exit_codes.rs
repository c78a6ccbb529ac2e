//! Exit status mapping for every campaign error category.

use pm_common::{Error, Operation};
use pm_core::exit_codes::ExitCode;
use std::time::Duration;

fn code(err: Error) -> i32 {
    ExitCode::for_error(&err).as_i32()
}

#[test]
fn aborted_before_any_cycle() {
    assert_eq!(code(Error::Privilege), 1);
    assert_eq!(code(Error::HardwarePrecondition("no rtc".into())), 1);
    assert_eq!(code(Error::Config("bad toml".into())), 1);
}

#[test]
fn cancelled_by_user() {
    let err = Error::UserCancelled(Operation::Poweroff);
    assert!(err.requires_teardown());
    assert_eq!(code(err), 1);
}

#[test]
fn failed_cycles() {
    let too_short = Error::DurationTooShort {
        operation: Operation::Suspend,
        elapsed: Duration::from_secs(3),
        min: Duration::from_secs(58),
    };
    assert!(too_short.requires_teardown());
    assert_eq!(code(too_short), 2);

    let mismatch = Error::AlarmMismatch {
        stored: 1,
        expected_utc: 2,
        expected_local: 3,
    };
    assert!(!mismatch.requires_teardown());
    assert_eq!(code(mismatch), 2);
    assert_eq!(code(Error::AlarmWrite("EINVAL".into())), 2);
}

#[test]
fn completed_is_success() {
    assert!(ExitCode::Completed.is_success());
    assert_eq!(i32::from(ExitCode::Completed), 0);
    assert_eq!(ExitCode::Failed.to_string(), "ERR_FAILED (2)");
}
