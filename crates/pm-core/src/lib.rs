//! Power management stress campaigns.
//!
//! This library drives repeated suspend, hibernate, poweroff and reboot
//! cycles and checks that every one of them comes back within bounds:
//! - Campaign state reconstruction from the command line
//! - Wake alarm programming over the RTC sysfs interface
//! - Duration gates for each cycle
//! - A continuation entry that resumes the campaign after a restart
//! - The orchestrator state machine tying it all together
//!
//! The binary entry point is in `main.rs`.

pub mod alarm;
pub mod campaign;
pub mod cli;
pub mod clock;
pub mod config;
pub mod continuation;
pub mod countdown;
pub mod environment;
pub mod exit_codes;
pub mod gate;
pub mod hwinfo;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod privilege;
pub mod runner;
