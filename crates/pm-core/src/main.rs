//! pm-core CLI entry point.

use clap::Parser;
use pm_common::{Error, Operation};
use pm_core::alarm::{preflight, SysfsAlarmDevice, WakeAlarm};
use pm_core::campaign::CampaignState;
use pm_core::cli::Cli;
use pm_core::clock::{Clock, SystemClock};
use pm_core::config::{load_settings, Settings};
use pm_core::continuation::{autostart_dir, DesktopAutostart};
use pm_core::countdown::CancelToken;
use pm_core::environment::{AutoLoginConfigurator, EnvironmentChange, SudoersConfigurator};
use pm_core::exit_codes::ExitCode;
use pm_core::hwinfo::SystemInventory;
use pm_core::logging::{
    campaign_log_path, generate_run_id, get_host_id, init_logging, LogConfig, LogContext,
    LogFileConfig,
};
use pm_core::notify::TerminalNotifier;
use pm_core::orchestrator::{Collaborators, Orchestrator, Outcome, Timing};
use pm_core::privilege::{invoking_user, require_root};
use pm_core::runner::{CommandSpec, SystemRunner};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let code = match run(&cli) {
        Ok(Outcome::Completed(_)) | Ok(Outcome::RestartPending { .. }) => ExitCode::Completed,
        Err(err) => {
            let code = ExitCode::for_error(&err);
            if !err.requires_teardown() {
                error!(category = %err.category(), "{}", err);
            }
            eprintln!("pm-core: {}", err);
            if !err.is_cancellation() {
                eprintln!("hint: {}", err.remediation());
            }
            code
        }
    };
    if !code.is_success() {
        debug!(exit = %code, "Exiting");
    }
    code.into()
}

fn run(cli: &Cli) -> Result<Outcome, Error> {
    require_root()?;

    let resolved = load_settings(cli.config.as_deref())?;
    let settings = resolved.settings;
    let clock = SystemClock;
    let state = CampaignState::from_cli(cli, clock.epoch_secs())?;

    let log_config = LogConfig::from_env(cli.log_level, None).with_file(LogFileConfig::new(
        campaign_log_path(&settings.log_dir, state.operation, state.total_repetitions),
        state.append,
    ));
    if let Err(e) = init_logging(&log_config) {
        eprintln!("pm-core: logging disabled: {}", e);
    }

    let ctx = LogContext::new(generate_run_id(), get_host_id(), state.operation);
    debug!(args = ?std::env::args().collect::<Vec<_>>(), "Arguments");
    if let Some(source) = &resolved.source {
        debug!(config = %source.display(), "settings loaded");
    }
    if matches!(state.operation, Operation::Suspend | Operation::Hibernate) {
        warn!("'{}' test case will be replaced with a new one based on fwts", state.operation);
    }

    let cancel = CancelToken::with_signal_handlers();
    let runner = SystemRunner::new();

    if state.operation.needs_wake_alarm() {
        let self_test = CommandSpec::from_command_line(&settings.self_test_command)
            .ok_or_else(|| Error::Config("self_test_command is empty".to_string()))?;
        preflight(
            &settings.alarm_path,
            &settings.rtc_path,
            &self_test,
            &runner,
            &cancel,
            settings.tick(),
        )?;
        info!("Wakeup alarm check passed");
    }

    let executable = std::env::current_exe()?;
    let alarm = WakeAlarm::new(
        SysfsAlarmDevice::new(&settings.alarm_path, &settings.rtc_path),
        SystemClock,
    );
    let continuation = DesktopAutostart::new(
        &autostart_dir(settings.autostart_dir.as_deref())?,
        executable.clone(),
    );
    let inventory = SystemInventory::new(&runner, &settings.kernel_log_command);
    let notifier = TerminalNotifier::stderr();

    let changes = environment_changes(&settings, state.operation, executable)?;
    let environment: Vec<&dyn EnvironmentChange> =
        changes.iter().map(|change| change.as_ref()).collect();

    let deps = Collaborators {
        runner: &runner,
        alarm: &alarm,
        continuation: &continuation,
        environment,
        inventory: &inventory,
        notifier: &notifier,
        clock: &clock,
    };
    let timing = Timing {
        tick: settings.tick(),
        grace_delay_secs: settings.grace_delay_secs,
    };

    Orchestrator::new(state, deps, cancel, ctx, timing).execute()
}

/// Autologin first, then passwordless sudo; reverted in reverse order.
fn environment_changes(
    settings: &Settings,
    operation: Operation,
    executable: PathBuf,
) -> Result<Vec<Box<dyn EnvironmentChange>>, Error> {
    if !operation.restarts_process() {
        return Ok(Vec::new());
    }
    let user = invoking_user().ok_or_else(|| {
        Error::Config(format!(
            "{} campaigns must be started with sudo from the test user's session",
            operation
        ))
    })?;
    Ok(vec![
        Box::new(AutoLoginConfigurator::new(
            &settings.display_manager_config,
            user.clone(),
        )),
        Box::new(SudoersConfigurator::new(&settings.sudoers_path, user, executable)),
    ])
}
