//! Settings loading for pm-core.
//!
//! Settings describe the machine, not the campaign: where the RTC
//! interfaces live, which tools to run, where logs and autostart entries
//! go. Campaign parameters only ever travel on the command line.
//!
//! Resolution order (highest to lowest priority):
//! 1. `--config <file>` (or `PM_CORE_CONFIG`, read by the CLI parser)
//! 2. `/etc/pm-core/config.toml`
//! 3. Built-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// System-wide settings file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/pm-core/config.toml";

/// Errors that can occur during settings loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config file not found: {path}")]
    NotFound { path: PathBuf },

    #[error("Invalid TOML in config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("I/O error reading {path}: {source}")]
    IoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid setting {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

impl From<ConfigError> for pm_common::Error {
    fn from(err: ConfigError) -> Self {
        pm_common::Error::Config(err.to_string())
    }
}

/// Machine-level settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// RTC wake alarm register.
    pub alarm_path: PathBuf,
    /// RTC status table.
    pub rtc_path: PathBuf,
    /// Directory for the campaign log files.
    pub log_dir: PathBuf,
    /// Autostart directory for the continuation entry; derived from the
    /// invoking user when unset.
    pub autostart_dir: Option<PathBuf>,
    /// Display manager configuration edited for autologin.
    pub display_manager_config: PathBuf,
    /// Sudoers file edited for passwordless restarts.
    pub sudoers_path: PathBuf,
    /// Wake alarm self-test; its last output line is the verdict.
    pub self_test_command: String,
    /// Kernel log check run with every hardware inventory.
    pub kernel_log_command: String,
    /// Countdown polling interval in milliseconds.
    pub tick_ms: u64,
    /// Seconds between the reboot/poweroff request and the transition.
    pub grace_delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            alarm_path: PathBuf::from("/sys/class/rtc/rtc0/wakealarm"),
            rtc_path: PathBuf::from("/proc/driver/rtc"),
            log_dir: PathBuf::from("/var/log"),
            autostart_dir: None,
            display_manager_config: PathBuf::from("/etc/lightdm/lightdm.conf"),
            sudoers_path: PathBuf::from("/etc/sudoers"),
            self_test_command: "fwts wakealarm --stdout-summary".to_string(),
            kernel_log_command: "fwts -r stdout klog dmesg_common oops".to_string(),
            tick_ms: 1000,
            grace_delay_secs: 5,
        }
    }
}

impl Settings {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "tick_ms",
                message: "must be greater than zero".to_string(),
            });
        }
        if self.self_test_command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "self_test_command",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Settings plus where they came from.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub settings: Settings,
    /// File the settings were read from (None if using defaults).
    pub source: Option<PathBuf>,
}

/// Load settings with the standard resolution order.
pub fn load_settings(explicit: Option<&Path>) -> Result<ResolvedSettings, ConfigError> {
    load_settings_from(explicit, Path::new(SYSTEM_CONFIG_PATH))
}

/// Like [`load_settings`] with a custom system-wide path.
pub fn load_settings_from(
    explicit: Option<&Path>,
    system_path: &Path,
) -> Result<ResolvedSettings, ConfigError> {
    // Explicit file must exist
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return resolved_from_file(path);
    }

    if system_path.exists() {
        return resolved_from_file(system_path);
    }

    Ok(ResolvedSettings {
        settings: Settings::default(),
        source: None,
    })
}

fn resolved_from_file(path: &Path) -> Result<ResolvedSettings, ConfigError> {
    let settings = load_settings_file(path)?;
    settings.validate()?;
    Ok(ResolvedSettings {
        settings,
        source: Some(path.to_path_buf()),
    })
}

/// Parse one settings file.
pub fn load_settings_file(path: &Path) -> Result<Settings, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn defaults_when_nothing_exists() {
        let temp = TempDir::new().unwrap();
        let resolved = load_settings_from(None, &temp.path().join("missing.toml")).unwrap();
        assert!(resolved.source.is_none());
        assert_eq!(resolved.settings, Settings::default());
        assert_eq!(resolved.settings.tick(), Duration::from_secs(1));
        assert_eq!(resolved.settings.grace_delay_secs, 5);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        fs::write(
            &path,
            "alarm_path = \"/tmp/wakealarm\"\ntick_ms = 250\nautostart_dir = \"/tmp/autostart\"\n",
        )
        .unwrap();

        let resolved = load_settings_from(None, &path).unwrap();
        assert_eq!(resolved.source.as_deref(), Some(path.as_path()));
        let settings = resolved.settings;
        assert_eq!(settings.alarm_path, PathBuf::from("/tmp/wakealarm"));
        assert_eq!(settings.tick(), Duration::from_millis(250));
        assert_eq!(settings.autostart_dir, Some(PathBuf::from("/tmp/autostart")));
        assert_eq!(settings.rtc_path, PathBuf::from("/proc/driver/rtc"));
    }

    #[test]
    fn explicit_path_wins_over_system() {
        let temp = TempDir::new().unwrap();
        let system = temp.path().join("system.toml");
        let explicit = temp.path().join("explicit.toml");
        fs::write(&system, "grace_delay_secs = 1\n").unwrap();
        fs::write(&explicit, "grace_delay_secs = 9\n").unwrap();

        let resolved = load_settings_from(Some(&explicit), &system).unwrap();
        assert_eq!(resolved.settings.grace_delay_secs, 9);
    }

    #[test]
    fn explicit_path_must_exist() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.toml");
        let err = load_settings_from(Some(&missing), &temp.path().join("system.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn invalid_toml_and_values_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        fs::write(&path, "tick_ms = \"fast\"\n").unwrap();
        assert!(matches!(
            load_settings_from(Some(&path), &path).unwrap_err(),
            ConfigError::ParseError { .. }
        ));

        fs::write(&path, "tick_ms = 0\n").unwrap();
        let err = load_settings_from(Some(&path), &path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "tick_ms", .. }));
        assert!(matches!(pm_common::Error::from(err), pm_common::Error::Config(_)));
    }
}
