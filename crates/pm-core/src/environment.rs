//! One-time environment changes for reboot and poweroff campaigns.
//!
//! A campaign that restarts the machine needs the test user to be logged
//! in automatically (so the autostart entry runs) and to run pm-core
//! through sudo without a password. Both edits are applied once, on the
//! first cycle, and reverted when the campaign ends. Every edited file is
//! tagged with a marker so enabling twice, or disabling something that was
//! never enabled, leaves the system untouched.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Marker written into every file this module edits.
pub const MARK: &str = "# Automatically added by pm-core";

/// Errors from environment changes.
#[derive(Debug, Error)]
pub enum EnvChangeError {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<EnvChangeError> for pm_common::Error {
    fn from(err: EnvChangeError) -> Self {
        match err {
            EnvChangeError::Io { source, .. } => pm_common::Error::Io(source),
        }
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> EnvChangeError + '_ {
    move |source| EnvChangeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A reversible system configuration edit.
pub trait EnvironmentChange {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Apply the change. No-op if already applied.
    fn enable(&self) -> Result<(), EnvChangeError>;

    /// Revert the change. No-op if not applied.
    fn disable(&self) -> Result<(), EnvChangeError>;
}

/// Replace `path` with `contents` through a temporary sibling, keeping the
/// original permissions.
fn replace_file(path: &Path, contents: &str) -> Result<(), EnvChangeError> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".pm-core.tmp");
    let tmp_path = PathBuf::from(tmp_name);

    fs::write(&tmp_path, contents).map_err(io_err(&tmp_path))?;
    if let Ok(metadata) = fs::metadata(path) {
        fs::set_permissions(&tmp_path, metadata.permissions()).map_err(io_err(&tmp_path))?;
    }
    fs::rename(&tmp_path, path).map_err(io_err(path))
}

fn read_optional(path: &Path) -> Result<Option<String>, EnvChangeError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path)(e)),
    }
}

/// Backup names for `path`: `path.bak`, `path.bak.1`, `path.bak.2`, ...
pub fn backup_chain(path: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    (0u32..).map(move |index| {
        let mut name = path.as_os_str().to_owned();
        if index == 0 {
            name.push(".bak");
        } else {
            name.push(format!(".bak.{}", index));
        }
        PathBuf::from(name)
    })
}

/// First unused name in the backup chain.
pub fn next_backup(path: &Path) -> PathBuf {
    backup_chain(path)
        .find(|candidate| !candidate.exists())
        .unwrap_or_else(|| path.with_extension("bak"))
}

/// Newest existing backup in the chain.
pub fn latest_backup(path: &Path) -> Option<PathBuf> {
    backup_chain(path).take_while(|candidate| candidate.exists()).last()
}

/// Display manager autologin for the test user.
#[derive(Debug, Clone)]
pub struct AutoLoginConfigurator {
    config_path: PathBuf,
    user: String,
}

impl AutoLoginConfigurator {
    pub fn new(config_path: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            config_path: config_path.into(),
            user: user.into(),
        }
    }

    /// Display manager configuration enabling autologin for `user`.
    pub fn render(&self) -> String {
        format!(
            "{MARK}\n\
             [SeatDefaults]\n\
             greeter-session=unity-greeter\n\
             user-session=ubuntu\n\
             autologin-user={user}\n\
             autologin-user-timeout=0\n",
            user = self.user,
        )
    }

    fn is_ours(&self) -> Result<bool, EnvChangeError> {
        Ok(read_optional(&self.config_path)?
            .map(|contents| contents.lines().any(|line| line == MARK))
            .unwrap_or(false))
    }
}

impl EnvironmentChange for AutoLoginConfigurator {
    fn name(&self) -> &'static str {
        "autologin"
    }

    fn enable(&self) -> Result<(), EnvChangeError> {
        if self.is_ours()? {
            debug!("autologin already enabled");
            return Ok(());
        }
        debug!(user = %self.user, "Enabling autologin for this user...");

        if self.config_path.exists() {
            let backup = next_backup(&self.config_path);
            fs::copy(&self.config_path, &backup).map_err(io_err(&backup))?;
            debug!(backup = %backup.display(), "backed up display manager config");
        } else if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        replace_file(&self.config_path, &self.render())
    }

    fn disable(&self) -> Result<(), EnvChangeError> {
        if !self.is_ours()? {
            return Ok(());
        }
        debug!("Restoring autologin configuration...");

        match latest_backup(&self.config_path) {
            Some(backup) => {
                fs::copy(&backup, &self.config_path).map_err(io_err(&self.config_path))?;
                fs::remove_file(&backup).map_err(io_err(&backup))
            }
            None => fs::remove_file(&self.config_path).map_err(io_err(&self.config_path)),
        }
    }
}

/// Passwordless sudo for re-running pm-core after a restart.
#[derive(Debug, Clone)]
pub struct SudoersConfigurator {
    sudoers_path: PathBuf,
    user: String,
    executable: PathBuf,
}

impl SudoersConfigurator {
    pub fn new(
        sudoers_path: impl Into<PathBuf>,
        user: impl Into<String>,
        executable: impl Into<PathBuf>,
    ) -> Self {
        Self {
            sudoers_path: sudoers_path.into(),
            user: user.into(),
            executable: executable.into(),
        }
    }

    /// The rule line following the marker.
    pub fn rule(&self) -> String {
        format!("{} ALL=NOPASSWD: {}", self.user, self.executable.display())
    }
}

impl EnvironmentChange for SudoersConfigurator {
    fn name(&self) -> &'static str {
        "sudoers"
    }

    fn enable(&self) -> Result<(), EnvChangeError> {
        let current = read_optional(&self.sudoers_path)?.unwrap_or_default();
        if current.lines().any(|line| line == MARK) {
            debug!("passwordless execution already granted");
            return Ok(());
        }
        debug!("Enabling user to execute test as root...");

        let mut updated = current;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(MARK);
        updated.push('\n');
        updated.push_str(&self.rule());
        updated.push('\n');
        replace_file(&self.sudoers_path, &updated)
    }

    fn disable(&self) -> Result<(), EnvChangeError> {
        let Some(current) = read_optional(&self.sudoers_path)? else {
            return Ok(());
        };
        if !current.lines().any(|line| line == MARK) {
            return Ok(());
        }
        debug!("Restoring sudoers configuration...");

        let mut kept = Vec::new();
        let mut lines = current.lines();
        while let Some(line) = lines.next() {
            if line == MARK {
                lines.next();
                continue;
            }
            kept.push(line);
        }
        let mut updated = kept.join("\n");
        if !updated.is_empty() {
            updated.push('\n');
        }
        replace_file(&self.sudoers_path, &updated)
    }
}
