//! Restart continuation through an XDG autostart entry.
//!
//! Before a reboot or poweroff the campaign writes a `.desktop` file whose
//! `Exec=` line re-runs pm-core with the state of the next cycle. The
//! session started after the restart runs it, and the entry is removed
//! when the campaign ends.
//!
//! The orchestrator only sees [`ContinuationStore`]; the autostart entry
//! is one implementation of it.

use crate::campaign::{CampaignError, CampaignState};
use crate::cli::Cli;
use crate::privilege::{invoking_user, user_home};
use clap::Parser;
use pm_common::Error;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// File name of the autostart entry.
pub const DESKTOP_FILE_NAME: &str = "pm-core.desktop";

/// Errors from the continuation store.
#[derive(Debug, Error)]
pub enum ContinuationError {
    #[error("continuation entry {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no autostart directory: set XDG_CONFIG_HOME or run through sudo")]
    NoAutostartDir,

    #[error("continuation entry {path} is malformed: {message}")]
    Malformed { path: PathBuf, message: String },

    #[error("cannot quote {arg:?} for the continuation entry: {message}")]
    Unquotable { arg: String, message: String },

    #[error(transparent)]
    Campaign(#[from] CampaignError),
}

impl From<ContinuationError> for Error {
    fn from(err: ContinuationError) -> Self {
        match err {
            ContinuationError::Io { source, .. } => Error::Io(source),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Durable "run me again after the restart" capability.
pub trait ContinuationStore {
    /// Make `state` the campaign the next session resumes.
    fn persist(&self, state: &CampaignState) -> Result<(), ContinuationError>;

    /// Stop resuming the campaign. A missing entry is not an error.
    fn clear(&self) -> Result<(), ContinuationError>;

    /// The campaign the next session would resume, if any.
    fn load(&self) -> Result<Option<CampaignState>, ContinuationError>;
}

/// Autostart directory for the continuation entry.
///
/// An explicit setting wins, then `$XDG_CONFIG_HOME/autostart`, then the
/// `.config/autostart` of the user who invoked sudo, then the current
/// user's config directory.
pub fn autostart_dir(configured: Option<&Path>) -> Result<PathBuf, ContinuationError> {
    if let Some(dir) = configured {
        return Ok(dir.to_path_buf());
    }
    if let Some(config_home) = std::env::var_os("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(config_home).join("autostart"));
    }
    if let Some(home) = invoking_user().as_deref().and_then(user_home) {
        return Ok(home.join(".config").join("autostart"));
    }
    dirs::config_dir()
        .map(|dir| dir.join("autostart"))
        .ok_or(ContinuationError::NoAutostartDir)
}

/// XDG autostart `.desktop` entry.
#[derive(Debug, Clone)]
pub struct DesktopAutostart {
    path: PathBuf,
    executable: PathBuf,
}

impl DesktopAutostart {
    /// Entry in `dir` that re-runs `executable` through sudo.
    pub fn new(dir: &Path, executable: impl Into<PathBuf>) -> Self {
        Self {
            path: dir.join(DESKTOP_FILE_NAME),
            executable: executable.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> ContinuationError {
        ContinuationError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Contents of the entry for `state`.
    pub fn render(&self, state: &CampaignState) -> Result<String, ContinuationError> {
        let argv: Vec<String> = ["sudo".to_string(), self.executable.to_string_lossy().into_owned()]
            .into_iter()
            .chain(state.to_args())
            .collect();

        Ok(format!(
            "[Desktop Entry]\n\
             Name={op} test\n\
             Comment=Verify {op} works properly\n\
             Exec={exec}\n\
             Type=Application\n\
             X-GNOME-Autostart-enabled=true\n\
             Hidden=false\n",
            op = state.operation,
            exec = encode_exec(&argv)?,
        ))
    }

    fn malformed(&self, message: impl Into<String>) -> ContinuationError {
        ContinuationError::Malformed {
            path: self.path.clone(),
            message: message.into(),
        }
    }
}

impl ContinuationStore for DesktopAutostart {
    fn persist(&self, state: &CampaignState) -> Result<(), ContinuationError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
        }
        let contents = self.render(state)?;
        debug!(path = %self.path.display(), "Writing desktop file...\n{}", contents);

        let tmp_path = self.path.with_extension("desktop.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|e| self.io_err(e))?;
            file.write_all(contents.as_bytes())
                .map_err(|e| self.io_err(e))?;
            // The power command follows right after; the entry must be on disk.
            file.sync_all().map_err(|e| self.io_err(e))?;
        }
        fs::rename(&tmp_path, &self.path).map_err(|e| self.io_err(e))
    }

    fn clear(&self) -> Result<(), ContinuationError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Removed desktop file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }

    fn load(&self) -> Result<Option<CampaignState>, ContinuationError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let entry = freedesktop_entry_parser::parse_entry(&self.path)
            .map_err(|e| self.malformed(e.to_string()))?;
        let exec = entry
            .section("Desktop Entry")
            .attr("Exec")
            .ok_or_else(|| self.malformed("no Exec= key"))?
            .to_string();
        let argv = decode_exec(&exec).map_err(|message| self.malformed(message))?;

        let args = match argv.as_slice() {
            [sudo, _exe, rest @ ..] if sudo == "sudo" => rest,
            _ => return Err(self.malformed("Exec= does not run through sudo")),
        };
        let cli = Cli::try_parse_from(std::iter::once("pm-core").chain(args.iter().map(String::as_str)))
            .map_err(|e| self.malformed(e.to_string()))?;
        let state = CampaignState::from_cli(&cli, chrono::Utc::now().timestamp())?;
        Ok(Some(state))
    }
}

/// Turn an argument vector into an `Exec=` value.
///
/// Each argument is shell-quoted, then the joined line gets the
/// string-level escapes of a desktop entry value and every `%` is doubled
/// so no field code is expanded.
pub fn encode_exec(argv: &[String]) -> Result<String, ContinuationError> {
    let mut tokens = Vec::with_capacity(argv.len());
    for arg in argv {
        let token = shlex::try_quote(arg).map_err(|e| ContinuationError::Unquotable {
            arg: arg.clone(),
            message: e.to_string(),
        })?;
        tokens.push(token.into_owned());
    }

    let mut value = String::new();
    for c in tokens.join(" ").chars() {
        match c {
            '\\' => value.push_str("\\\\"),
            '\n' => value.push_str("\\n"),
            '\t' => value.push_str("\\t"),
            '\r' => value.push_str("\\r"),
            '%' => value.push_str("%%"),
            other => value.push(other),
        }
    }
    Ok(value)
}

/// Split an `Exec=` value back into arguments, undoing [`encode_exec`].
pub fn decode_exec(value: &str) -> Result<Vec<String>, String> {
    let mut line = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('\\') => line.push('\\'),
                Some('s') => line.push(' '),
                Some('n') => line.push('\n'),
                Some('t') => line.push('\t'),
                Some('r') => line.push('\r'),
                Some(other) => return Err(format!("invalid escape \\{}", other)),
                None => return Err("dangling escape".to_string()),
            },
            '%' => match chars.next() {
                Some('%') => line.push('%'),
                Some(code) => return Err(format!("unsupported field code %{}", code)),
                None => return Err("dangling %".to_string()),
            },
            other => line.push(other),
        }
    }
    shlex::split(&line).ok_or_else(|| "unbalanced quoting".to_string())
}
