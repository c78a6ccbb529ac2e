//! Privilege and invoking-user detection.

use std::ffi::{CStr, CString};
use std::path::PathBuf;
use tracing::debug;

/// Whether the process runs with an effective uid of 0.
pub fn is_root() -> bool {
    let effective_uid = unsafe { libc::geteuid() };
    debug!(effective_uid, "checking privileges");
    effective_uid == 0
}

/// Fail unless running as root.
pub fn require_root() -> pm_common::Result<()> {
    if is_root() {
        Ok(())
    } else {
        Err(pm_common::Error::Privilege)
    }
}

/// The user that ran `sudo`, if any.
pub fn invoking_user() -> Option<String> {
    std::env::var("SUDO_USER")
        .ok()
        .filter(|user| !user.trim().is_empty())
}

/// Home directory of `user` from the password database.
pub fn user_home(user: &str) -> Option<PathBuf> {
    let name = CString::new(user).ok()?;
    // SAFETY: getpwnam returns NULL or a pointer to static storage that
    // stays valid until the next passwd lookup; the path is copied out
    // immediately.
    unsafe {
        let entry = libc::getpwnam(name.as_ptr());
        if entry.is_null() || (*entry).pw_dir.is_null() {
            return None;
        }
        let dir = CStr::from_ptr((*entry).pw_dir).to_string_lossy().into_owned();
        Some(PathBuf::from(dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_check_matches_uid() {
        let uid = unsafe { libc::geteuid() };
        assert_eq!(is_root(), uid == 0);
        assert_eq!(require_root().is_ok(), uid == 0);
    }

    #[test]
    fn root_has_a_home() {
        assert!(user_home("root").is_some());
    }

    #[test]
    fn unknown_user_has_no_home() {
        assert!(user_home("pm-core-no-such-user").is_none());
        assert!(user_home("bad\0name").is_none());
    }
}
