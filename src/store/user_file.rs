//! The per-user backend: a single state file in the user's own home
//! directory (`$HOME/.otpasswd`), holding exactly one entry.

use std::path::{Path, PathBuf};

use crate::state::State;
use crate::store::{atomic_write, find_entry, format, lock, merge_entry, StateStore};
use crate::{OtpError, Result};

pub const STATE_FILENAME: &str = ".otpasswd";

pub struct UserFileStore {
    home_dir: PathBuf,
}

impl UserFileStore {
    pub fn new(home_dir: impl Into<PathBuf>) -> Self {
        UserFileStore {
            home_dir: home_dir.into(),
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.home_dir.join(STATE_FILENAME)
    }

    /// Creates the backing file (mode 0600) if it does not exist yet, so
    /// first-time key generation has somewhere to write to.
    pub fn ensure_exists(&self) -> Result<()> {
        let path = self.db_path();
        if path.exists() {
            return Ok(());
        }
        atomic_write(&path, "")?;
        set_owner_only_permissions(&path);
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::fs::Permissions;
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}

impl StateStore for UserFileStore {
    fn check_permissions(&self) -> Result<()> {
        if !self.home_dir.is_dir() {
            return Err(OtpError::NoUserHome);
        }
        let path = self.db_path();
        let meta = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OtpError::NonExistent)
            }
            Err(e) => return Err(OtpError::Io(e)),
        };
        if !meta.is_file() {
            return Err(OtpError::ParseError(
                "state file is not a regular file".into(),
            ));
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode();
            if mode & 0o077 != 0 {
                log::warn!(
                    "state file {} is readable or writable by group/others (mode {:o})",
                    path.display(),
                    mode & 0o777
                );
            }
        }
        Ok(())
    }

    fn lock(&self) -> Result<lock::StateLock> {
        lock::StateLock::acquire(&self.db_path())
    }

    fn load(&self, username: &str) -> Result<State> {
        find_entry(&self.db_path(), username)?.ok_or(OtpError::NoUserEntry)
    }

    fn store(&self, state: &State) -> Result<()> {
        let line = format::format_entry(state)?;
        merge_entry(&self.db_path(), &state.username, Some(&line))
    }

    fn remove(&self, username: &str) -> Result<()> {
        merge_entry(&self.db_path(), username, None)
    }
}
