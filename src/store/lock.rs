//! Cross-process advisory locking via a `.lck` sidecar file.
//!
//! Locking is a whole-file advisory write lock, retried a bounded
//! number of times rather than blocked on indefinitely, so a wedged
//! peer cannot hang every future caller. Unlocking removes the sidecar
//! *before* releasing the OS lock, so a racing creator either observes
//! the still-locked file or a freshly created one -- never a file that
//! looks unlocked while someone still holds it.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use fs2::FileExt;

use crate::{OtpError, Result};

const LOCK_ATTEMPTS: u32 = 20;
const LOCK_RETRY_DELAY: Duration = Duration::from_micros(700);

/// A held advisory lock on a state file's `.lck` sidecar. Dropping
/// without calling [`StateLock::release`] leaves the sidecar in place;
/// callers should always release explicitly so the sidecar does not
/// accumulate.
pub struct StateLock {
    file: File,
    path: PathBuf,
}

impl StateLock {
    /// Locks the sidecar file for `db_path`, retrying up to
    /// [`LOCK_ATTEMPTS`] times spaced [`LOCK_RETRY_DELAY`] apart
    /// (~14 ms total budget) before giving up.
    pub fn acquire(db_path: &Path) -> Result<Self> {
        let lock_path = sidecar_path(db_path);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .mode_owner_only()
            .open(&lock_path)
            .map_err(OtpError::Io)?;

        for attempt in 0..LOCK_ATTEMPTS {
            match file.try_lock_exclusive() {
                Ok(()) => {
                    return Ok(StateLock {
                        file,
                        path: lock_path,
                    })
                }
                Err(_) if attempt + 1 < LOCK_ATTEMPTS => sleep(LOCK_RETRY_DELAY),
                Err(_) => return Err(OtpError::LockError),
            }
        }
        Err(OtpError::LockError)
    }

    /// Unlinks the sidecar, then releases the OS lock, then closes the
    /// descriptor -- in that order.
    pub fn release(self) -> Result<()> {
        let _ = std::fs::remove_file(&self.path);
        self.file.unlock().map_err(OtpError::Io)?;
        Ok(())
    }
}

fn sidecar_path(db_path: &Path) -> PathBuf {
    let mut s = db_path.as_os_str().to_owned();
    s.push(".lck");
    PathBuf::from(s)
}

trait OpenOptionsExt {
    fn mode_owner_only(&mut self) -> &mut Self;
}

#[cfg(unix)]
impl OpenOptionsExt for OpenOptions {
    fn mode_owner_only(&mut self) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.mode(0o600)
    }
}

#[cfg(not(unix))]
impl OpenOptionsExt for OpenOptions {
    fn mode_owner_only(&mut self) -> &mut Self {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_then_release_leaves_no_sidecar() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let lock = StateLock::acquire(&db_path).unwrap();
        assert!(sidecar_path(&db_path).exists());
        lock.release().unwrap();
        assert!(!sidecar_path(&db_path).exists());
    }

    #[test]
    fn second_acquire_while_held_times_out() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let first = StateLock::acquire(&db_path).unwrap();
        let second = StateLock::acquire(&db_path);
        assert!(matches!(second, Err(OtpError::LockError)));
        first.release().unwrap();
    }

    #[test]
    fn acquire_after_release_succeeds() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("state.db");
        let first = StateLock::acquire(&db_path).unwrap();
        first.release().unwrap();
        let second = StateLock::acquire(&db_path).unwrap();
        second.release().unwrap();
    }
}
