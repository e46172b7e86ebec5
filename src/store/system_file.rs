//! The system-wide backend: a single shadow-style file holding every
//! user's entry, owned by a dedicated service account. Permission
//! checks here are strict (unlike the per-user backend, a misconfigured
//! system file is a multi-user security problem, not just one user's
//! inconvenience).

use std::path::PathBuf;

use crate::state::State;
use crate::store::{find_entry, format, lock, merge_entry, StateStore};
use crate::{OtpError, Result};

pub struct SystemFileStore {
    db_path: PathBuf,
    /// uid the database directory and file must be owned by.
    service_uid: u32,
}

impl SystemFileStore {
    pub fn new(db_path: impl Into<PathBuf>, service_uid: u32) -> Self {
        SystemFileStore {
            db_path: db_path.into(),
            service_uid,
        }
    }

    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }
}

#[cfg(unix)]
fn check_unix_ownership_and_mode(
    path: &std::path::Path,
    expected_uid: u32,
    max_mode_bits: u32,
) -> Result<()> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path).map_err(OtpError::Io)?;
    if meta.uid() != expected_uid {
        return Err(OtpError::ParseError(format!(
            "{} is not owned by the service account",
            path.display()
        )));
    }
    if meta.mode() & max_mode_bits != 0 {
        return Err(OtpError::ParseError(format!(
            "{} is writable by group or others",
            path.display()
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_unix_ownership_and_mode(
    _path: &std::path::Path,
    _expected_uid: u32,
    _max_mode_bits: u32,
) -> Result<()> {
    Ok(())
}

/// Restores ownership of the just-rewritten state file to the service
/// account. `merge_entry`'s write-to-temp-then-rename leaves the file
/// owned by whoever the current process runs as, which is the service
/// account itself except when an agent running as root wrote it; this
/// is a no-op in that common case and only does real work when a
/// privileged agent is the one calling `store`.
#[cfg(unix)]
fn chown_to_service_account(path: &std::path::Path, service_uid: u32) -> Result<()> {
    std::os::unix::fs::chown(path, Some(service_uid), None).map_err(OtpError::Io)
}

#[cfg(not(unix))]
fn chown_to_service_account(_path: &std::path::Path, _service_uid: u32) -> Result<()> {
    Ok(())
}

impl StateStore for SystemFileStore {
    fn check_permissions(&self) -> Result<()> {
        let dir = self
            .db_path
            .parent()
            .ok_or_else(|| OtpError::ParseError("db path has no parent directory".into()))?;
        if !dir.is_dir() {
            return Err(OtpError::NonExistent);
        }
        // directory: not group/other writable (0o022), owned by service uid.
        check_unix_ownership_and_mode(dir, self.service_uid, 0o022)?;

        if !self.db_path.exists() {
            return Err(OtpError::NonExistent);
        }
        let meta = std::fs::metadata(&self.db_path).map_err(OtpError::Io)?;
        if !meta.is_file() {
            return Err(OtpError::ParseError(
                "system state file is not a regular file".into(),
            ));
        }
        // file: not group/other writable, owned by service uid.
        check_unix_ownership_and_mode(&self.db_path, self.service_uid, 0o022)?;
        Ok(())
    }

    fn lock(&self) -> Result<lock::StateLock> {
        lock::StateLock::acquire(&self.db_path)
    }

    fn load(&self, username: &str) -> Result<State> {
        find_entry(&self.db_path, username)?.ok_or(OtpError::NoUserEntry)
    }

    fn store(&self, state: &State) -> Result<()> {
        let line = format::format_entry(state)?;
        merge_entry(&self.db_path, &state.username, Some(&line))?;
        chown_to_service_account(&self.db_path, self.service_uid)
    }

    fn remove(&self, username: &str) -> Result<()> {
        merge_entry(&self.db_path, username, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SequenceKey;
    use tempfile::tempdir;

    #[test]
    fn missing_database_directory_is_non_existent() {
        let store = SystemFileStore::new("/no/such/dir/otshadow", 0);
        assert!(matches!(
            store.check_permissions(),
            Err(OtpError::NonExistent)
        ));
    }

    #[test]
    fn store_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = SystemFileStore::new(dir.path().join("otshadow"), 0);
        let state = State::new("alice", SequenceKey::from_bytes([9u8; 32]));
        store.store(&state).unwrap();
        let loaded = store.load("alice").unwrap();
        assert_eq!(loaded.username, "alice");
    }

    #[test]
    fn multiple_users_coexist_in_one_file() {
        let dir = tempdir().unwrap();
        let store = SystemFileStore::new(dir.path().join("otshadow"), 0);
        store
            .store(&State::new("alice", SequenceKey::from_bytes([1u8; 32])))
            .unwrap();
        store
            .store(&State::new("bob", SequenceKey::from_bytes([2u8; 32])))
            .unwrap();
        assert_eq!(store.load("alice").unwrap().username, "alice");
        assert_eq!(store.load("bob").unwrap().username, "bob");
    }
}
