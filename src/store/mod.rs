//! The persistence layer: two file-backed implementations of one
//! [`StateStore`] interface, sharing a common line format ([`format`])
//! and locking discipline ([`lock`]).

pub mod format;
pub mod lock;
pub mod system_file;
pub mod user_file;

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::state::State;
use crate::{OtpError, Result};

/// A backend capable of loading, storing and removing one user's state
/// entry, plus the locking and permission checks needed to do so
/// safely across processes.
pub trait StateStore {
    /// Verifies the backing file/directory is safe to use (ownership,
    /// permissions, existence) before any load/store is attempted.
    fn check_permissions(&self) -> Result<()>;
    /// Acquires the cross-process lock for this store's backing file.
    fn lock(&self) -> Result<lock::StateLock>;
    /// Loads `username`'s entry. Errors with [`OtpError::NoUserEntry`]
    /// if no such entry exists.
    fn load(&self, username: &str) -> Result<State>;
    /// Atomically writes (creating or replacing) `state`'s entry.
    fn store(&self, state: &State) -> Result<()>;
    /// Atomically removes `username`'s entry, if any.
    fn remove(&self, username: &str) -> Result<()>;
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

/// Writes `contents` to `path` via write-to-temp, `fsync`, rename --
/// the write is atomic from any reader's point of view: they see either
/// the old or the new content, never a partial write.
pub(crate) fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    let tmp_path = tmp_path_for(path);
    {
        let mut f = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&tmp_path)
            .map_err(OtpError::Io)?;
        f.write_all(contents.as_bytes()).map_err(OtpError::Io)?;
        f.sync_all().map_err(OtpError::Io)?;
    }
    std::fs::rename(&tmp_path, path).map_err(OtpError::Io)?;
    Ok(())
}

fn username_of(line: &str) -> &str {
    line.split(':').next().unwrap_or("")
}

/// Scans `db_path` line by line for `username`'s entry. Returns `Ok(None)`
/// if the file doesn't exist yet (treated as "no entries at all", not an
/// error) or if no line matches. Errors if more than one line matches.
pub(crate) fn find_entry(db_path: &Path, username: &str) -> Result<Option<State>> {
    let contents = match std::fs::read_to_string(db_path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(OtpError::Io(e)),
    };
    let mut found = None;
    for line in contents.lines() {
        if line.is_empty() {
            continue;
        }
        if username_of(line) == username {
            if found.is_some() {
                return Err(OtpError::DuplicateEntry);
            }
            found = Some(format::parse_entry(line)?);
        }
    }
    Ok(found)
}

/// Rewrites `db_path` with `username`'s line replaced by `new_line`
/// (insert if absent, delete if `new_line` is `None`), preserving every
/// other user's entry untouched. Errors if `username` appears more than
/// once in the existing file.
pub(crate) fn merge_entry(db_path: &Path, username: &str, new_line: Option<&str>) -> Result<()> {
    let existing = match std::fs::read_to_string(db_path) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(OtpError::Io(e)),
    };

    let mut out_lines: Vec<&str> = Vec::new();
    let mut found = false;
    for line in existing.lines() {
        if line.is_empty() {
            continue;
        }
        if username_of(line) == username {
            if found {
                return Err(OtpError::DuplicateEntry);
            }
            found = true;
            if let Some(nl) = new_line {
                out_lines.push(nl);
            }
        } else {
            out_lines.push(line);
        }
    }
    if !found {
        if let Some(nl) = new_line {
            out_lines.push(nl);
        }
    }

    let mut contents = out_lines.join("\n");
    if !contents.is_empty() {
        contents.push('\n');
    }
    atomic_write(db_path, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::SequenceKey;
    use tempfile::tempdir;

    fn sample(username: &str) -> State {
        State::new(username, SequenceKey::from_bytes([0x42; 32]))
    }

    #[test]
    fn merge_entry_appends_new_user_to_empty_file() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        let line = format::format_entry(&sample("alice")).unwrap();
        merge_entry(&db, "alice", Some(&line)).unwrap();
        let loaded = find_entry(&db, "alice").unwrap().unwrap();
        assert_eq!(loaded.username, "alice");
    }

    #[test]
    fn merge_entry_preserves_other_users() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        merge_entry(&db, "alice", Some(&format::format_entry(&sample("alice")).unwrap())).unwrap();
        merge_entry(&db, "bob", Some(&format::format_entry(&sample("bob")).unwrap())).unwrap();
        assert!(find_entry(&db, "alice").unwrap().is_some());
        assert!(find_entry(&db, "bob").unwrap().is_some());
    }

    #[test]
    fn merge_entry_replaces_existing_user() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        let mut alice = sample("alice");
        merge_entry(&db, "alice", Some(&format::format_entry(&alice).unwrap())).unwrap();
        alice.failures = 7;
        merge_entry(&db, "alice", Some(&format::format_entry(&alice).unwrap())).unwrap();
        let loaded = find_entry(&db, "alice").unwrap().unwrap();
        assert_eq!(loaded.failures, 7);
    }

    #[test]
    fn merge_entry_with_none_removes_user() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        merge_entry(&db, "alice", Some(&format::format_entry(&sample("alice")).unwrap())).unwrap();
        merge_entry(&db, "alice", None).unwrap();
        assert!(find_entry(&db, "alice").unwrap().is_none());
    }

    #[test]
    fn find_entry_on_missing_file_is_none_not_error() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("does-not-exist");
        assert!(find_entry(&db, "alice").unwrap().is_none());
    }
}
