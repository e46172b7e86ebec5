//! Client side: locates and spawns the privileged agent binary, speaks
//! the handshake, and exchanges request/response frames with it.

use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Duration;

use crate::agent::{decode_frame, encode_frame, Frame, Opcode};
use crate::{OtpError, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Well-known system install locations, checked in order right after a
/// caller-supplied path and before the debug-only `./agent_otp` fallback.
const SYSTEM_AGENT_PATHS: &[&str] = &["/usr/bin/agent_otp", "/usr/local/bin/agent_otp"];

/// Resolves the agent executable to run: a caller-supplied path first,
/// then the well-known system install locations, then (debug builds
/// only) `./agent_otp` as a last resort. The chosen file must be a
/// regular file with the execute bit set for at least one of {owner
/// matching the calling uid, group matching the calling gid, others}.
pub fn locate_agent_executable(caller_supplied: Option<&Path>) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(p) = caller_supplied {
        candidates.push(p.to_path_buf());
    }
    candidates.extend(SYSTEM_AGENT_PATHS.iter().map(PathBuf::from));
    #[cfg(debug_assertions)]
    candidates.push(PathBuf::from("./agent_otp"));

    for candidate in candidates {
        if is_runnable(&candidate) {
            return Ok(candidate);
        }
    }
    Err(OtpError::InitExecutable)
}

#[cfg(unix)]
fn is_runnable(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let meta = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !meta.is_file() {
        return false;
    }
    let mode = meta.mode();
    let uid = unsafe { libc::getuid() };
    let gid = unsafe { libc::getgid() };
    let owner_exec = meta.uid() == uid && mode & 0o100 != 0;
    let group_exec = meta.gid() == gid && mode & 0o010 != 0;
    let other_exec = mode & 0o001 != 0;
    owner_exec || group_exec || other_exec
}

#[cfg(not(unix))]
fn is_runnable(path: &Path) -> bool {
    path.is_file()
}

/// A live connection to a spawned agent process.
pub struct AgentClient {
    child: Child,
    stdin: ChildStdin,
    stdout: ChildStdout,
}

impl AgentClient {
    /// Spawns `agent_path` with piped stdin/stdout (the idiomatic
    /// equivalent of the anonymous-pipe-plus-fork dance this protocol
    /// was originally built on) and completes the `INIT` handshake.
    pub fn spawn(agent_path: &Path) -> Result<Self> {
        let mut child = Command::new(agent_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .spawn()
            .map_err(OtpError::Io)?;
        let stdin = child.stdin.take().ok_or(OtpError::Disconnect)?;
        let stdout = child.stdout.take().ok_or(OtpError::Disconnect)?;
        let mut client = AgentClient { child, stdin, stdout };
        client.complete_handshake()?;
        Ok(client)
    }

    fn complete_handshake(&mut self) -> Result<()> {
        let frame = read_frame_with_timeout(&mut self.stdout, HANDSHAKE_TIMEOUT)?;
        if Opcode::from_u16(frame.opcode)? != Opcode::Init {
            return Err(OtpError::ProtocolMismatch);
        }
        if frame.protocol_version != crate::agent::PROTOCOL_VERSION {
            return Err(OtpError::ProtocolMismatch);
        }
        match frame.status {
            0 => Ok(()),
            s if s == OtpError::InitConfiguration.status_code() => Err(OtpError::InitConfiguration),
            s if s == OtpError::InitExecutable.status_code() => Err(OtpError::InitExecutable),
            s if s == OtpError::InitPrivileges.status_code() => Err(OtpError::InitPrivileges),
            _ => Err(OtpError::InitEmergency),
        }
    }

    /// Sends one request frame and waits for the matching response,
    /// bounded by [`REQUEST_TIMEOUT`].
    pub fn call(&mut self, request: Frame) -> Result<Frame> {
        encode_frame(&mut self.stdin, &request)?;
        read_frame_with_timeout(&mut self.stdout, REQUEST_TIMEOUT)
    }

    /// Reports whether the agent process has exited, without blocking.
    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

/// Waits for `fd` to become readable, bounded by `timeout`. Returns
/// `Ok(true)` if data is ready, `Ok(false)` on timeout.
#[cfg(unix)]
fn wait_readable(fd: std::os::unix::io::RawFd, timeout: Duration) -> Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let ms = timeout.as_millis().min(i32::MAX as u128) as i32;
    let ret = unsafe { libc::poll(&mut pfd, 1, ms) };
    if ret < 0 {
        return Err(OtpError::Io(std::io::Error::last_os_error()));
    }
    Ok(ret > 0)
}

/// Reads one frame from the agent's stdout pipe, bounded by `timeout`
/// for the arrival of its first byte -- this is what detects an agent
/// that never answers the `INIT` handshake or a request. Once the
/// frame starts arriving it is read to completion synchronously, as a
/// well-behaved peer writes a whole frame without long internal pauses.
fn read_frame_with_timeout(stdout: &mut ChildStdout, timeout: Duration) -> Result<Frame> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        if !wait_readable(stdout.as_raw_fd(), timeout)? {
            return Err(OtpError::ServerInit);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = timeout;
    }
    decode_frame(stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locate_agent_executable_fails_closed_with_no_candidates_present() {
        let result = locate_agent_executable(Some(Path::new("/no/such/agent/binary")));
        assert!(matches!(result, Err(OtpError::InitExecutable)));
    }

    #[test]
    fn caller_supplied_path_is_tried_first() {
        // /bin/sh is a real, executable-by-everyone file on any unix
        // test host, standing in for a real agent binary here.
        let path = PathBuf::from("/bin/sh");
        if path.exists() {
            let resolved = locate_agent_executable(Some(&path)).unwrap();
            assert_eq!(resolved, path);
        }
    }
}
