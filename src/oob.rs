//! Out-of-band passcode delivery: spawns a configured, privilege-dropped
//! script with `(contact, passcode)` as its arguments.
//!
//! The launch path takes only these two already-derived strings, never a
//! [`crate::state::State`] reference -- the child's process image must
//! never have the secret key or spass hash mapped into it.

use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use crate::{OtpError, Result};

const POLL_ATTEMPTS: u32 = 200;
const POLL_INTERVAL: Duration = Duration::from_millis(7);

/// The unprivileged identity the delivery script runs as.
#[derive(Clone, Copy, Debug)]
pub struct DropTo {
    pub uid: u32,
    pub gid: u32,
}

/// Launches `script` with `contact` and `passcode` as its only two
/// arguments, running as `drop_to` rather than the caller's identity.
/// Blocks until the child exits or [`POLL_ATTEMPTS`] * [`POLL_INTERVAL`]
/// has elapsed, at which point the child is killed and the timeout is
/// reported as [`OtpError::ServerInit`].
pub fn deliver(script: &Path, contact: &str, passcode: &str, drop_to: DropTo) -> Result<()> {
    let mut child = spawn_dropped(script, contact, passcode, drop_to)?;
    wait_bounded(&mut child)
}

#[cfg(unix)]
fn spawn_dropped(script: &Path, contact: &str, passcode: &str, drop_to: DropTo) -> Result<Child> {
    use std::os::unix::process::CommandExt;
    Command::new(script)
        .arg(contact)
        .arg(passcode)
        .gid(drop_to.gid)
        .uid(drop_to.uid)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(OtpError::Io)
}

#[cfg(not(unix))]
fn spawn_dropped(script: &Path, contact: &str, passcode: &str, _drop_to: DropTo) -> Result<Child> {
    Command::new(script)
        .arg(contact)
        .arg(passcode)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(OtpError::Io)
}

fn wait_bounded(child: &mut Child) -> Result<()> {
    for _ in 0..POLL_ATTEMPTS {
        match child.try_wait() {
            Ok(Some(_status)) => return Ok(()),
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(OtpError::Io(e)),
        }
    }
    let _ = child.kill();
    let _ = child.try_wait();
    Err(OtpError::ServerInit)
}
