//! Helpers shared by every ffmpeg subprocess wrapper.

use std::ffi::OsStr;
use std::io::{self, Read};
use std::process::{Child, Command};

use reel_core::error::{EngineError, Result};

/// Spawn `cmd`, mapping failure to the stage-fatal [`EngineError::ProcessSpawn`].
pub(crate) fn spawn(role: &'static str, cmd: &mut Command) -> Result<Child> {
    let program = cmd.get_program().to_string_lossy().into_owned();
    tracing::debug!(role, command = %display_command(cmd), "Spawning process");
    cmd.spawn().map_err(|source| EngineError::ProcessSpawn {
        role,
        program,
        source,
    })
}

/// Fill `buf` from `reader`, stopping early only at EOF.
///
/// Returns the number of bytes read; anything short of `buf.len()` means
/// the stream ended.
pub(crate) fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Wait for `child`, killing it first if it is still running.
pub(crate) fn reap(role: &'static str, child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => {
            tracing::debug!(role, %status, "Process exited");
            return;
        }
        Ok(None) => {
            tracing::debug!(role, pid = child.id(), "Terminating process still running");
            let _ = child.kill();
        }
        Err(e) => tracing::warn!(role, error = %e, "Could not query process status"),
    }
    if let Err(e) = child.wait() {
        tracing::warn!(role, error = %e, "Failed to reap process");
    }
}

/// Render a command line for logs.
pub(crate) fn display_command(cmd: &Command) -> String {
    let mut line = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&quote(arg));
    }
    line
}

fn quote(arg: &OsStr) -> String {
    let arg = arg.to_string_lossy();
    if arg.is_empty() || arg.contains(char::is_whitespace) {
        format!("\"{arg}\"")
    } else {
        arg.into_owned()
    }
}
