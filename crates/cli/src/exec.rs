//! Hand-off to the target command

use std::ffi::{OsStr, OsString};
use std::io;
use std::process::Command;

/// Replace the current process with `program`
///
/// The program is looked up on `PATH` and inherits the (rewritten)
/// environment. Only returns on failure.
#[cfg(unix)]
pub fn replace_process(program: &OsStr, args: &[OsString]) -> io::Error {
    use std::os::unix::process::CommandExt;

    Command::new(program).args(args).exec()
}

/// Run `program` as a child and exit with its status
///
/// Platforms without `exec` cannot replace the process image.
#[cfg(not(unix))]
pub fn replace_process(program: &OsStr, args: &[OsString]) -> io::Error {
    match Command::new(program).args(args).status() {
        Ok(status) => std::process::exit(status.code().unwrap_or(1)),
        Err(err) => err,
    }
}
