//! Deterministic child for exercising the supervisor.
//!
//! Arguments are compared as raw bytes. For each argument equal to
//! `SIGTERM`, SIGTERM is set to be ignored. The first argument that is
//! anything else makes the process exit with status 42. With no such
//! argument the process spins forever, burning CPU, and only dies to a
//! signal it does not ignore.

#![allow(unsafe_code)] // installing a signal disposition is unsafe in nix

use std::ffi::OsStr;
use std::process::ExitCode;

use nix::sys::signal::{SigHandler, Signal, signal};

const EXIT_ARGUMENT: u8 = 42;

fn main() -> ExitCode {
    for arg in std::env::args_os().skip(1) {
        if arg == OsStr::new("SIGTERM") {
            // SAFETY: `SigIgn` installs no handler code, and the process is
            // single-threaded at this point.
            if let Err(errno) = unsafe { signal(Signal::SIGTERM, SigHandler::SigIgn) } {
                eprintln!("timebox-fixture: failed to ignore SIGTERM: {errno}");
                return ExitCode::FAILURE;
            }
        } else {
            return ExitCode::from(EXIT_ARGUMENT);
        }
    }

    loop {
        std::hint::spin_loop();
    }
}
