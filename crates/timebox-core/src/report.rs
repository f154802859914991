//! Disposition reporting.
//!
//! Converts the outcome of a run into something a caller can act on: a
//! structured [`Report`] (printable, or serialisable to JSON) and a process
//! exit status via [`to_exit_status`].

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::disposition::Disposition;
use crate::invocation::Invocation;

/// Exit status after the child was terminated because of the timeout.
pub const EXIT_TIMED_OUT: i32 = 124;

/// Exit status when the child could not be brought under control.
///
/// Reserved so callers can tell "the child failed" apart from "the
/// supervisor could not stop the child".
pub const EXIT_UNKILLABLE: i32 = 125;

/// Exit status when the program exists but cannot be executed.
pub const EXIT_CANNOT_EXECUTE: i32 = 126;

/// Exit status when the program cannot be found.
pub const EXIT_NOT_FOUND: i32 = 127;

/// Exit status for rejected configuration, matching usage errors.
pub const EXIT_CONFIG: i32 = 2;

/// Offset added to a signal number for a signal-terminated child.
pub const SIGNAL_EXIT_BASE: i32 = 128;

/// Maps a disposition to the exit status a wrapper process should use.
///
/// - `NormalExit(code)`: `code`
/// - `KilledBySignal(sig)`: `128 + sig`
/// - `TimedOutAndTerminated`: [`EXIT_TIMED_OUT`]
/// - `TimedOutUnkillable`: [`EXIT_UNKILLABLE`]
#[must_use]
pub const fn to_exit_status(disposition: &Disposition) -> i32 {
    match disposition {
        Disposition::NormalExit { code } => *code,
        Disposition::KilledBySignal { signal } => SIGNAL_EXIT_BASE + *signal,
        Disposition::TimedOutAndTerminated { .. } => EXIT_TIMED_OUT,
        Disposition::TimedOutUnkillable { .. } => EXIT_UNKILLABLE,
    }
}

/// Why escalation started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationTrigger {
    /// The total timeout expired.
    Timeout,
    /// The caller cancelled the run.
    Cancelled,
}

/// Full account of one supervised run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Program and arguments as run.
    pub command: String,

    /// PID (and process group) of the child.
    pub pid: u32,

    /// The outcome.
    pub disposition: Disposition,

    /// Wall-clock time from spawn to the outcome.
    #[serde(with = "crate::humantime_serde")]
    pub elapsed: Duration,

    /// Signals actually delivered, in order.
    #[serde(with = "crate::signal::serde_signal_list")]
    pub signals_sent: Vec<Signal>,

    /// Present when escalation happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<EscalationTrigger>,

    /// Raw exit code, when the child exited normally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Raw terminating signal, when the child was killed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_signal: Option<i32>,
}

impl Report {
    pub(crate) fn new(
        invocation: &Invocation,
        pid: u32,
        disposition: Disposition,
        elapsed: Duration,
        signals_sent: Vec<Signal>,
        trigger: Option<EscalationTrigger>,
        status: Option<ExitStatus>,
    ) -> Self {
        use std::os::unix::process::ExitStatusExt;

        Self {
            command: invocation.display_command(),
            pid,
            disposition,
            elapsed,
            signals_sent,
            trigger,
            exit_code: status.and_then(|s| s.code()),
            exit_signal: status.and_then(|s| s.signal()),
        }
    }

    /// Exit status for this run; see [`to_exit_status`].
    #[must_use]
    pub const fn exit_status(&self) -> i32 {
        to_exit_status(&self.disposition)
    }

    /// Renders the report as a single JSON line.
    ///
    /// # Errors
    ///
    /// Returns an error if serialisation fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "`{}` (pid {}) {}",
            self.command, self.pid, self.disposition
        )?;
        if self.trigger == Some(EscalationTrigger::Cancelled) {
            write!(f, " [cancelled]")?;
        }
        if !self.signals_sent.is_empty() {
            let names: Vec<&str> = self.signals_sent.iter().map(|s| s.as_str()).collect();
            write!(f, "; sent {}", names.join(", "))?;
        }
        Ok(())
    }
}
