//! Final outcome of a supervised run.

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::signal::signal_name;

/// How a supervised child ended up.
///
/// Produced exactly once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Disposition {
    /// The child exited on its own before the timeout.
    NormalExit {
        /// Exit code returned by the child.
        code: i32,
    },

    /// The child was terminated by a signal the supervisor did not send.
    KilledBySignal {
        /// Raw signal number.
        signal: i32,
    },

    /// The timeout expired and the child exited during escalation.
    TimedOutAndTerminated {
        /// The last signal sent before the child exited.
        #[serde(with = "crate::signal::serde_signal")]
        signal: Signal,
        /// Time from spawn until the exit was observed.
        #[serde(with = "crate::humantime_serde")]
        elapsed: Duration,
    },

    /// The child survived every signal in the escalation sequence.
    TimedOutUnkillable {
        /// Time from spawn until the sequence was exhausted.
        #[serde(with = "crate::humantime_serde")]
        elapsed: Duration,
    },
}

impl Disposition {
    /// Classifies an exit status observed before any escalation.
    ///
    /// A signal-terminated status takes precedence over the exit code.
    #[must_use]
    pub fn from_exit_status(status: ExitStatus) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(signal) = status.signal() {
            return Self::KilledBySignal { signal };
        }

        // wait(2) only reports exited or signalled children, so a code is
        // always present here.
        Self::NormalExit {
            code: status.code().unwrap_or_default(),
        }
    }

    /// Returns the stable snake-case name of the variant.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NormalExit { .. } => "normal_exit",
            Self::KilledBySignal { .. } => "killed_by_signal",
            Self::TimedOutAndTerminated { .. } => "timed_out_and_terminated",
            Self::TimedOutUnkillable { .. } => "timed_out_unkillable",
        }
    }

    /// Returns the exit code for a `NormalExit`.
    #[must_use]
    pub const fn exit_code(&self) -> Option<i32> {
        match self {
            Self::NormalExit { code } => Some(*code),
            _ => None,
        }
    }

    /// Whether the child exited normally with code 0.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::NormalExit { code: 0 })
    }

    /// Whether the timeout expired.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::TimedOutAndTerminated { .. } | Self::TimedOutUnkillable { .. }
        )
    }

    /// Whether the child may still be alive.
    #[must_use]
    pub const fn is_unkillable(&self) -> bool {
        matches!(self, Self::TimedOutUnkillable { .. })
    }

    /// Elapsed time, for the timed-out variants.
    #[must_use]
    pub const fn elapsed(&self) -> Option<Duration> {
        match self {
            Self::TimedOutAndTerminated { elapsed, .. } | Self::TimedOutUnkillable { elapsed } => {
                Some(*elapsed)
            },
            _ => None,
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NormalExit { code } => write!(f, "exited with code {code}"),
            Self::KilledBySignal { signal } => {
                write!(f, "killed by signal {signal} ({})", signal_name(*signal))
            },
            Self::TimedOutAndTerminated { signal, elapsed } => write!(
                f,
                "timed out, terminated by {signal} after {}",
                humantime::format_duration(*elapsed)
            ),
            Self::TimedOutUnkillable { elapsed } => write!(
                f,
                "timed out, still alive after {}",
                humantime::format_duration(*elapsed)
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::process::ExitStatusExt;

    use super::*;

    #[test]
    fn test_classify_clean_exit() {
        let disposition = Disposition::from_exit_status(ExitStatus::from_raw(0));
        assert_eq!(disposition, Disposition::NormalExit { code: 0 });
        assert!(disposition.is_success());
        assert!(!disposition.is_timeout());
    }

    #[test]
    fn test_classify_error_exit() {
        // wait(2) encodes the exit code in the second byte.
        let disposition = Disposition::from_exit_status(ExitStatus::from_raw(42 << 8));
        assert_eq!(disposition, Disposition::NormalExit { code: 42 });
        assert_eq!(disposition.exit_code(), Some(42));
        assert!(!disposition.is_success());
    }

    #[test]
    fn test_classify_signal() {
        let disposition =
            Disposition::from_exit_status(ExitStatus::from_raw(Signal::SIGSEGV as i32));
        assert_eq!(
            disposition,
            Disposition::KilledBySignal {
                signal: Signal::SIGSEGV as i32
            }
        );
        assert_eq!(disposition.exit_code(), None);
    }

    #[test]
    fn test_timeout_predicates() {
        let terminated = Disposition::TimedOutAndTerminated {
            signal: Signal::SIGKILL,
            elapsed: Duration::from_millis(300),
        };
        assert!(terminated.is_timeout());
        assert!(!terminated.is_unkillable());
        assert_eq!(terminated.elapsed(), Some(Duration::from_millis(300)));

        let unkillable = Disposition::TimedOutUnkillable {
            elapsed: Duration::from_secs(1),
        };
        assert!(unkillable.is_timeout());
        assert!(unkillable.is_unkillable());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Disposition::NormalExit { code: 3 }.to_string(),
            "exited with code 3"
        );
        assert_eq!(
            Disposition::KilledBySignal { signal: 9 }.to_string(),
            "killed by signal 9 (SIGKILL)"
        );
        assert_eq!(
            Disposition::TimedOutAndTerminated {
                signal: Signal::SIGTERM,
                elapsed: Duration::from_millis(1500),
            }
            .to_string(),
            "timed out, terminated by SIGTERM after 1s 500ms"
        );
    }

    #[test]
    fn test_serialize_tagged() {
        let json = serde_json::to_value(Disposition::TimedOutAndTerminated {
            signal: Signal::SIGKILL,
            elapsed: Duration::from_millis(300),
        })
        .unwrap();

        assert_eq!(json["kind"], "timed_out_and_terminated");
        assert_eq!(json["signal"], "SIGKILL");
        assert_eq!(json["elapsed"], "300ms");
    }
}
