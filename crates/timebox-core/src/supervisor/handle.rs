//! Exclusive ownership of one spawned child.

use std::io;
use std::process::ExitStatus;

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::process::Child;
use tracing::debug;

/// Outcome of [`ChildHandle::signal_group`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDelivery {
    /// The signal was handed to the kernel for the process group.
    Delivered,

    /// The child had already exited; nothing was sent.
    AlreadyExited(ExitStatus),

    /// The process group no longer exists.
    GroupGone,
}

#[derive(Debug, Clone, Copy)]
enum ChildState {
    Running,
    Exited(ExitStatus),
}

/// A live child process and the process group it leads.
///
/// Moves from running to exited exactly once. Once exited, the handle never
/// signals again, so a recycled PID cannot be hit.
#[derive(Debug)]
pub struct ChildHandle {
    child: Child,
    pid: u32,
    state: ChildState,
}

impl ChildHandle {
    pub(crate) const fn new(child: Child, pid: u32) -> Self {
        Self {
            child,
            pid,
            state: ChildState::Running,
        }
    }

    /// OS process ID. Also the process group ID.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether the child has not yet been reaped.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.state, ChildState::Running)
    }

    /// The exit status, once reaped.
    #[must_use]
    pub const fn exit_status(&self) -> Option<ExitStatus> {
        match self.state {
            ChildState::Running => None,
            ChildState::Exited(status) => Some(status),
        }
    }

    /// Waits for the child to exit and reaps it.
    ///
    /// Cancel safe. Returns the stored status if already reaped.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if waiting fails.
    pub async fn wait(&mut self) -> io::Result<ExitStatus> {
        if let ChildState::Exited(status) = self.state {
            return Ok(status);
        }
        let status = self.child.wait().await?;
        self.mark_exited(status);
        Ok(status)
    }

    /// Reaps the child if it has exited, without blocking.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the status query fails.
    pub fn try_wait(&mut self) -> io::Result<Option<ExitStatus>> {
        if let ChildState::Exited(status) = self.state {
            return Ok(Some(status));
        }
        let status = self.child.try_wait()?;
        if let Some(status) = status {
            self.mark_exited(status);
        }
        Ok(status)
    }

    /// Sends `signal` to the child's process group.
    ///
    /// The child is reaped first if it already exited, in which case nothing
    /// is sent. A missing process group (`ESRCH`) is not an error.
    ///
    /// # Errors
    ///
    /// Returns the errno for any other `killpg` failure, e.g. `EPERM`.
    pub fn signal_group(&mut self, signal: Signal) -> Result<SignalDelivery, Errno> {
        match self.try_wait() {
            Ok(Some(status)) => return Ok(SignalDelivery::AlreadyExited(status)),
            Ok(None) => {},
            // The status query failing says nothing about liveness; the
            // signal is still worth sending.
            Err(e) => debug!(pid = self.pid, error = %e, "try_wait failed before signalling"),
        }

        match killpg(self.pgid(), signal) {
            Ok(()) => Ok(SignalDelivery::Delivered),
            Err(Errno::ESRCH) => Ok(SignalDelivery::GroupGone),
            Err(errno) => Err(errno),
        }
    }

    /// Gives up ownership of the underlying child.
    pub(crate) fn into_child(self) -> Child {
        self.child
    }

    #[allow(clippy::cast_possible_wrap)] // PIDs fit in i32
    const fn pgid(&self) -> Pid {
        Pid::from_raw(self.pid as i32)
    }

    fn mark_exited(&mut self, status: ExitStatus) {
        debug!(pid = self.pid, %status, "child reaped");
        self.state = ChildState::Exited(status);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::invocation::{Invocation, StdioMode};
    use crate::supervisor::spawn::spawn;

    fn invocation(program: &str, args: &[&str]) -> Invocation {
        Invocation::builder(program)
            .args(args.iter().copied())
            .stdio(StdioMode::Null)
            .build()
            .unwrap()
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_signal_after_exit_is_noop() {
        let mut handle = spawn(&invocation("true", &[])).unwrap();
        let status = handle.wait().await.unwrap();

        let delivery = handle.signal_group(Signal::SIGKILL).unwrap();
        assert_eq!(delivery, SignalDelivery::AlreadyExited(status));
        assert_eq!(handle.exit_status(), Some(status));
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_signal_reaps_exited_child_first() {
        let mut handle = spawn(&invocation("true", &[])).unwrap();

        // Give the child time to exit without reaping it.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(handle.is_running());

        let delivery = handle.signal_group(Signal::SIGTERM).unwrap();
        assert!(matches!(delivery, SignalDelivery::AlreadyExited(s) if s.success()));
        assert!(!handle.is_running());
    }

    #[cfg_attr(miri, ignore)]
    #[tokio::test]
    async fn test_signal_running_child() {
        use std::os::unix::process::ExitStatusExt;

        let mut handle = spawn(&invocation("sleep", &["10"])).unwrap();
        assert_eq!(
            handle.signal_group(Signal::SIGTERM).unwrap(),
            SignalDelivery::Delivered
        );

        let status = handle.wait().await.unwrap();
        assert_eq!(status.signal(), Some(Signal::SIGTERM as i32));

        // Waiting again returns the stored status.
        assert_eq!(handle.wait().await.unwrap(), status);
        assert_eq!(handle.try_wait().unwrap(), Some(status));
    }
}
