//! Child supervisor.
//!
//! Owns one child from spawn to disposition. The run races the child's exit
//! against the timeout (and an optional cancellation token) with
//! `tokio::select!`; once the timeout wins, the [`EscalationPolicy`] is
//! consumed step by step, each signal raced against its grace period.
//!
//! Before every signal the child is reaped if it has already exited, so no
//! signal is ever sent to a child observed dead.
//!
//! [`EscalationPolicy`]: crate::escalation::EscalationPolicy

mod handle;
mod spawn;

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

pub use self::handle::{ChildHandle, SignalDelivery};
use crate::disposition::Disposition;
use crate::error::SuperviseError;
use crate::escalation::EscalationState;
use crate::invocation::{Invocation, UnkillablePolicy};
use crate::report::{EscalationTrigger, Report};

/// Deadline used when `started_at + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// What woke the supervisor during the initial wait.
enum Wake {
    Exited(io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

/// Supervises a single spawned child.
#[derive(Debug)]
pub struct Supervisor {
    invocation: Invocation,
    handle: ChildHandle,
    started_at: Instant,
    signals_sent: Vec<Signal>,
    watchers: Option<TaskTracker>,
}

impl Supervisor {
    /// Spawns the child described by `invocation`.
    ///
    /// Must be called from within a Tokio runtime. The timeout clock starts
    /// here.
    ///
    /// # Errors
    ///
    /// Returns `SuperviseError::Launch` if the child cannot be spawned.
    pub fn spawn(invocation: Invocation) -> Result<Self, SuperviseError> {
        let handle = spawn::spawn(&invocation)?;
        Ok(Self {
            invocation,
            handle,
            started_at: Instant::now(),
            signals_sent: Vec::new(),
            watchers: None,
        })
    }

    /// Spawns any [`UnkillablePolicy::Watch`] task on `tracker`, so the
    /// caller can wait for an unkillable child to finally exit.
    ///
    /// Without a tracker the watcher is a detached task and only lives as
    /// long as the runtime does.
    #[must_use]
    pub fn track_watchers(mut self, tracker: TaskTracker) -> Self {
        self.watchers = Some(tracker);
        self
    }

    /// PID of the supervised child (and its process group).
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.handle.pid()
    }

    /// The invocation being supervised.
    #[must_use]
    pub const fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Runs to completion.
    ///
    /// # Errors
    ///
    /// Returns `SuperviseError::Reap` if the child's status cannot be
    /// collected.
    pub async fn run(self) -> Result<Report, SuperviseError> {
        self.run_until(CancellationToken::new()).await
    }

    /// Runs to completion, starting escalation early if `cancel` fires.
    ///
    /// Cancellation never abandons a live child without at least the first
    /// escalation signal; the full sequence is then played out as for a
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns `SuperviseError::Reap` if the child's status cannot be
    /// collected.
    pub async fn run_until(mut self, cancel: CancellationToken) -> Result<Report, SuperviseError> {
        let deadline = self
            .started_at
            .checked_add(self.invocation.timeout())
            .unwrap_or_else(|| self.started_at + FAR_FUTURE);

        let wake = tokio::select! {
            biased;
            status = self.handle.wait() => Wake::Exited(status),
            () = tokio::time::sleep_until(deadline) => Wake::Deadline,
            () = cancel.cancelled() => Wake::Cancelled,
        };

        let trigger = match wake {
            Wake::Exited(status) => {
                let status = status.map_err(|source| self.reap_error(source))?;
                let disposition = Disposition::from_exit_status(status);
                debug!(pid = self.pid(), %disposition, "child exited before timeout");
                return Ok(self.into_report(disposition, None));
            },
            Wake::Deadline => {
                warn!(
                    pid = self.pid(),
                    timeout = %humantime::format_duration(self.invocation.timeout()),
                    "child exceeded timeout"
                );
                EscalationTrigger::Timeout
            },
            Wake::Cancelled => {
                info!(pid = self.pid(), "supervision cancelled");
                EscalationTrigger::Cancelled
            },
        };

        self.escalate(trigger).await
    }

    async fn escalate(mut self, trigger: EscalationTrigger) -> Result<Report, SuperviseError> {
        let policy = self.invocation.escalation().clone();
        let mut state = EscalationState::new();

        while let Some(step) = policy.next_step(&state).copied() {
            match self.handle.signal_group(step.signal) {
                Ok(SignalDelivery::Delivered) => {
                    warn!(pid = self.pid(), signal = %step.signal, "sent escalation signal");
                    self.signals_sent.push(step.signal);
                    state.record(step.signal, std::time::Instant::now());
                },
                Ok(SignalDelivery::AlreadyExited(status)) => {
                    let disposition = self.exited_during_escalation(&state, status);
                    return Ok(self.into_report(disposition, Some(trigger)));
                },
                Ok(SignalDelivery::GroupGone) => {
                    debug!(pid = self.pid(), signal = %step.signal, "process group already gone");
                    state.skip();
                },
                Err(errno) => {
                    warn!(
                        pid = self.pid(),
                        signal = %step.signal,
                        error = %errno,
                        "failed to signal process group"
                    );
                    state.skip();
                },
            }

            let exited = tokio::select! {
                biased;
                status = self.handle.wait() => Some(status),
                () = tokio::time::sleep(step.grace) => None,
            };

            if let Some(status) = exited {
                let status = status.map_err(|source| self.reap_error(source))?;
                let disposition = self.exited_during_escalation(&state, status);
                return Ok(self.into_report(disposition, Some(trigger)));
            }
        }

        // One last look: the final signal may have landed right as the grace
        // period ran out.
        match self.handle.try_wait() {
            Ok(Some(status)) => {
                let disposition = self.exited_during_escalation(&state, status);
                return Ok(self.into_report(disposition, Some(trigger)));
            },
            Ok(None) => {},
            Err(source) => return Err(self.reap_error(source)),
        }

        let disposition = Disposition::TimedOutUnkillable {
            elapsed: self.elapsed(),
        };
        error!(
            pid = self.pid(),
            signals = state.signals_sent(),
            "child survived every escalation signal"
        );
        Ok(self.into_unkillable_report(disposition, trigger))
    }

    fn exited_during_escalation(&self, state: &EscalationState, status: ExitStatus) -> Disposition {
        escalation_outcome(state, status, self.elapsed())
    }

    fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    fn reap_error(&self, source: io::Error) -> SuperviseError {
        error!(pid = self.pid(), error = %source, "failed to reap child");
        SuperviseError::Reap {
            pid: self.pid(),
            source,
        }
    }

    fn into_report(self, disposition: Disposition, trigger: Option<EscalationTrigger>) -> Report {
        Report::new(
            &self.invocation,
            self.handle.pid(),
            disposition,
            self.started_at.elapsed(),
            self.signals_sent,
            trigger,
            self.handle.exit_status(),
        )
    }

    fn into_unkillable_report(self, disposition: Disposition, trigger: EscalationTrigger) -> Report {
        let report = Report::new(
            &self.invocation,
            self.handle.pid(),
            disposition,
            self.started_at.elapsed(),
            self.signals_sent,
            Some(trigger),
            None,
        );

        let pid = self.handle.pid();
        match self.invocation.on_unkillable() {
            UnkillablePolicy::Abandon => {
                warn!(pid, "abandoning unkillable child");
                drop(self.handle.into_child());
            },
            UnkillablePolicy::Watch => {
                warn!(pid, "watching unkillable child in the background");
                let mut child = self.handle.into_child();
                let watcher = async move {
                    match child.wait().await {
                        Ok(status) => info!(pid, %status, "abandoned child finally exited"),
                        Err(e) => error!(pid, error = %e, "failed to reap abandoned child"),
                    }
                };
                match &self.watchers {
                    Some(tracker) => drop(tracker.spawn(watcher)),
                    None => drop(tokio::spawn(watcher)),
                }
            },
        }

        report
    }
}

/// Disposition of a child that exited once escalation had started.
///
/// Only a delivered signal is credited with the exit. A child that exits
/// before any signal reached it (between the deadline and the first send,
/// or after sends that all failed) keeps its natural disposition.
fn escalation_outcome(state: &EscalationState, status: ExitStatus, elapsed: Duration) -> Disposition {
    match state.last_signal() {
        Some(signal) => Disposition::TimedOutAndTerminated { signal, elapsed },
        None => Disposition::from_exit_status(status),
    }
}

/// Spawns and supervises `invocation`, returning its disposition.
///
/// # Errors
///
/// Returns `SuperviseError::Launch` if the child cannot be spawned, or
/// `SuperviseError::Reap` if its status cannot be collected.
pub async fn supervise(invocation: &Invocation) -> Result<Disposition, SuperviseError> {
    supervise_with_cancel(invocation, CancellationToken::new()).await
}

/// Like [`supervise`], escalating immediately if `cancel` fires.
///
/// # Errors
///
/// See [`supervise`].
pub async fn supervise_with_cancel(
    invocation: &Invocation,
    cancel: CancellationToken,
) -> Result<Disposition, SuperviseError> {
    let report = Supervisor::spawn(invocation.clone())?
        .run_until(cancel)
        .await?;
    Ok(report.disposition)
}

/// Runs `program` with `args` under `timeout` using the default escalation.
///
/// # Errors
///
/// Returns `SuperviseError::Config` if `timeout` is zero, otherwise see
/// [`supervise`].
pub async fn run_with_timeout<I, S>(
    program: &str,
    args: I,
    timeout: Duration,
) -> Result<Disposition, SuperviseError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let invocation = Invocation::builder(program)
        .args(args)
        .timeout(timeout)
        .build()?;
    supervise(&invocation).await
}
