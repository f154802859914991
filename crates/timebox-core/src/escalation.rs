//! Signal escalation policy.
//!
//! Decides which signal to send next once a child has outlived its timeout.
//! The policy is an ordered list of steps consumed by index; the supervisor
//! keeps an [`EscalationState`] recording how far it has got. Nothing here
//! performs I/O, so the sequencing can be tested without a process.

use std::time::{Duration, Instant};

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default wait after each escalation signal.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(3);

const fn default_grace() -> Duration {
    DEFAULT_GRACE
}

/// One step of an escalation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EscalationStep {
    /// Signal delivered to the child's process group.
    #[serde(with = "crate::signal::serde_signal")]
    pub signal: Signal,

    /// How long to wait for the child to exit before the next step.
    #[serde(default = "default_grace")]
    #[serde(with = "crate::humantime_serde")]
    pub grace: Duration,
}

impl EscalationStep {
    /// Creates a step.
    #[must_use]
    pub const fn new(signal: Signal, grace: Duration) -> Self {
        Self { signal, grace }
    }
}

/// Ordered, non-empty sequence of escalation steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<EscalationStep>", into = "Vec<EscalationStep>")]
pub struct EscalationPolicy {
    steps: Vec<EscalationStep>,
}

impl Default for EscalationPolicy {
    /// `SIGTERM`, then `SIGKILL`, each followed by [`DEFAULT_GRACE`].
    fn default() -> Self {
        Self {
            steps: vec![
                EscalationStep::new(Signal::SIGTERM, DEFAULT_GRACE),
                EscalationStep::new(Signal::SIGKILL, DEFAULT_GRACE),
            ],
        }
    }
}

impl EscalationPolicy {
    /// Creates a policy from explicit steps.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptySignalSequence` if `steps` is empty.
    pub fn new(steps: Vec<EscalationStep>) -> Result<Self, ConfigError> {
        if steps.is_empty() {
            return Err(ConfigError::EmptySignalSequence);
        }
        Ok(Self { steps })
    }

    /// Creates a policy sending `signals` in order with the same grace after
    /// each.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptySignalSequence` if `signals` is empty.
    pub fn uniform(
        signals: impl IntoIterator<Item = Signal>,
        grace: Duration,
    ) -> Result<Self, ConfigError> {
        Self::new(
            signals
                .into_iter()
                .map(|signal| EscalationStep::new(signal, grace))
                .collect(),
        )
    }

    /// A single `SIGKILL` step.
    #[must_use]
    pub fn kill_only(grace: Duration) -> Self {
        Self {
            steps: vec![EscalationStep::new(Signal::SIGKILL, grace)],
        }
    }

    /// Returns a copy with every step's grace replaced by `grace`.
    #[must_use]
    pub fn with_grace(mut self, grace: Duration) -> Self {
        for step in &mut self.steps {
            step.grace = grace;
        }
        self
    }

    /// The configured steps, in order.
    #[must_use]
    pub fn steps(&self) -> &[EscalationStep] {
        &self.steps
    }

    /// The configured signals, in order.
    pub fn signals(&self) -> impl Iterator<Item = Signal> + '_ {
        self.steps.iter().map(|step| step.signal)
    }

    /// Maximum number of signals a run will ever send.
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.steps.len()
    }

    /// The step to take next, or `None` once the sequence is exhausted.
    #[must_use]
    pub fn next_step(&self, state: &EscalationState) -> Option<&EscalationStep> {
        self.steps.get(state.sent)
    }

    /// The signal to send next, or `None` once the sequence is exhausted.
    #[must_use]
    pub fn next_signal(&self, state: &EscalationState) -> Option<Signal> {
        self.next_step(state).map(|step| step.signal)
    }

    /// Grace period for the most recently sent step.
    #[must_use]
    pub fn current_grace(&self, state: &EscalationState) -> Option<Duration> {
        state
            .sent
            .checked_sub(1)
            .and_then(|index| self.steps.get(index))
            .map(|step| step.grace)
    }

    /// Sum of every step's grace period, saturating at `Duration::MAX`.
    #[must_use]
    pub fn total_grace(&self) -> Duration {
        self.steps
            .iter()
            .fold(Duration::ZERO, |total, step| total.saturating_add(step.grace))
    }

    /// Longest a run can take before it is declared unkillable, saturating
    /// at `Duration::MAX`.
    #[must_use]
    pub fn worst_case(&self, timeout: Duration) -> Duration {
        timeout.saturating_add(self.total_grace())
    }
}

impl TryFrom<Vec<EscalationStep>> for EscalationPolicy {
    type Error = ConfigError;

    fn try_from(steps: Vec<EscalationStep>) -> Result<Self, Self::Error> {
        Self::new(steps)
    }
}

impl From<EscalationPolicy> for Vec<EscalationStep> {
    fn from(policy: EscalationPolicy) -> Self {
        policy.steps
    }
}

/// Progress through an [`EscalationPolicy`].
///
/// Only ever moves forward.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationState {
    sent: usize,
    last_signal: Option<Signal>,
    last_sent_at: Option<Instant>,
}

impl EscalationState {
    /// State before any signal has been sent.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sent: 0,
            last_signal: None,
            last_sent_at: None,
        }
    }

    /// Records that `signal` was delivered at `at`.
    pub fn record(&mut self, signal: Signal, at: Instant) {
        self.sent += 1;
        self.last_signal = Some(signal);
        self.last_sent_at = Some(at);
    }

    /// Consumes a step whose signal was never delivered.
    ///
    /// The step still counts toward the ceiling, but [`last_signal`] keeps
    /// naming the last signal that actually reached the child.
    ///
    /// [`last_signal`]: Self::last_signal
    pub fn skip(&mut self) {
        self.sent += 1;
    }

    /// Number of steps consumed so far, delivered or not.
    #[must_use]
    pub const fn signals_sent(&self) -> usize {
        self.sent
    }

    /// The most recently delivered signal, if any.
    #[must_use]
    pub const fn last_signal(&self) -> Option<Signal> {
        self.last_signal
    }

    /// When the most recent signal was sent.
    #[must_use]
    pub const fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    /// Whether escalation has started.
    #[must_use]
    pub const fn has_escalated(&self) -> bool {
        self.sent > 0
    }
}
