//! Description of a single supervised run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::sys::signal::Signal;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::escalation::{DEFAULT_GRACE, EscalationPolicy};

/// Timeout used when the builder is not given one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do with a child that survived the whole escalation sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnkillablePolicy {
    /// Drop the handle and return. Tokio reaps the process in the
    /// background if it ever exits.
    #[default]
    Abandon,

    /// Keep a background task waiting on the child and log its exit.
    Watch,
}

/// Where the child's standard output and error go. Stdin is always null.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StdioMode {
    /// Share the supervisor's stdout and stderr.
    #[default]
    Inherit,

    /// Discard output.
    Null,
}

/// Immutable description of what to run and how to bound it.
///
/// Build with [`Invocation::builder`]; validation happens at
/// [`InvocationBuilder::build`], before any process exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Duration,
    escalation: EscalationPolicy,
    on_unkillable: UnkillablePolicy,
    stdio: StdioMode,
}

impl Invocation {
    /// Starts building an invocation of `program`.
    #[must_use]
    pub fn builder(program: impl Into<PathBuf>) -> InvocationBuilder {
        InvocationBuilder::new(program)
    }

    /// Executable path or name resolved through `PATH`.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Arguments, excluding the program itself.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Working directory, if overridden.
    #[must_use]
    pub fn cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    /// Environment overrides applied on top of the inherited environment.
    #[must_use]
    pub const fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Total wall-clock budget before escalation starts.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The escalation sequence.
    #[must_use]
    pub const fn escalation(&self) -> &EscalationPolicy {
        &self.escalation
    }

    /// Handling of a child that outlives every signal.
    #[must_use]
    pub const fn on_unkillable(&self) -> UnkillablePolicy {
        self.on_unkillable
    }

    /// Output handling.
    #[must_use]
    pub const fn stdio(&self) -> StdioMode {
        self.stdio
    }

    /// Program and arguments joined for log messages.
    #[must_use]
    pub fn display_command(&self) -> String {
        let mut out = self.program.display().to_string();
        for arg in &self.args {
            out.push(' ');
            out.push_str(arg);
        }
        out
    }
}

/// Builder for [`Invocation`].
#[derive(Debug, Clone)]
#[must_use]
pub struct InvocationBuilder {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Duration,
    escalation: Option<EscalationPolicy>,
    signals: Option<Vec<Signal>>,
    grace: Option<Duration>,
    on_unkillable: UnkillablePolicy,
    stdio: StdioMode,
}

impl InvocationBuilder {
    fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            escalation: None,
            signals: None,
            grace: None,
            on_unkillable: UnkillablePolicy::default(),
            stdio: StdioMode::default(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the working directory.
    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Adds an environment override.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the total timeout.
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Uses an explicit escalation policy.
    ///
    /// `signals` and `grace` still apply on top of it when set.
    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.escalation = Some(policy);
        self
    }

    /// Replaces the signal sequence.
    pub fn signals(mut self, signals: impl IntoIterator<Item = Signal>) -> Self {
        self.signals = Some(signals.into_iter().collect());
        self
    }

    /// Sets the grace period after every signal.
    pub const fn grace(mut self, grace: Duration) -> Self {
        self.grace = Some(grace);
        self
    }

    /// Sets the unkillable policy.
    pub const fn on_unkillable(mut self, policy: UnkillablePolicy) -> Self {
        self.on_unkillable = policy;
        self
    }

    /// Sets the stdio mode.
    pub const fn stdio(mut self, stdio: StdioMode) -> Self {
        self.stdio = stdio;
        self
    }

    /// Validates and builds the invocation.
    ///
    /// # Errors
    ///
    /// - `ConfigError::EmptyProgram` if the program path is empty
    /// - `ConfigError::NonPositiveTimeout` if the timeout is zero
    /// - `ConfigError::EmptySignalSequence` if `signals` was given no
    ///   signals
    pub fn build(self) -> Result<Invocation, ConfigError> {
        if self.program.as_os_str().is_empty() {
            return Err(ConfigError::EmptyProgram);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }

        let base = self.escalation.unwrap_or_default();
        let mut escalation = match self.signals {
            Some(signals) => {
                let grace = self
                    .grace
                    .or_else(|| base.steps().first().map(|step| step.grace))
                    .unwrap_or(DEFAULT_GRACE);
                EscalationPolicy::uniform(signals, grace)?
            },
            None => base,
        };
        if let Some(grace) = self.grace {
            escalation = escalation.with_grace(grace);
        }

        Ok(Invocation {
            program: self.program,
            args: self.args,
            cwd: self.cwd,
            env: self.env,
            timeout: self.timeout,
            escalation,
            on_unkillable: self.on_unkillable,
            stdio: self.stdio,
        })
    }
}

/// Splits a `KEY=VALUE` environment override.
///
/// # Errors
///
/// Returns `ConfigError::InvalidEnv` when there is no `=` or the key is
/// empty.
pub fn parse_env_pair(input: &str) -> Result<(String, String), ConfigError> {
    match input.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(ConfigError::InvalidEnv(input.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escalation::EscalationStep;

    #[test]
    fn test_builder_defaults() {
        let invocation = Invocation::builder("echo").arg("hello").build().unwrap();

        assert_eq!(invocation.program(), Path::new("echo"));
        assert_eq!(invocation.args(), ["hello"]);
        assert_eq!(invocation.timeout(), DEFAULT_TIMEOUT);
        assert_eq!(invocation.escalation(), &EscalationPolicy::default());
        assert_eq!(invocation.on_unkillable(), UnkillablePolicy::Abandon);
        assert_eq!(invocation.stdio(), StdioMode::Inherit);
        assert_eq!(invocation.cwd(), None);
        assert_eq!(invocation.display_command(), "echo hello");
    }

    #[test]
    fn test_builder_signals_and_grace() {
        let invocation = Invocation::builder("sleep")
            .args(["10"])
            .timeout(Duration::from_millis(200))
            .signals([Signal::SIGINT, Signal::SIGKILL])
            .grace(Duration::from_millis(100))
            .build()
            .unwrap();

        assert_eq!(
            invocation.escalation().steps(),
            &[
                EscalationStep::new(Signal::SIGINT, Duration::from_millis(100)),
                EscalationStep::new(Signal::SIGKILL, Duration::from_millis(100)),
            ]
        );
    }

    #[test]
    fn test_builder_grace_overrides_policy() {
        let invocation = Invocation::builder("true")
            .escalation(EscalationPolicy::kill_only(Duration::from_secs(9)))
            .grace(Duration::from_millis(5))
            .build()
            .unwrap();

        assert_eq!(
            invocation.escalation().steps(),
            &[EscalationStep::new(
                Signal::SIGKILL,
                Duration::from_millis(5)
            )]
        );
    }

    #[test]
    fn test_builder_signals_keep_policy_grace() {
        let invocation = Invocation::builder("true")
            .escalation(EscalationPolicy::kill_only(Duration::from_secs(9)))
            .signals([Signal::SIGTERM])
            .build()
            .unwrap();

        assert_eq!(
            invocation.escalation().steps(),
            &[EscalationStep::new(Signal::SIGTERM, Duration::from_secs(9))]
        );
    }

    #[test]
    fn test_builder_rejects_empty_signals() {
        let result = Invocation::builder("true").signals([]).build();
        assert!(matches!(result, Err(ConfigError::EmptySignalSequence)));
    }

    #[test]
    fn test_builder_rejects_zero_timeout() {
        let result = Invocation::builder("true").timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(ConfigError::NonPositiveTimeout)));
    }

    #[test]
    fn test_builder_rejects_empty_program() {
        let result = Invocation::builder("").build();
        assert!(matches!(result, Err(ConfigError::EmptyProgram)));
    }

    #[test]
    fn test_builder_env_and_cwd() {
        let invocation = Invocation::builder("sh")
            .env("A", "1")
            .env("B", "2")
            .cwd("/tmp")
            .build()
            .unwrap();

        assert_eq!(invocation.env().get("A").map(String::as_str), Some("1"));
        assert_eq!(invocation.env().len(), 2);
        assert_eq!(invocation.cwd(), Some(Path::new("/tmp")));
    }

    #[test]
    fn test_parse_env_pair() {
        assert_eq!(
            parse_env_pair("KEY=value=with=equals").unwrap(),
            ("KEY".to_string(), "value=with=equals".to_string())
        );
        assert_eq!(
            parse_env_pair("EMPTY=").unwrap(),
            ("EMPTY".to_string(), String::new())
        );
        assert!(parse_env_pair("NOEQUALS").is_err());
        assert!(parse_env_pair("=value").is_err());
    }
}
