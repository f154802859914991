//! Error types for supervised runs.
//!
//! Only failures that prevent a run from starting, or that leave the child's
//! status uncollectable, are errors. A child that times out, or even one that
//! survives every escalation signal, produces a regular
//! [`Disposition`](crate::Disposition).

use std::io;

use thiserror::Error;

use crate::report::{EXIT_CANNOT_EXECUTE, EXIT_CONFIG, EXIT_NOT_FOUND, EXIT_UNKILLABLE};

/// An invocation or configuration file was rejected.
///
/// Always raised before any process is spawned.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The program path is empty.
    #[error("program must not be empty")]
    EmptyProgram,

    /// The escalation sequence has no steps.
    #[error("escalation sequence must contain at least one signal")]
    EmptySignalSequence,

    /// The total timeout is zero.
    #[error("timeout must be greater than zero")]
    NonPositiveTimeout,

    /// A signal name or number could not be resolved.
    #[error("unknown signal: {0}")]
    UnknownSignal(String),

    /// An environment override was not of the form `KEY=VALUE`.
    #[error("invalid environment override {0:?}: expected KEY=VALUE")]
    InvalidEnv(String),

    /// A log level or filter directive was not understood.
    #[error("invalid log level {level:?}: {reason}")]
    InvalidLogLevel {
        /// The rejected value.
        level: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] io::Error),

    /// The configuration file is not valid TOML or has unknown keys.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered back to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Errors returned by [`supervise`](crate::supervise) and friends.
#[derive(Debug, Error)]
pub enum SuperviseError {
    /// The executable could not be spawned. Never retried.
    #[error("failed to launch {program}: {source}")]
    Launch {
        /// Program as given in the invocation.
        program: String,
        /// Underlying spawn failure.
        #[source]
        source: io::Error,
    },

    /// The invocation was rejected before spawning.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Waiting on the child failed after it was spawned.
    #[error("failed to reap child {pid}: {source}")]
    Reap {
        /// PID of the child whose status was lost.
        pid: u32,
        /// Underlying wait failure.
        #[source]
        source: io::Error,
    },
}

impl SuperviseError {
    /// Returns `true` if the program does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Launch { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }

    /// Returns `true` if the program exists but could not be executed.
    #[must_use]
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self,
            Self::Launch { source, .. } if source.kind() == io::ErrorKind::PermissionDenied
        )
    }

    /// Exit status a wrapper process should terminate with for this error.
    ///
    /// - not found: 127
    /// - any other launch failure: 126
    /// - configuration: 2
    /// - reap failure: 125, since the child's fate is unknown
    #[must_use]
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::Launch { .. } if self.is_not_found() => EXIT_NOT_FOUND,
            Self::Launch { .. } => EXIT_CANNOT_EXECUTE,
            Self::Config(_) => EXIT_CONFIG,
            Self::Reap { .. } => EXIT_UNKILLABLE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_error(kind: io::ErrorKind) -> SuperviseError {
        SuperviseError::Launch {
            program: "prog".to_string(),
            source: io::Error::new(kind, "boom"),
        }
    }

    #[test]
    fn test_launch_not_found() {
        let err = launch_error(io::ErrorKind::NotFound);
        assert!(err.is_not_found());
        assert!(!err.is_permission_denied());
        assert_eq!(err.exit_status(), 127);
    }

    #[test]
    fn test_launch_permission_denied() {
        let err = launch_error(io::ErrorKind::PermissionDenied);
        assert!(err.is_permission_denied());
        assert_eq!(err.exit_status(), 126);
    }

    #[test]
    fn test_config_error_exit_status() {
        let err = SuperviseError::from(ConfigError::EmptySignalSequence);
        assert_eq!(err.exit_status(), 2);
        assert_eq!(
            err.to_string(),
            "escalation sequence must contain at least one signal"
        );
    }

    #[test]
    fn test_reap_error_display() {
        let err = SuperviseError::Reap {
            pid: 42,
            source: io::Error::other("no children"),
        };
        assert_eq!(err.to_string(), "failed to reap child 42: no children");
        assert_eq!(err.exit_status(), 125);
    }
}
