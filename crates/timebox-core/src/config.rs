//! Configuration file parsing.
//!
//! An optional TOML file supplies defaults for every supervised run:
//!
//! ```toml
//! [supervision]
//! timeout = "30s"
//! on_unkillable = "watch"
//!
//! [[supervision.escalation]]
//! signal = "SIGTERM"
//! grace = "3s"
//!
//! [[supervision.escalation]]
//! signal = "SIGKILL"
//! grace = "1s"
//!
//! [log]
//! level = "info"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::escalation::EscalationPolicy;
use crate::invocation::{
    DEFAULT_TIMEOUT, Invocation, InvocationBuilder, StdioMode, UnkillablePolicy,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeboxConfig {
    /// Defaults for supervised runs.
    #[serde(default)]
    pub supervision: SupervisionConfig,

    /// Logging configuration.
    #[serde(default)]
    pub log: LogConfig,
}

impl TimeboxConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, a key is unknown, a signal
    /// name is not recognised or the escalation sequence is empty.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        if config.supervision.timeout.is_zero() {
            return Err(ConfigError::NonPositiveTimeout);
        }
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

const fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

/// Defaults applied to every [`Invocation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SupervisionConfig {
    /// Total timeout before escalation starts.
    #[serde(default = "default_timeout")]
    #[serde(with = "crate::humantime_serde")]
    pub timeout: Duration,

    /// Handling of a child that survives every signal.
    #[serde(default)]
    pub on_unkillable: UnkillablePolicy,

    /// Output handling for the child.
    #[serde(default)]
    pub stdio: StdioMode,

    /// Working directory for the child.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Escalation steps. Kept last so TOML renders it as trailing tables.
    #[serde(default)]
    pub escalation: EscalationPolicy,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            on_unkillable: UnkillablePolicy::default(),
            stdio: StdioMode::default(),
            cwd: None,
            escalation: EscalationPolicy::default(),
        }
    }
}

impl SupervisionConfig {
    /// Starts an invocation of `program` pre-filled with these defaults.
    pub fn invocation(&self, program: impl Into<PathBuf>) -> InvocationBuilder {
        let builder = Invocation::builder(program)
            .timeout(self.timeout)
            .escalation(self.escalation.clone())
            .on_unkillable(self.on_unkillable)
            .stdio(self.stdio);
        match &self.cwd {
            Some(cwd) => builder.cwd(cwd),
            None => builder,
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    /// Filter directive (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use nix::sys::signal::Signal;

    use super::*;
    use crate::escalation::EscalationStep;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = TimeboxConfig::from_toml("").unwrap();
        assert_eq!(config, TimeboxConfig::default());
        assert_eq!(config.supervision.timeout, Duration::from_secs(30));
        assert_eq!(config.log.level, "warn");
    }

    #[test]
    fn test_parse_full_config() {
        let config = TimeboxConfig::from_toml(
            r#"
            [supervision]
            timeout = "1s 500ms"
            on_unkillable = "watch"
            stdio = "null"
            cwd = "/tmp"

            [[supervision.escalation]]
            signal = "INT"
            grace = "100ms"

            [[supervision.escalation]]
            signal = "9"
            grace = "50ms"

            [log]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.supervision.timeout, Duration::from_millis(1500));
        assert_eq!(config.supervision.on_unkillable, UnkillablePolicy::Watch);
        assert_eq!(config.supervision.stdio, StdioMode::Null);
        assert_eq!(
            config.supervision.escalation.steps(),
            &[
                EscalationStep::new(Signal::SIGINT, Duration::from_millis(100)),
                EscalationStep::new(Signal::SIGKILL, Duration::from_millis(50)),
            ]
        );
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let result = TimeboxConfig::from_toml("[supervision]\ntimout = \"1s\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_rejects_unknown_signal() {
        let result = TimeboxConfig::from_toml(
            "[[supervision.escalation]]\nsignal = \"SIGNOPE\"\n",
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("unknown signal: SIGNOPE"));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = TimeboxConfig::from_toml("[supervision]\ntimeout = \"0s\"\n");
        assert!(matches!(result, Err(ConfigError::NonPositiveTimeout)));
    }

    #[test]
    fn test_round_trip_toml() {
        let mut config = TimeboxConfig::default();
        config.supervision.escalation = EscalationPolicy::kill_only(Duration::from_millis(250));
        config.supervision.on_unkillable = UnkillablePolicy::Watch;

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("SIGKILL"));
        assert!(rendered.contains("250ms"));
        assert_eq!(TimeboxConfig::from_toml(&rendered).unwrap(), config);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[supervision]\ntimeout = \"2s\"").unwrap();

        let config = TimeboxConfig::from_file(file.path()).unwrap();
        assert_eq!(config.supervision.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_from_missing_file() {
        let result = TimeboxConfig::from_file(Path::new("/nonexistent/timebox.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_invocation_from_config() {
        let config = SupervisionConfig {
            timeout: Duration::from_millis(700),
            on_unkillable: UnkillablePolicy::Watch,
            stdio: StdioMode::Null,
            cwd: Some(PathBuf::from("/tmp")),
            escalation: EscalationPolicy::kill_only(Duration::from_millis(20)),
        };

        let invocation = config.invocation("sleep").arg("1").build().unwrap();
        assert_eq!(invocation.timeout(), Duration::from_millis(700));
        assert_eq!(invocation.escalation().ceiling(), 1);
        assert_eq!(invocation.on_unkillable(), UnkillablePolicy::Watch);
        assert_eq!(invocation.stdio(), StdioMode::Null);
        assert_eq!(invocation.cwd(), Some(Path::new("/tmp")));
    }
}
