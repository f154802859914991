//! Signal names and parsing.
//!
//! Signals are accepted as `SIGTERM`, `TERM`, `term` or the raw number
//! (`15`) so that configuration files and command lines can use whichever
//! spelling is natural.

use std::str::FromStr;

use nix::sys::signal::Signal;

use crate::error::ConfigError;

/// Parses a signal from a name or number.
///
/// # Errors
///
/// Returns `ConfigError::UnknownSignal` if the input names no signal known
/// to this platform.
pub fn parse_signal(input: &str) -> Result<Signal, ConfigError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::UnknownSignal(input.to_string()));
    }

    if let Ok(number) = trimmed.parse::<i32>() {
        return Signal::try_from(number).map_err(|_| ConfigError::UnknownSignal(input.to_string()));
    }

    let upper = trimmed.to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| ConfigError::UnknownSignal(input.to_string()))
}

/// Returns the conventional name for a raw signal number.
///
/// Numbers without a named `Signal` (real-time signals, for instance) are
/// rendered as `SIG<n>`.
#[must_use]
pub fn signal_name(raw: i32) -> String {
    Signal::try_from(raw).map_or_else(|_| format!("SIG{raw}"), |s| s.as_str().to_string())
}

/// Serde adapter storing a [`Signal`] by name.
pub(crate) mod serde_signal {
    use nix::sys::signal::Signal;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(signal: &Signal, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(signal.as_str())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Signal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        super::parse_signal(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter storing a list of [`Signal`]s by name.
pub(crate) mod serde_signal_list {
    use nix::sys::signal::Signal;
    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(signals: &[Signal], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(signals.len()))?;
        for signal in signals {
            seq.serialize_element(signal.as_str())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Signal>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Vec::<String>::deserialize(deserializer)?
            .iter()
            .map(|s| super::parse_signal(s).map_err(serde::de::Error::custom))
            .collect()
    }
}
