//! Severity levels for reported occurrences.
//!
//! Levels are ordered from least to most severe so that a configured
//! threshold can gate submissions: anything that compares below the
//! threshold is dropped before it reaches the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a reported occurrence.
///
/// Ordering is `Debug < Info < Warning < Error < Critical`, matching the
/// submission gate semantics: a notifier configured with a `Warning`
/// threshold drops `Debug` and `Info` reports at submission time.
///
/// The wire representation is the lowercase level name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Diagnostic detail, lowest severity.
    Debug,
    /// Normal but notable events.
    Info,
    /// Hazardous situations that may lead to errors.
    Warning,
    /// Errors that should be investigated.
    Error,
    /// Failures that require immediate attention.
    Critical,
}

impl Level {
    /// Lowercase wire name of the level.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warning" => Ok(Level::Warning),
            "error" => Ok(Level::Error),
            "critical" => Ok(Level::Critical),
            _ => Err(format!(
                "Invalid level: '{s}'. Valid levels are: debug, info, warning, error, critical",
            )),
        }
    }
}
