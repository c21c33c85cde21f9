//! Error types for loopwatch operations.
//! Configuration errors always name the field (or the callback) at fault.

use std::fmt;
use std::path::PathBuf;

// ═══════════════════════════════════════════════════════════════════════════════
// Configuration Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// The configuration field a validation error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    Interval,
    Threshold,
}

impl ConfigField {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigField::Interval => "interval",
            ConfigField::Threshold => "threshold",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a millisecond value was rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueProblem {
    Missing,
    NotANumber(String),
    NotFinite,
    NotPositive(f64),
    TooLarge(f64),
}

impl fmt::Display for ValueProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueProblem::Missing => f.write_str("value is missing"),
            ValueProblem::NotANumber(text) => write!(f, "{:?} is not a number", text),
            ValueProblem::NotFinite => f.write_str("value is not finite"),
            ValueProblem::NotPositive(value) => write!(f, "{} is not positive", value),
            ValueProblem::TooLarge(value) => {
                write!(f, "{} exceeds the maximum of {}", value, crate::config::MAX_MILLIS)
            }
        }
    }
}

/// All errors that can occur while building a watchdog configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {field}: {problem}")]
    InvalidValue {
        field: ConfigField,
        problem: ValueProblem,
    },

    #[error("callback must be a function")]
    MissingCallback,

    #[error("Configuration file malformed: {path}: {details}")]
    Malformed { path: PathBuf, details: String },

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: ConfigField, problem: ValueProblem) -> Self {
        ConfigError::InvalidValue { field, problem }
    }

    /// The field this error is attributed to, if it concerns a single field.
    pub fn field(&self) -> Option<ConfigField> {
        match self {
            ConfigError::InvalidValue { field, .. } => Some(*field),
            _ => None,
        }
    }

    /// True when the error is about the callback rather than a value.
    pub fn is_callback(&self) -> bool {
        matches!(self, ConfigError::MissingCallback)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lifecycle Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Errors surfaced by the watchdog entry points.
///
/// The core `start` reports an already-running watchdog as `Ok(false)`;
/// only the validating [`crate::install`] wrapper turns it into
/// [`WatchdogError::AlreadyRunning`].
#[derive(Debug, thiserror::Error)]
pub enum WatchdogError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("attempted to start the watchdog twice")]
    AlreadyRunning,

    #[error("failed to spawn monitor thread: {source}")]
    Spawn {
        #[source]
        source: std::io::Error,
    },
}

/// Convenience type alias for Results using WatchdogError.
pub type Result<T> = std::result::Result<T, WatchdogError>;
