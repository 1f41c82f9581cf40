//! Error types for the measurement engine.

use thiserror::Error;

use crate::session::Verdict;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while measuring a case.
///
/// Parse and insufficient-data errors abort the current round and are never
/// retried; channel errors abort the session. A quiescence timeout is not an
/// error at all (see [`crate::quiescence::Settled::TimedOut`]).
#[derive(Error, Debug)]
pub enum Error {
    /// The heap artifact is malformed.
    #[error("malformed heap artifact: {reason}")]
    Parse { reason: String },

    /// Timeline classification needs more repeat durations.
    #[error("timeline needs at least {required} step durations, got {actual}")]
    InsufficientSteps { required: usize, actual: usize },

    /// A classifier was given too few per-step or per-snapshot results.
    #[error("leak classification needs at least 2 results, got {actual}")]
    InsufficientResults { actual: usize },

    /// The instrumentation channel is unreachable or misbehaved.
    #[error("instrumentation channel error: {reason}")]
    Channel { reason: String },

    /// The measured action itself failed.
    #[error("measured action failed: {reason}")]
    Action { reason: String },

    /// Configuration is invalid.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// The final verdict of a session is a leak.
    #[error(
        "memory leak detected in '{}': {:.2} KB per step",
        verdict.case,
        verdict.leak_size_kb
    )]
    LeakDetected { verdict: Box<Verdict> },

    /// File or JSON plumbing error.
    #[error(transparent)]
    Core(#[from] sealant_core::Error),
}

impl Error {
    /// Create a parse error.
    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse {
            reason: reason.into(),
        }
    }

    /// Create a channel error.
    pub fn channel(reason: impl Into<String>) -> Self {
        Self::Channel {
            reason: reason.into(),
        }
    }

    /// Create an action error.
    pub fn action(reason: impl Into<String>) -> Self {
        Self::Action {
            reason: reason.into(),
        }
    }

    /// Create a config error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a leak-detected error carrying the final verdict.
    pub fn leak_detected(verdict: Verdict) -> Self {
        Self::LeakDetected {
            verdict: Box::new(verdict),
        }
    }

    /// The verdict carried by a leak failure, if this is one.
    pub fn verdict(&self) -> Option<&Verdict> {
        match self {
            Self::LeakDetected { verdict } => Some(verdict),
            _ => None,
        }
    }

    /// Whether this error ends the session rather than just the round.
    pub const fn is_fatal_to_session(&self) -> bool {
        matches!(self, Self::Channel { .. } | Self::Config { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string())
    }
}
