//! Error types for the DevTools channel.

use thiserror::Error;

/// Result type for DevTools operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while talking to a DevTools endpoint.
#[derive(Error, Debug)]
pub enum Error {
    /// The `/json` listing could not be fetched or read.
    #[error("discovery at {url} failed: {reason}")]
    DiscoveryFailed { url: String, reason: String },

    /// The listing has no entry with a debugger URL.
    #[error("no debuggable target listed at {url}")]
    NoTargets { url: String },

    /// The WebSocket handshake failed.
    #[error("connection to {url} failed: {reason}")]
    ConnectionFailed { url: String, reason: String },

    /// A frame could not be written.
    #[error("send failed: {reason}")]
    SendFailed { reason: String },

    /// The channel closed before a response arrived.
    #[error("channel closed")]
    Closed,

    /// No response within the command timeout.
    #[error("'{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    /// The runtime answered with an error.
    #[error("'{method}' failed: {message} (code {code})")]
    Protocol {
        method: String,
        code: i64,
        message: String,
    },

    /// A page expression threw.
    #[error("evaluation threw: {reason}")]
    EvaluationFailed { reason: String },

    /// A frame could not be decoded.
    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    /// URL parse error.
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a discovery failed error.
    pub fn discovery_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DiscoveryFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection failed error.
    pub fn connection_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a send failed error.
    pub fn send_failed(reason: impl Into<String>) -> Self {
        Self::SendFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid frame error.
    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame {
            reason: reason.into(),
        }
    }

    /// Whether the channel can no longer be used.
    pub const fn is_disconnect(&self) -> bool {
        matches!(self, Self::Closed | Self::SendFailed { .. })
    }
}

impl From<Error> for sealant_engine::Error {
    fn from(err: Error) -> Self {
        Self::channel(err.to_string())
    }
}
