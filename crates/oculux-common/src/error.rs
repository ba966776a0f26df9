//! Session error taxonomy.
//!
//! Every failure a playback session can surface falls into one of the
//! [`ErrorKind`] classes. Only transport and timeout failures are retried;
//! everything else is fatal to the session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Failure class reported upward with a session error event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Locator invalid, unauthorized, or not found.
    Resolution,
    /// Bad status or malformed response from a storage provider.
    Transport,
    /// A body read stalled past the read timeout.
    Timeout,
    /// Corrupt frame length header.
    Framing,
    /// AES-GCM authentication failure.
    Decrypt,
    /// No playable tracks, or the demuxer or sink rejected data.
    Container,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolution => write!(f, "resolution"),
            Self::Transport => write!(f, "transport"),
            Self::Timeout => write!(f, "timeout"),
            Self::Framing => write!(f, "framing"),
            Self::Decrypt => write!(f, "decrypt"),
            Self::Container => write!(f, "container"),
        }
    }
}

/// Common error type for oculux.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The locator could not be resolved to a playable record.
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// The storage provider answered with something unusable.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A single body read did not complete in time.
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    /// A frame header did not parse as a non-negative decimal length.
    #[error("Framing error: {0}")]
    Framing(String),

    /// A frame failed authentication.
    #[error("Decrypt error: {0}")]
    Decrypt(String),

    /// The decrypted stream is not playable.
    #[error("Container error: {0}")]
    Container(String),
}

impl Error {
    /// Create a new Resolution error.
    pub fn resolution<S: Into<String>>(msg: S) -> Self {
        Self::Resolution(msg.into())
    }

    /// Create a new Transport error.
    pub fn transport<S: Into<String>>(msg: S) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a new Framing error.
    pub fn framing<S: Into<String>>(msg: S) -> Self {
        Self::Framing(msg.into())
    }

    /// Create a new Decrypt error.
    pub fn decrypt<S: Into<String>>(msg: S) -> Self {
        Self::Decrypt(msg.into())
    }

    /// Create a new Container error.
    pub fn container<S: Into<String>>(msg: S) -> Self {
        Self::Container(msg.into())
    }

    /// The failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution(_) => ErrorKind::Resolution,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Framing(_) => ErrorKind::Framing,
            Self::Decrypt(_) => ErrorKind::Decrypt,
            Self::Container(_) => ErrorKind::Container,
        }
    }

    /// Whether the fetch loop may retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transport | ErrorKind::Timeout)
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
