//! Error types for oculux-media.

use thiserror::Error;

/// Result type for oculux-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for oculux-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid MP4 structure.
    #[error("Invalid MP4: {0}")]
    InvalidMp4(String),

    /// Missing required atom.
    #[error("Missing required atom: {0}")]
    MissingAtom(&'static str),

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Box content shorter than its fields require.
    #[error("Buffer underflow: need {need} bytes, have {have}")]
    BufferUnderflow { need: usize, have: usize },
}

impl Error {
    /// Create an invalid MP4 error.
    pub fn invalid_mp4(msg: impl Into<String>) -> Self {
        Self::InvalidMp4(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }
}

impl From<Error> for oculux_common::Error {
    fn from(err: Error) -> Self {
        oculux_common::Error::container(err.to_string())
    }
}
