//! Core type definitions shared by the demuxer and the pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of media track, from the `hdlr` handler type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Video track (`vide`).
    Video,
    /// Audio track (`soun`).
    Audio,
    /// Anything else (subtitles, hints, metadata).
    Other,
}

impl TrackKind {
    /// Classify a four-character handler type.
    pub fn from_handler(handler: [u8; 4]) -> Self {
        match &handler {
            b"vide" => Self::Video,
            b"soun" => Self::Audio,
            _ => Self::Other,
        }
    }

    /// Whether segments of this kind can be handed to a playback sink.
    pub fn is_playable(self) -> bool {
        matches!(self, Self::Video | Self::Audio)
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Lifecycle state of a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Created, nothing started.
    Idle,
    /// Looking up the download URL and key material.
    Resolving,
    /// A fetch run is feeding the demuxer.
    Streaming,
    /// A seek superseded the live run; locating the new start frame.
    Seeking,
    /// The stream was fully delivered.
    Completed,
    /// An unrecoverable error was reported.
    Failed,
}

impl SessionState {
    /// Whether no further network activity will happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Resolving => write!(f, "resolving"),
            Self::Streaming => write!(f, "streaming"),
            Self::Seeking => write!(f, "seeking"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
