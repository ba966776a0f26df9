//! Typed ID wrappers.
//!
//! Track IDs come from the container (`tkhd.track_ID`) and are therefore
//! plain integers; session IDs are generated per playback session and only
//! used to correlate log lines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a media track inside the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(u32);

impl TrackId {
    /// Wrap a raw container track ID.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw container track ID.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl From<u32> for TrackId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<TrackId> for u32 {
    fn from(id: TrackId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for one playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_id_roundtrip() {
        let id = TrackId::from(7);
        assert_eq!(id.get(), 7);
        assert_eq!(u32::from(id), 7);
        assert_eq!(id.to_string(), "7");
    }

    #[test]
    fn test_track_id_serializes_transparently() {
        let json = serde_json::to_string(&TrackId::new(2)).unwrap();
        assert_eq!(json, "2");
    }

    #[test]
    fn test_session_ids_are_unique() {
        assert_ne!(SessionId::new(), SessionId::new());
    }
}
