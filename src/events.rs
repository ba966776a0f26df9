//! Session event bus.
//!
//! [`SessionEvents`] wraps a `tokio::sync::broadcast` channel with a bounded
//! ring of recent events so a player that subscribes late still sees
//! `ReadyToPlay`.

use chrono::{DateTime, Utc};
use oculux_common::{ErrorKind, SessionId, SessionState};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Maximum number of events retained in the ring buffer.
const MAX_RECENT_EVENTS: usize = 100;

/// Where the player should read media from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PlaybackSource {
    /// Unencrypted object; play the URL natively.
    Direct { url: String },
    /// Segments arrive through the session's sink.
    Pipeline,
}

/// What happened in a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    ReadyToPlay { source: PlaybackSource },
    StateChanged { state: SessionState },
    Error { kind: ErrorKind, message: String },
    Completed,
}

/// A timestamped session event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub session: SessionId,
    pub payload: SessionEvent,
}

impl Event {
    pub fn new(session: SessionId, payload: SessionEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            session,
            payload,
        }
    }
}

/// Broadcast channel with a bounded ring buffer of recent events.
pub struct SessionEvents {
    tx: broadcast::Sender<Event>,
    recent: RwLock<VecDeque<Event>>,
}

impl SessionEvents {
    /// `capacity` sizes the broadcast buffer, not the ring.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            recent: RwLock::new(VecDeque::with_capacity(MAX_RECENT_EVENTS)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn emit(&self, session: SessionId, payload: SessionEvent) {
        let event = Event::new(session, payload);
        tracing::debug!(%session, payload = ?event.payload, "Session event");

        {
            let mut recent = self.recent.write();
            if recent.len() >= MAX_RECENT_EVENTS {
                recent.pop_back();
            }
            recent.push_front(event.clone());
        }

        // No subscribers is fine.
        let _ = self.tx.send(event);
    }

    /// The `n` most recent events, newest first.
    pub fn recent_events(&self, n: usize) -> Vec<Event> {
        self.recent.read().iter().take(n).cloned().collect()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_receive() {
        let events = SessionEvents::new(16);
        let mut rx = events.subscribe();
        let session = SessionId::new();

        events.emit(
            session,
            SessionEvent::ReadyToPlay {
                source: PlaybackSource::Pipeline,
            },
        );

        let event = rx.try_recv().unwrap();
        assert_eq!(event.session, session);
        assert_eq!(
            event.payload,
            SessionEvent::ReadyToPlay {
                source: PlaybackSource::Pipeline
            }
        );
    }

    #[test]
    fn recent_events_capped_newest_first() {
        let events = SessionEvents::default();
        let session = SessionId::new();
        for _ in 0..150 {
            events.emit(
                session,
                SessionEvent::StateChanged {
                    state: SessionState::Streaming,
                },
            );
        }
        events.emit(session, SessionEvent::Completed);

        assert_eq!(events.recent_events(200).len(), MAX_RECENT_EVENTS);
        assert_eq!(events.recent_events(1)[0].payload, SessionEvent::Completed);
    }

    #[test]
    fn payload_json_shape() {
        let json = serde_json::to_value(SessionEvent::Error {
            kind: ErrorKind::Decrypt,
            message: "bad tag".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["kind"], "decrypt");

        let json = serde_json::to_value(SessionEvent::ReadyToPlay {
            source: PlaybackSource::Direct {
                url: "https://p/download/x".into(),
            },
        })
        .unwrap();
        assert_eq!(json["type"], "ready_to_play");
        assert_eq!(json["source"]["mode"], "direct");
    }
}
