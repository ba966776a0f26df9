//! Platform media sinks.
//!
//! A [`MediaSink`] is told about tracks as the container becomes ready and
//! hands back one [`TrackSink`] per track. Appends to a track sink are
//! exclusive: the scheduler never has more than one in flight per track.

mod channel;
mod writer;

pub use channel::{ChannelSink, SinkEvent};
pub use writer::WriterSink;

use async_trait::async_trait;
use oculux_common::Result;
use oculux_media::{DecodedTrack, MediaSegment};
use std::sync::Arc;

/// Append-only buffer for one track.
#[async_trait]
pub trait TrackSink: Send + Sync {
    /// Append one segment. Resolves when the sink has consumed it.
    async fn append(&self, segment: MediaSegment) -> Result<()>;

    /// Whether the sink is busy with work of its own (not an append).
    fn is_busy(&self) -> bool {
        false
    }
}

/// Consumer of the demuxed stream.
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Register a playable track and return its buffer.
    async fn add_track(&self, track: &DecodedTrack) -> Result<Arc<dyn TrackSink>>;

    /// Declared presentation duration, when the container has one.
    async fn set_duration(&self, duration_secs: f64) -> Result<()>;

    /// No more segments will be appended.
    async fn end_of_stream(&self) -> Result<()>;
}
