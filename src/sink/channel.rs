use super::{MediaSink, TrackSink};
use async_trait::async_trait;
use oculux_common::{Error, Result, TrackId};
use oculux_media::{DecodedTrack, MediaSegment};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Everything a [`ChannelSink`] forwards.
#[derive(Debug, Clone)]
pub enum SinkEvent {
    TrackAdded(DecodedTrack),
    Duration(f64),
    Segment(MediaSegment),
    EndOfStream,
}

/// Sink that forwards every call into a bounded channel.
///
/// A full channel holds the append open, so a slow consumer throttles the
/// scheduler and through it the fetch loop.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<SinkEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SinkEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, event: SinkEvent) -> Result<()> {
        forward(&self.tx, event).await
    }
}

async fn forward(tx: &mpsc::Sender<SinkEvent>, event: SinkEvent) -> Result<()> {
    tx.send(event)
        .await
        .map_err(|_| Error::container("media sink receiver closed"))
}

struct ChannelTrack {
    track: TrackId,
    tx: mpsc::Sender<SinkEvent>,
}

#[async_trait]
impl TrackSink for ChannelTrack {
    async fn append(&self, segment: MediaSegment) -> Result<()> {
        debug_assert_eq!(segment.track, self.track);
        forward(&self.tx, SinkEvent::Segment(segment)).await
    }
}

#[async_trait]
impl MediaSink for ChannelSink {
    async fn add_track(&self, track: &DecodedTrack) -> Result<Arc<dyn TrackSink>> {
        self.send(SinkEvent::TrackAdded(track.clone())).await?;
        Ok(Arc::new(ChannelTrack {
            track: track.id,
            tx: self.tx.clone(),
        }))
    }

    async fn set_duration(&self, duration_secs: f64) -> Result<()> {
        self.send(SinkEvent::Duration(duration_secs)).await
    }

    async fn end_of_stream(&self) -> Result<()> {
        self.send(SinkEvent::EndOfStream).await
    }
}
