use super::{MediaSink, TrackSink};
use async_trait::async_trait;
use oculux_common::{Error, Result, TrackId};
use oculux_media::{DecodedTrack, MediaSegment};
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

/// Writes one track's segments to an [`AsyncWrite`].
///
/// The init segment followed by the media segments of a single track form
/// a playable fragmented MP4, so the output can be piped into a player or
/// saved as a file. Segments of all other tracks are discarded.
pub struct WriterSink<W> {
    writer: Arc<tokio::sync::Mutex<W>>,
    wanted: Option<TrackId>,
    selected: watch::Sender<Option<TrackId>>,
}

impl<W> WriterSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    /// Write the track `wanted`, or the first registered track when `None`.
    pub fn new(writer: W, wanted: Option<TrackId>) -> Self {
        Self {
            writer: Arc::new(tokio::sync::Mutex::new(writer)),
            wanted,
            selected: watch::channel(None).0,
        }
    }

    /// The track being written, once chosen.
    pub fn selected(&self) -> Option<TrackId> {
        *self.selected.borrow()
    }

    /// Changes to [`selected`](Self::selected), for waiting until the
    /// container has been parsed.
    pub fn watch_selected(&self) -> watch::Receiver<Option<TrackId>> {
        self.selected.subscribe()
    }
}

struct WriterTrack<W> {
    writer: Arc<tokio::sync::Mutex<W>>,
}

#[async_trait]
impl<W> TrackSink for WriterTrack<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn append(&self, segment: MediaSegment) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&segment.data)
            .await
            .map_err(|e| Error::container(format!("failed to write segment: {e}")))
    }
}

struct DiscardTrack;

#[async_trait]
impl TrackSink for DiscardTrack {
    async fn append(&self, _segment: MediaSegment) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl<W> MediaSink for WriterSink<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn add_track(&self, track: &DecodedTrack) -> Result<Arc<dyn TrackSink>> {
        let chosen = self.selected.send_if_modified(|selected| {
            let matches = match self.wanted {
                Some(wanted) => wanted == track.id,
                None => selected.is_none(),
            };
            if matches {
                *selected = Some(track.id);
            }
            matches
        });

        if chosen {
            tracing::info!(track = %track.id, codec = %track.codec, "Writing track");
            Ok(Arc::new(WriterTrack {
                writer: self.writer.clone(),
            }))
        } else {
            tracing::debug!(track = %track.id, "Discarding track");
            Ok(Arc::new(DiscardTrack))
        }
    }

    async fn set_duration(&self, duration_secs: f64) -> Result<()> {
        tracing::debug!(duration_secs, "Stream duration");
        Ok(())
    }

    async fn end_of_stream(&self) -> Result<()> {
        if self.selected().is_none() {
            return Err(Error::container(match self.wanted {
                Some(id) => format!("track {id} not found"),
                None => "no track to write".to_string(),
            }));
        }
        let mut writer = self.writer.lock().await;
        writer
            .flush()
            .await
            .map_err(|e| Error::container(format!("failed to flush output: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use oculux_common::TrackKind;
    use oculux_media::SegmentKind;

    fn track(id: u32, kind: TrackKind) -> DecodedTrack {
        DecodedTrack {
            id: TrackId::new(id),
            kind,
            codec: "x".into(),
            timescale: 1000,
            duration: 0,
        }
    }

    fn segment(id: u32, data: &'static [u8]) -> MediaSegment {
        MediaSegment {
            track: TrackId::new(id),
            kind: SegmentKind::Media,
            data: Bytes::from_static(data),
            start_secs: 0.0,
        }
    }

    #[tokio::test]
    async fn test_writes_first_track_by_default() {
        let sink = WriterSink::new(Vec::new(), None);
        let video = sink.add_track(&track(1, TrackKind::Video)).await.unwrap();
        let audio = sink.add_track(&track(2, TrackKind::Audio)).await.unwrap();

        video.append(segment(1, b"vv")).await.unwrap();
        audio.append(segment(2, b"aa")).await.unwrap();
        video.append(segment(1, b"VV")).await.unwrap();
        sink.end_of_stream().await.unwrap();

        assert_eq!(sink.selected(), Some(TrackId::new(1)));
        assert_eq!(&*sink.writer.lock().await, b"vvVV");
    }

    #[tokio::test]
    async fn test_writes_requested_track() {
        let sink = WriterSink::new(Vec::new(), Some(TrackId::new(2)));
        let video = sink.add_track(&track(1, TrackKind::Video)).await.unwrap();
        let audio = sink.add_track(&track(2, TrackKind::Audio)).await.unwrap();

        video.append(segment(1, b"vv")).await.unwrap();
        audio.append(segment(2, b"aa")).await.unwrap();

        assert_eq!(&*sink.writer.lock().await, b"aa");
    }

    #[tokio::test]
    async fn test_selection_wakes_watchers() {
        let sink = Arc::new(WriterSink::new(Vec::new(), Some(TrackId::new(2))));
        let mut selected = sink.watch_selected();
        let waiter = tokio::spawn(async move {
            *selected.wait_for(Option::is_some).await.unwrap()
        });

        sink.add_track(&track(1, TrackKind::Video)).await.unwrap();
        assert!(!waiter.is_finished());
        sink.add_track(&track(2, TrackKind::Audio)).await.unwrap();

        assert_eq!(waiter.await.unwrap(), Some(TrackId::new(2)));
    }

    #[tokio::test]
    async fn test_missing_track_fails_at_end() {
        let sink = WriterSink::new(Vec::new(), Some(TrackId::new(9)));
        sink.add_track(&track(1, TrackKind::Video)).await.unwrap();
        assert!(matches!(sink.end_of_stream().await, Err(Error::Container(_))));
    }
}
