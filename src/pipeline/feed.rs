//! Bridges decrypted bytes into the demuxer and its output into the
//! track scheduler.

use super::scheduler::TrackScheduler;
use crate::sink::MediaSink;
use oculux_common::{Error, Result};
use oculux_media::{DecodedTrack, DemuxEvent, Demuxer, MediaSegment, MovieInfo, SegmentOptions};
use std::sync::Arc;

/// Container feed adapter.
///
/// Owns the demuxer for a session. Plaintext is appended at explicit
/// decoded offsets; once the demuxer reports the movie ready, playable
/// tracks are registered with the sink and scheduler and segmentation
/// starts, init segments first.
pub struct FeedAdapter {
    demuxer: Box<dyn Demuxer>,
    sink: Arc<dyn MediaSink>,
    scheduler: TrackScheduler,
    options: SegmentOptions,
    tracks: Vec<DecodedTrack>,
    ready: bool,
    next_offset: u64,
}

impl FeedAdapter {
    pub fn new(
        demuxer: Box<dyn Demuxer>,
        sink: Arc<dyn MediaSink>,
        scheduler: TrackScheduler,
        options: SegmentOptions,
    ) -> Self {
        Self {
            demuxer,
            sink,
            scheduler,
            options,
            tracks: Vec::new(),
            ready: false,
            next_offset: 0,
        }
    }

    /// Append decrypted bytes that start at `decoded_offset`.
    pub async fn feed(&mut self, plaintext: &[u8], decoded_offset: u64) -> Result<()> {
        let events = self.demuxer.append(plaintext, decoded_offset)?;
        self.next_offset = decoded_offset + plaintext.len() as u64;

        for event in events {
            match event {
                DemuxEvent::Ready(info) => self.on_ready(info).await?,
                DemuxEvent::Segment(segment) => self.enqueue(segment),
            }
        }
        Ok(())
    }

    async fn on_ready(&mut self, info: MovieInfo) -> Result<()> {
        if info.tracks.is_empty() {
            return Err(Error::container("no tracks found"));
        }

        for track in &info.tracks {
            if !track.kind.is_playable() {
                tracing::info!(track = %track.id, codec = %track.codec, "Skipping non-media track");
                continue;
            }
            self.demuxer.set_segment_options(track.id, self.options);
            let sink = self.sink.add_track(track).await?;
            self.scheduler.add_track(track.id, sink);
            tracing::info!(
                track = %track.id,
                kind = ?track.kind,
                mime = %track.mime_type(),
                "Track registered"
            );
            self.tracks.push(track.clone());
        }

        if self.tracks.is_empty() {
            return Err(Error::container("no audio or video tracks found"));
        }

        if let Some(duration) = info.duration_secs() {
            self.sink.set_duration(duration).await?;
        }

        self.ready = true;
        for segment in self.demuxer.initialize_segmentation()? {
            self.enqueue(segment);
        }
        Ok(())
    }

    fn enqueue(&self, segment: MediaSegment) {
        let track = segment.track;
        tracing::trace!(
            %track,
            kind = ?segment.kind,
            bytes = segment.data.len(),
            start_secs = segment.start_secs,
            "Segment ready"
        );
        self.scheduler.enqueue(track, segment);
        self.scheduler.drain_if_idle(track);
    }

    /// No more bytes will arrive for the current range.
    pub fn flush(&mut self) -> Result<()> {
        for segment in self.demuxer.flush()? {
            self.enqueue(segment);
        }
        Ok(())
    }

    /// Decoded offset to resume from for `time_secs`, from the demuxer's
    /// seek table. Resets the demuxer's buffered state.
    pub fn seek_offset(&mut self, time_secs: f64) -> Option<u64> {
        self.demuxer.seek(time_secs)
    }

    /// Note that feeding resumes at `decoded_offset`.
    pub fn restart_at(&mut self, decoded_offset: u64) {
        tracing::debug!(from = self.next_offset, to = decoded_offset, "Feed restarting");
        self.next_offset = decoded_offset;
    }

    /// Decoded offset the next fed byte is expected at.
    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Playable tracks, once ready.
    pub fn tracks(&self) -> &[DecodedTrack] {
        &self.tracks
    }

    pub fn scheduler(&self) -> &TrackScheduler {
        &self.scheduler
    }

    pub fn sink(&self) -> &Arc<dyn MediaSink> {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{ChannelSink, SinkEvent};
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use oculux_common::{TrackId, TrackKind};
    use oculux_media::SegmentKind;

    /// Demuxer that replays scripted events, one batch per append.
    #[derive(Default)]
    struct ScriptedDemuxer {
        batches: Vec<Vec<DemuxEvent>>,
        init: Vec<MediaSegment>,
        appended: Vec<(Vec<u8>, u64)>,
        configured: Vec<TrackId>,
    }

    impl Demuxer for ScriptedDemuxer {
        fn append(&mut self, chunk: &[u8], offset: u64) -> oculux_media::Result<Vec<DemuxEvent>> {
            self.appended.push((chunk.to_vec(), offset));
            Ok(if self.batches.is_empty() {
                Vec::new()
            } else {
                self.batches.remove(0)
            })
        }

        fn set_segment_options(&mut self, track: TrackId, _options: SegmentOptions) {
            self.configured.push(track);
        }

        fn initialize_segmentation(&mut self) -> oculux_media::Result<Vec<MediaSegment>> {
            Ok(std::mem::take(&mut self.init))
        }

        fn seek(&mut self, time_secs: f64) -> Option<u64> {
            (time_secs > 0.0).then_some(4096)
        }

        fn flush(&mut self) -> oculux_media::Result<Vec<MediaSegment>> {
            Ok(Vec::new())
        }
    }

    fn track(id: u32, kind: TrackKind) -> DecodedTrack {
        DecodedTrack {
            id: TrackId::new(id),
            kind,
            codec: "avc1.64001f".into(),
            timescale: 1000,
            duration: 0,
        }
    }

    fn segment(id: u32, kind: SegmentKind) -> MediaSegment {
        MediaSegment {
            track: TrackId::new(id),
            kind,
            data: Bytes::from_static(b"seg"),
            start_secs: 0.0,
        }
    }

    fn ready(tracks: Vec<DecodedTrack>) -> DemuxEvent {
        DemuxEvent::Ready(MovieInfo {
            timescale: 1000,
            duration: 5000,
            tracks,
        })
    }

    fn adapter(demuxer: ScriptedDemuxer) -> (FeedAdapter, tokio::sync::mpsc::Receiver<SinkEvent>) {
        let (sink, rx) = ChannelSink::new(64);
        let adapter = FeedAdapter::new(
            Box::new(demuxer),
            Arc::new(sink),
            TrackScheduler::new(),
            SegmentOptions::default(),
        );
        (adapter, rx)
    }

    #[tokio::test]
    async fn test_ready_registers_playable_tracks_and_init_first() {
        let demuxer = ScriptedDemuxer {
            batches: vec![vec![
                ready(vec![
                    track(1, TrackKind::Video),
                    track(2, TrackKind::Other),
                    track(3, TrackKind::Audio),
                ]),
            ]],
            init: vec![segment(1, SegmentKind::Init), segment(3, SegmentKind::Init)],
            ..Default::default()
        };
        let (mut feed, mut rx) = adapter(demuxer);

        feed.feed(b"moov", 0).await.unwrap();
        assert!(feed.is_ready());
        assert_eq!(feed.tracks().len(), 2);
        assert_eq!(feed.next_offset(), 4);

        feed.scheduler().wait_idle().await;

        assert_matches!(rx.recv().await, Some(SinkEvent::TrackAdded(t)) if t.id == TrackId::new(1));
        assert_matches!(rx.recv().await, Some(SinkEvent::TrackAdded(t)) if t.id == TrackId::new(3));
        assert_matches!(rx.recv().await, Some(SinkEvent::Duration(d)) if d == 5.0);
        let mut inits = Vec::new();
        while let Ok(SinkEvent::Segment(s)) = rx.try_recv() {
            assert_eq!(s.kind, SegmentKind::Init);
            inits.push(s.track);
        }
        inits.sort();
        assert_eq!(inits, vec![TrackId::new(1), TrackId::new(3)]);
    }

    #[tokio::test]
    async fn test_empty_track_list_is_container_error() {
        let demuxer = ScriptedDemuxer {
            batches: vec![vec![ready(Vec::new())]],
            ..Default::default()
        };
        let (mut feed, _rx) = adapter(demuxer);
        let err = feed.feed(b"moov", 0).await.unwrap_err();
        assert_matches!(err, Error::Container(ref msg) if msg == "no tracks found");
    }

    #[tokio::test]
    async fn test_only_other_tracks_is_container_error() {
        let demuxer = ScriptedDemuxer {
            batches: vec![vec![ready(vec![track(1, TrackKind::Other)])]],
            ..Default::default()
        };
        let (mut feed, _rx) = adapter(demuxer);
        assert_matches!(feed.feed(b"moov", 0).await, Err(Error::Container(_)));
    }

    #[tokio::test]
    async fn test_two_feeds_keep_offsets() {
        let (mut feed, _rx) = adapter(ScriptedDemuxer::default());
        feed.feed(b"AAAAA", 0).await.unwrap();
        feed.feed(b"BBB", 5).await.unwrap();
        assert_eq!(feed.next_offset(), 8);
        assert!(!feed.is_ready());
    }

    #[tokio::test]
    async fn test_seek_offset_and_restart() {
        let (mut feed, _rx) = adapter(ScriptedDemuxer::default());
        assert_eq!(feed.seek_offset(0.0), None);
        assert_eq!(feed.seek_offset(3.0), Some(4096));
        feed.restart_at(4000);
        assert_eq!(feed.next_offset(), 4000);
    }
}
