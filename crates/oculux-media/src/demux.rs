//! Demuxer contract.
//!
//! The pipeline only talks to a container parser through [`Demuxer`], so the
//! built-in [`crate::Fmp4Demuxer`] can be swapped for another implementation.

use crate::Result;
use bytes::Bytes;
use oculux_common::{TrackId, TrackKind};

/// A track as declared by the container.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTrack {
    /// Container track ID.
    pub id: TrackId,
    /// Handler kind.
    pub kind: TrackKind,
    /// RFC 6381 codec string (e.g. `avc1.64001f`).
    pub codec: String,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Track duration in media timescale units.
    pub duration: u64,
}

impl DecodedTrack {
    /// MIME type a playback sink needs to create a buffer for this track.
    pub fn mime_type(&self) -> String {
        let base = match self.kind {
            TrackKind::Audio => "audio/mp4",
            _ => "video/mp4",
        };
        format!("{}; codecs=\"{}\"", base, self.codec)
    }
}

/// Movie-level information announced once the header is parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct MovieInfo {
    /// Movie timescale.
    pub timescale: u32,
    /// Movie duration in movie timescale units (0 when unknown).
    pub duration: u64,
    /// Every track in the movie, playable or not.
    pub tracks: Vec<DecodedTrack>,
}

impl MovieInfo {
    /// Declared duration in seconds, if the container states one.
    pub fn duration_secs(&self) -> Option<f64> {
        if self.timescale == 0 || self.duration == 0 {
            None
        } else {
            Some(self.duration as f64 / self.timescale as f64)
        }
    }
}

/// Whether a segment initializes a track buffer or carries media.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// `ftyp` + `moov` for one track.
    Init,
    /// One or more `moof` + `mdat` pairs for one track.
    Media,
}

/// A buffer ready to be appended to a track's sink.
#[derive(Debug, Clone)]
pub struct MediaSegment {
    /// Track this segment belongs to.
    pub track: TrackId,
    /// Init or media.
    pub kind: SegmentKind,
    /// Segment bytes.
    pub data: Bytes,
    /// Decode time of the first sample in seconds (0 for init segments).
    pub start_secs: f64,
}

/// Per-track segmentation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentOptions {
    /// Number of fragments grouped into one media segment.
    pub fragments_per_segment: usize,
}

impl Default for SegmentOptions {
    fn default() -> Self {
        Self {
            fragments_per_segment: 1,
        }
    }
}

/// Something the demuxer observed while consuming bytes.
#[derive(Debug, Clone)]
pub enum DemuxEvent {
    /// The movie header was parsed. Emitted once per demuxer.
    Ready(MovieInfo),
    /// A media segment is ready for its track.
    Segment(MediaSegment),
}

/// Incremental container parser.
///
/// Bytes are pushed in stream order with their offset in the decoded
/// stream. After [`DemuxEvent::Ready`] no segment is produced until
/// [`Demuxer::initialize_segmentation`] has been called, so every
/// track's init segment precedes its media segments.
pub trait Demuxer: Send {
    /// Push a chunk of plaintext starting at `offset`.
    fn append(&mut self, chunk: &[u8], offset: u64) -> Result<Vec<DemuxEvent>>;

    /// Request segments for `track`. Tracks without options are dropped.
    fn set_segment_options(&mut self, track: TrackId, options: SegmentOptions);

    /// Start segmentation.
    ///
    /// Returns one init segment per configured track, followed by any
    /// media segments that were already buffered.
    fn initialize_segmentation(&mut self) -> Result<Vec<MediaSegment>>;

    /// Decoded offset to resume from so playback can start at `time_secs`.
    ///
    /// Discards buffered state. Bytes pushed afterwards that lie before the
    /// returned offset are skipped. Returns `None` when no position is known
    /// yet, in which case the stream must restart from offset 0.
    fn seek(&mut self, time_secs: f64) -> Option<u64>;

    /// Signal the end of the byte range and emit partially grouped segments.
    fn flush(&mut self) -> Result<Vec<MediaSegment>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type() {
        let track = DecodedTrack {
            id: TrackId::new(1),
            kind: TrackKind::Video,
            codec: "avc1.64001f".to_string(),
            timescale: 90000,
            duration: 0,
        };
        assert_eq!(track.mime_type(), "video/mp4; codecs=\"avc1.64001f\"");

        let audio = DecodedTrack {
            kind: TrackKind::Audio,
            codec: "mp4a.40.2".to_string(),
            ..track
        };
        assert_eq!(audio.mime_type(), "audio/mp4; codecs=\"mp4a.40.2\"");
    }

    #[test]
    fn test_duration_secs() {
        let info = MovieInfo {
            timescale: 1000,
            duration: 12_500,
            tracks: vec![],
        };
        assert_eq!(info.duration_secs(), Some(12.5));

        let unknown = MovieInfo {
            duration: 0,
            ..info
        };
        assert_eq!(unknown.duration_secs(), None);
    }
}
