//! Mapping decoded offsets back onto the frame stream.
//!
//! Frames are sealed independently and carry an 8-byte header plus a GCM
//! tag, so decoded and ciphertext offsets drift apart frame by frame. The
//! only way to place a decoded offset is to walk frame headers from the
//! start. [`FrameIndex`] remembers every boundary walked so far, whether by
//! the fetch loop or by [`SeekLocator`] probes.

use super::decrypt::{decrypt_frame, FrameCipher};
use super::frame::{parse_header, FrameReader, HEADER_LEN};
use super::timed;
use crate::transport::{RangeResponse, RangeTransport};
use futures::StreamExt;
use oculux_common::{Error, Result};
use oculux_media::{DemuxEvent, Demuxer, SegmentOptions};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A frame boundary in both address spaces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamPosition {
    /// Offset of the frame header in the ciphertext stream.
    pub cipher_offset: u64,
    /// Offset of the frame's first plaintext byte in the decoded stream.
    pub decoded_offset: u64,
}

impl StreamPosition {
    pub const START: Self = Self {
        cipher_offset: 0,
        decoded_offset: 0,
    };
}

/// Known frame boundaries, contiguous from the start of the stream.
#[derive(Debug, Clone)]
pub struct FrameIndex {
    boundaries: Arc<RwLock<Vec<StreamPosition>>>,
}

impl Default for FrameIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameIndex {
    pub fn new() -> Self {
        Self {
            boundaries: Arc::new(RwLock::new(vec![StreamPosition::START])),
        }
    }

    /// Record a frame spanning `start..end`.
    ///
    /// Ignored unless `start` is the furthest boundary known, which keeps
    /// the index a gap-free prefix of the stream.
    pub fn record(&self, start: StreamPosition, end: StreamPosition) {
        let mut boundaries = self.boundaries.write();
        if boundaries.last() == Some(&start) && end.cipher_offset > start.cipher_offset {
            boundaries.push(end);
        }
    }

    /// Number of frames known.
    pub fn frames(&self) -> usize {
        self.boundaries.read().len() - 1
    }

    /// Furthest boundary known.
    pub fn known_end(&self) -> StreamPosition {
        self.boundaries
            .read()
            .last()
            .copied()
            .unwrap_or(StreamPosition::START)
    }

    /// Start of the last known frame, if any frame is known.
    pub fn last_frame_start(&self) -> Option<StreamPosition> {
        let boundaries = self.boundaries.read();
        boundaries.len().checked_sub(2).map(|i| boundaries[i])
    }

    /// Start of the known frame holding decoded byte `target`.
    pub fn frame_containing(&self, target: u64) -> Option<StreamPosition> {
        let boundaries = self.boundaries.read();
        let end = boundaries.last()?;
        if target >= end.decoded_offset {
            return None;
        }
        // Last boundary at or before the target; `boundaries[0]` is 0.
        let i = boundaries.partition_point(|b| b.decoded_offset <= target);
        Some(boundaries[i.saturating_sub(1)])
    }
}

/// Header-only frame walker.
pub struct SeekLocator {
    transport: Arc<dyn RangeTransport>,
    cipher: Arc<dyn FrameCipher>,
    index: FrameIndex,
    read_timeout: Duration,
}

impl SeekLocator {
    pub fn new(
        transport: Arc<dyn RangeTransport>,
        cipher: Arc<dyn FrameCipher>,
        index: FrameIndex,
        read_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            cipher,
            index,
            read_timeout,
        }
    }

    /// Frame boundary to restart streaming from so that decoded byte
    /// `target` is produced.
    ///
    /// Known frames are answered from the index. Beyond them, 8-byte headers
    /// are probed one frame at a time; bodies are never fetched. A target
    /// past the end of the stream resolves to the last frame.
    pub async fn locate(&self, url: &str, target: u64) -> Result<StreamPosition> {
        if let Some(position) = self.index.frame_containing(target) {
            tracing::debug!(target, cipher_offset = position.cipher_offset, "Seek target in index");
            return Ok(position);
        }

        let mut position = self.index.known_end();
        let mut probes = 0u32;
        loop {
            let header = timed(
                self.read_timeout,
                self.transport.probe(url, position.cipher_offset, HEADER_LEN as u64),
            )
            .await?;
            probes += 1;

            if header.len() < HEADER_LEN {
                let last = self.index.last_frame_start().unwrap_or(position);
                tracing::debug!(target, probes, cipher_offset = last.cipher_offset, "Seek target past end");
                return Ok(last);
            }

            let cipher_len = parse_header(&header)?;
            let next = StreamPosition {
                cipher_offset: position.cipher_offset + HEADER_LEN as u64 + cipher_len,
                decoded_offset: position.decoded_offset + self.cipher.plaintext_len(cipher_len),
            };
            self.index.record(position, next);

            if target < next.decoded_offset {
                tracing::debug!(
                    target,
                    probes,
                    cipher_offset = position.cipher_offset,
                    decoded_offset = position.decoded_offset,
                    "Seek target located"
                );
                return Ok(position);
            }
            position = next;
        }
    }

    /// Map `time_secs` to a restart position without a running session.
    ///
    /// Frames are read from the start of the object until `demuxer` has
    /// parsed the movie header and its first fragment, so a segment index
    /// placed between them is known. Returns the decoded target offset and
    /// the frame to restart from.
    pub async fn locate_time(
        &self,
        demuxer: &mut dyn Demuxer,
        url: &str,
        time_secs: f64,
    ) -> Result<(u64, StreamPosition)> {
        let RangeResponse { mut body, .. } =
            timed(self.read_timeout, self.transport.open(url, 0)).await?;
        let mut reader = FrameReader::new();
        let mut position = StreamPosition::START;
        let mut ready = false;

        'read: loop {
            let chunk = timed(self.read_timeout, async { body.next().await.transpose() }).await?;
            let Some(chunk) = chunk else {
                break;
            };
            reader.push(&chunk);

            while let Some(frame) = reader.next_frame()? {
                let plaintext = decrypt_frame(self.cipher.as_ref(), &frame)?;
                let next = StreamPosition {
                    cipher_offset: position.cipher_offset + (HEADER_LEN + frame.len()) as u64,
                    decoded_offset: position.decoded_offset + plaintext.len() as u64,
                };
                let events = if plaintext.is_empty() {
                    Vec::new()
                } else {
                    demuxer.append(&plaintext, position.decoded_offset)?
                };
                self.index.record(position, next);
                position = next;

                let mut fragment_seen = false;
                for event in events {
                    match event {
                        DemuxEvent::Ready(info) => {
                            for track in &info.tracks {
                                demuxer.set_segment_options(track.id, SegmentOptions::default());
                            }
                            ready = true;
                            fragment_seen |= demuxer
                                .initialize_segmentation()?
                                .iter()
                                .any(|s| s.kind == oculux_media::SegmentKind::Media);
                        }
                        DemuxEvent::Segment(_) => fragment_seen = true,
                    }
                }
                if ready && fragment_seen {
                    break 'read;
                }
            }
        }

        if !ready {
            return Err(Error::container("stream ended before the movie header"));
        }
        let target = demuxer.seek(time_secs).unwrap_or(0);
        tracing::debug!(time_secs, target, frames = self.index.frames(), "Seek time mapped");
        Ok((target, self.locate(url, target).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::decrypt::IdentityCipher;
    use crate::pipeline::frame::encode_frame;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use bytes::Bytes;
    use oculux_media::fmp4::writer;
    use oculux_media::Fmp4Demuxer;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory object that counts probes.
    struct MemoryTransport {
        data: Bytes,
        probes: AtomicU32,
    }

    #[async_trait]
    impl RangeTransport for MemoryTransport {
        async fn open(&self, _url: &str, start: u64) -> Result<RangeResponse> {
            let rest = self.data.slice(start as usize..);
            let chunks: Vec<Result<Bytes>> = rest
                .chunks(64)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(RangeResponse {
                content_length: rest.len() as u64,
                body: futures::stream::iter(chunks).boxed(),
            })
        }

        async fn probe(&self, _url: &str, start: u64, len: u64) -> Result<Bytes> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let start = (start as usize).min(self.data.len());
            let end = (start + len as usize).min(self.data.len());
            Ok(self.data.slice(start..end))
        }
    }

    fn stream(bodies: &[usize]) -> Bytes {
        let mut out = Vec::new();
        for &len in bodies {
            out.extend_from_slice(&encode_frame(&vec![0u8; len]).unwrap());
        }
        Bytes::from(out)
    }

    fn locator(data: Bytes, index: FrameIndex) -> (SeekLocator, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport {
            data,
            probes: AtomicU32::new(0),
        });
        let locator = SeekLocator::new(
            transport.clone(),
            Arc::new(IdentityCipher),
            index,
            Duration::from_secs(5),
        );
        (locator, transport)
    }

    #[test]
    fn test_index_prefix() {
        let index = FrameIndex::new();
        let a = StreamPosition { cipher_offset: 108, decoded_offset: 100 };
        let b = StreamPosition { cipher_offset: 166, decoded_offset: 150 };
        index.record(StreamPosition::START, a);
        index.record(a, b);
        // Not contiguous with the known prefix.
        index.record(
            StreamPosition {
                cipher_offset: 500,
                decoded_offset: 400,
            },
            StreamPosition {
                cipher_offset: 600,
                decoded_offset: 492,
            },
        );
        // Already known.
        index.record(StreamPosition::START, a);

        assert_eq!(index.frames(), 2);
        assert_eq!(index.frame_containing(0), Some(StreamPosition::START));
        assert_eq!(index.frame_containing(99), Some(StreamPosition::START));
        assert_eq!(index.frame_containing(100), Some(a));
        assert_eq!(index.frame_containing(149), Some(a));
        assert_eq!(index.frame_containing(150), None);
        assert_eq!(index.last_frame_start(), Some(a));
        assert_eq!(index.known_end(), b);
    }

    #[tokio::test]
    async fn test_locate_by_probing() {
        let (locator, transport) = locator(stream(&[100, 50, 200]), FrameIndex::new());

        let position = locator.locate("mem", 120).await.unwrap();
        assert_eq!(position, StreamPosition { cipher_offset: 108, decoded_offset: 100 });
        assert_eq!(transport.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_locate_reuses_index() {
        let index = FrameIndex::new();
        let (locator, transport) = locator(stream(&[100, 50, 200]), index.clone());

        locator.locate("mem", 200).await.unwrap();
        let probes = transport.probes.load(Ordering::SeqCst);
        assert_eq!(index.frames(), 3);

        let position = locator.locate("mem", 10).await.unwrap();
        assert_eq!(position, StreamPosition::START);
        assert_eq!(transport.probes.load(Ordering::SeqCst), probes);
    }

    #[tokio::test]
    async fn test_locate_frame_boundary_exactly() {
        let (locator, _) = locator(stream(&[100, 50]), FrameIndex::new());
        let position = locator.locate("mem", 150).await.unwrap();
        // 150 is one past the last byte; clamps to the last frame.
        assert_eq!(position, StreamPosition { cipher_offset: 108, decoded_offset: 100 });
    }

    #[tokio::test]
    async fn test_locate_past_end() {
        let (locator, _) = locator(stream(&[100, 50]), FrameIndex::new());
        let position = locator.locate("mem", 1_000_000).await.unwrap();
        assert_eq!(position, StreamPosition { cipher_offset: 108, decoded_offset: 100 });
    }

    #[tokio::test]
    async fn test_locate_empty_stream() {
        let (locator, _) = locator(Bytes::new(), FrameIndex::new());
        assert_eq!(locator.locate("mem", 10).await.unwrap(), StreamPosition::START);
    }

    #[tokio::test]
    async fn test_locate_skips_empty_frames() {
        let (locator, _) = locator(stream(&[0, 0, 10]), FrameIndex::new());
        let position = locator.locate("mem", 5).await.unwrap();
        assert_eq!(position, StreamPosition { cipher_offset: 16, decoded_offset: 0 });
    }

    #[tokio::test]
    async fn test_locate_corrupt_header() {
        let (locator, _) = locator(Bytes::from_static(b"abcdefgh"), FrameIndex::new());
        assert_matches!(locator.locate("mem", 10).await, Err(Error::Framing(_)));
    }

    #[tokio::test]
    async fn test_locate_time_uses_segment_index() {
        let movie = writer::write_sample_movie(6);
        let framed: Vec<u8> = movie
            .chunks(200)
            .flat_map(|c| encode_frame(c).unwrap().to_vec())
            .collect();
        let (locator, _) = locator(Bytes::from(framed), FrameIndex::new());
        let mut demuxer = Fmp4Demuxer::new();

        let (target, position) = locator.locate_time(&mut demuxer, "mem", 4.5).await.unwrap();

        assert_eq!(&movie[target as usize + 4..target as usize + 8], b"moof");
        assert!(position.decoded_offset <= target && target - position.decoded_offset < 200);
        assert_eq!(position.decoded_offset % 200, 0);
        assert_eq!(position.cipher_offset, position.decoded_offset / 200 * 208);
    }

    #[tokio::test]
    async fn test_locate_time_without_movie() {
        let (locator, _) = locator(Bytes::new(), FrameIndex::new());
        let mut demuxer = Fmp4Demuxer::new();
        assert_matches!(
            locator.locate_time(&mut demuxer, "mem", 1.0).await,
            Err(Error::Container(_))
        );
    }
}
