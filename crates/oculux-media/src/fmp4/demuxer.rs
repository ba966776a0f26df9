//! Incremental fragmented MP4 demuxer.

use super::fragment::{split_fragment, TrackFragment};
use super::index::SeekIndex;
use super::init::build_init_segment;
use crate::demux::{DemuxEvent, Demuxer, MediaSegment, SegmentKind, SegmentOptions};
use crate::mp4::{Atom, AtomType, Movie};
use crate::{Error, Result};
use bytes::{Bytes, BytesMut};
use oculux_common::{TrackId, TrackKind};
use std::collections::HashMap;

/// Largest top-level box the demuxer will buffer.
const MAX_BOX_SIZE: u64 = 512 * 1024 * 1024;

/// Fragments collected for a track's next media segment.
#[derive(Debug)]
struct PendingGroup {
    data: Vec<u8>,
    fragments: usize,
    start_secs: f64,
}

/// Demuxer for fragmented MP4 streams.
///
/// Top-level boxes are reassembled from arbitrary chunks. `moof` boxes are
/// held until their `mdat` is complete, then split per track and grouped
/// into media segments according to each track's [`SegmentOptions`].
#[derive(Debug, Default)]
pub struct Fmp4Demuxer {
    buffer: BytesMut,
    /// Decoded offset of `buffer[0]`.
    buffer_offset: u64,
    started: bool,
    resume_offset: Option<u64>,
    ftyp: Option<Bytes>,
    movie: Option<Movie>,
    segmenting: bool,
    options: HashMap<TrackId, SegmentOptions>,
    groups: HashMap<TrackId, PendingGroup>,
    pending_moof: Option<(u64, Bytes)>,
    next_decode_time: HashMap<TrackId, u64>,
    index: SeekIndex,
}

impl Fmp4Demuxer {
    /// Create a demuxer expecting the stream from offset 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// The parsed movie header, once available.
    pub fn movie(&self) -> Option<&Movie> {
        self.movie.as_ref()
    }

    /// Known resume points.
    pub fn seek_index(&self) -> &SeekIndex {
        &self.index
    }

    fn parse_boxes(&mut self, out: &mut Vec<DemuxEvent>) -> Result<()> {
        loop {
            // Hold everything after moov until segmentation is configured.
            if self.movie.is_some() && !self.segmenting {
                return Ok(());
            }

            let Some(atom) = Atom::parse(&self.buffer)? else {
                return Ok(());
            };
            if atom.size == 0 {
                // Extends to end of stream; only known at flush.
                return Ok(());
            }
            if atom.size > MAX_BOX_SIZE {
                return Err(Error::invalid_mp4(format!(
                    "{} box of {} bytes at offset {} exceeds maximum {}",
                    atom.atom_type, atom.size, self.buffer_offset, MAX_BOX_SIZE
                )));
            }

            let size = atom.size as usize;
            if self.buffer.len() < size {
                return Ok(());
            }

            let offset = self.buffer_offset;
            let data = self.buffer.split_to(size).freeze();
            self.buffer_offset += size as u64;
            self.handle_box(atom, offset, data, out)?;
        }
    }

    fn handle_box(
        &mut self,
        atom: Atom,
        offset: u64,
        data: Bytes,
        out: &mut Vec<DemuxEvent>,
    ) -> Result<()> {
        match atom.atom_type {
            AtomType::FTYP if self.movie.is_none() => {
                self.ftyp = Some(data);
            }
            AtomType::MOOV if self.movie.is_none() => {
                let movie = Movie::parse(&data)?;
                self.index.insert(0.0, offset + data.len() as u64);
                out.push(DemuxEvent::Ready(movie.info()));
                self.movie = Some(movie);
            }
            AtomType::SIDX => {
                let body = &data[atom.header_size as usize..];
                self.index.insert_sidx(body, offset, data.len() as u64)?;
            }
            AtomType::MOOF => {
                if self.movie.is_none() {
                    return Err(Error::MissingAtom("moov"));
                }
                self.pending_moof = Some((offset, data));
            }
            AtomType::MDAT => {
                if let Some((moof_offset, moof)) = self.pending_moof.take() {
                    self.handle_fragment(moof_offset, &moof, offset, &data, out)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_fragment(
        &mut self,
        moof_offset: u64,
        moof: &[u8],
        mdat_offset: u64,
        mdat: &[u8],
        out: &mut Vec<DemuxEvent>,
    ) -> Result<()> {
        let movie = self.movie.as_ref().ok_or(Error::MissingAtom("moov"))?;
        let fragments = split_fragment(
            moof,
            moof_offset,
            mdat,
            mdat_offset,
            movie,
            &self.next_decode_time,
        )?;

        let seconds = |fragment: &TrackFragment| {
            let timescale = movie
                .track(fragment.track)
                .map(|t| t.info.timescale)
                .unwrap_or(0);
            if timescale == 0 {
                0.0
            } else {
                fragment.decode_time as f64 / timescale as f64
            }
        };

        // Resume points follow the video track when there is one.
        let anchor = fragments
            .iter()
            .find(|f| {
                movie
                    .track(f.track)
                    .is_some_and(|t| t.info.kind == TrackKind::Video)
            })
            .or_else(|| fragments.first());
        if let Some(fragment) = anchor {
            self.index.insert(seconds(fragment), moof_offset);
        }

        for fragment in &fragments {
            self.next_decode_time
                .insert(fragment.track, fragment.decode_time + fragment.duration);

            let Some(options) = self.options.get(&fragment.track) else {
                continue;
            };
            let start_secs = seconds(fragment);
            let group = self
                .groups
                .entry(fragment.track)
                .or_insert_with(|| PendingGroup {
                    data: Vec::new(),
                    fragments: 0,
                    start_secs,
                });
            group.data.extend_from_slice(&fragment.data);
            group.fragments += 1;

            if group.fragments >= options.fragments_per_segment.max(1) {
                if let Some(group) = self.groups.remove(&fragment.track) {
                    out.push(DemuxEvent::Segment(media_segment(fragment.track, group)));
                }
            }
        }

        Ok(())
    }
}

fn media_segment(track: TrackId, group: PendingGroup) -> MediaSegment {
    MediaSegment {
        track,
        kind: SegmentKind::Media,
        data: Bytes::from(group.data),
        start_secs: group.start_secs,
    }
}

fn into_segments(events: Vec<DemuxEvent>) -> impl Iterator<Item = MediaSegment> {
    events.into_iter().filter_map(|event| match event {
        DemuxEvent::Segment(segment) => Some(segment),
        DemuxEvent::Ready(_) => None,
    })
}

impl Demuxer for Fmp4Demuxer {
    fn append(&mut self, chunk: &[u8], offset: u64) -> Result<Vec<DemuxEvent>> {
        let mut chunk = chunk;
        let mut offset = offset;

        if let Some(resume) = self.resume_offset {
            let end = offset + chunk.len() as u64;
            if end <= resume {
                return Ok(Vec::new());
            }
            if offset < resume {
                chunk = &chunk[(resume - offset) as usize..];
                offset = resume;
            }
            self.resume_offset = None;
        }

        if !self.started {
            self.started = true;
            self.buffer_offset = offset;
        }

        let expected = self.buffer_offset + self.buffer.len() as u64;
        if offset != expected {
            return Err(Error::invalid_mp4(format!(
                "non-contiguous data: got offset {offset}, expected {expected}"
            )));
        }

        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        self.parse_boxes(&mut events)?;
        Ok(events)
    }

    fn set_segment_options(&mut self, track: TrackId, options: SegmentOptions) {
        self.options.insert(track, options);
    }

    fn initialize_segmentation(&mut self) -> Result<Vec<MediaSegment>> {
        if self.segmenting {
            return Ok(Vec::new());
        }
        let movie = self.movie.as_ref().ok_or(Error::MissingAtom("moov"))?;

        let mut segments = Vec::new();
        for track in &movie.tracks {
            let id = track.info.id;
            if self.options.contains_key(&id) {
                segments.push(MediaSegment {
                    track: id,
                    kind: SegmentKind::Init,
                    data: build_init_segment(self.ftyp.as_deref(), movie, id)?,
                    start_secs: 0.0,
                });
            }
        }

        self.segmenting = true;
        let mut events = Vec::new();
        self.parse_boxes(&mut events)?;
        segments.extend(into_segments(events));
        Ok(segments)
    }

    fn seek(&mut self, time_secs: f64) -> Option<u64> {
        self.buffer.clear();
        self.pending_moof = None;
        self.groups.clear();
        self.started = false;

        let offset = self.index.lookup(time_secs).map(|point| point.offset);
        self.resume_offset = offset;
        offset
    }

    fn flush(&mut self) -> Result<Vec<MediaSegment>> {
        let mut events = Vec::new();

        // A final mdat may declare size 0 ("to end of stream").
        if let Some(atom) = Atom::parse(&self.buffer)? {
            if atom.size == 0 && atom.atom_type == AtomType::MDAT && self.segmenting {
                let offset = self.buffer_offset;
                let data = self.buffer.split().freeze();
                self.buffer_offset += data.len() as u64;
                self.handle_box(atom, offset, data, &mut events)?;
            }
        }

        let movie = self.movie.as_ref().ok_or(Error::MissingAtom("moov"))?;
        let mut segments: Vec<MediaSegment> = into_segments(events).collect();
        for track in &movie.tracks {
            if let Some(group) = self.groups.remove(&track.info.id) {
                segments.push(media_segment(track.info.id, group));
            }
        }
        Ok(segments)
    }
}
