//! `moov` parsing for fragmented movies.

use super::atoms::{children, fullbox_header, read_u32, read_u64, Atom, AtomType};
use super::codec::codec_string;
use crate::demux::{DecodedTrack, MovieInfo};
use crate::{Error, Result};
use bytes::Bytes;
use oculux_common::{TrackId, TrackKind};

/// Per-track sample defaults from `trex`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackDefaults {
    /// Default sample duration in media timescale units.
    pub sample_duration: u32,
    /// Default sample size in bytes.
    pub sample_size: u32,
}

/// One `trak` with the raw boxes needed to rebuild a per-track init segment.
#[derive(Debug, Clone)]
pub struct TrackBox {
    /// Parsed track description.
    pub info: DecodedTrack,
    /// The complete `trak` box.
    pub trak: Bytes,
    /// The complete `trex` box for this track, if the movie declared one.
    pub trex: Option<Bytes>,
    /// Sample defaults from `trex`.
    pub defaults: TrackDefaults,
}

/// Parsed fragmented movie header.
#[derive(Debug, Clone)]
pub struct Movie {
    /// Movie timescale.
    pub timescale: u32,
    /// Movie duration in movie timescale units.
    pub duration: u64,
    /// The complete `mvhd` box.
    pub mvhd: Bytes,
    /// The complete `mehd` box, if present.
    pub mehd: Option<Bytes>,
    /// Tracks in declaration order.
    pub tracks: Vec<TrackBox>,
}

impl Movie {
    /// Parse a complete `moov` box.
    ///
    /// Fails with [`Error::Unsupported`] when the movie has no `mvex`, since
    /// samples of a non-fragmented movie can only be located after the
    /// whole `mdat` is available.
    pub fn parse(moov: &Bytes) -> Result<Self> {
        let header = Atom::parse(moov)?.ok_or(Error::MissingAtom("moov"))?;
        let body = moov.slice(header.header_size as usize..);

        let mut mvhd = None;
        let mut timescale = 1000;
        let mut duration = 0u64;
        let mut mehd = None;
        let mut fragment_duration = None;
        let mut tracks = Vec::new();
        let mut trexes = Vec::new();
        let mut has_mvex = false;

        for child in children(&body) {
            match child.atom.atom_type {
                AtomType::MVHD => {
                    let (ts, dur) = parse_media_header(child.body())?;
                    timescale = ts;
                    duration = dur;
                    mvhd = Some(body.slice_ref(child.raw));
                }
                AtomType::TRAK => {
                    let info = parse_trak(child.body())?;
                    tracks.push(TrackBox {
                        info,
                        trak: body.slice_ref(child.raw),
                        trex: None,
                        defaults: TrackDefaults::default(),
                    });
                }
                AtomType::MVEX => {
                    has_mvex = true;
                    for ext in children(child.body()) {
                        match ext.atom.atom_type {
                            AtomType::MEHD => {
                                fragment_duration = Some(parse_mehd(ext.body())?);
                                mehd = Some(body.slice_ref(ext.raw));
                            }
                            AtomType::TREX => {
                                let (track_id, defaults) = parse_trex(ext.body())?;
                                trexes.push((track_id, defaults, body.slice_ref(ext.raw)));
                            }
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }

        let mvhd = mvhd.ok_or(Error::MissingAtom("mvhd"))?;
        if !has_mvex {
            return Err(Error::unsupported(
                "MP4 without movie fragments (no mvex)",
            ));
        }

        for (track_id, defaults, raw) in trexes {
            if let Some(track) = tracks.iter_mut().find(|t| t.info.id == track_id) {
                track.defaults = defaults;
                track.trex = Some(raw);
            }
        }

        // Fragmented files often leave mvhd.duration at 0 or all-ones.
        if duration == 0 || duration == u32::MAX as u64 || duration == u64::MAX {
            duration = fragment_duration.unwrap_or(0);
        }

        Ok(Self {
            timescale,
            duration,
            mvhd,
            mehd,
            tracks,
        })
    }

    /// Movie-level information for the ready event.
    pub fn info(&self) -> MovieInfo {
        MovieInfo {
            timescale: self.timescale,
            duration: self.duration,
            tracks: self.tracks.iter().map(|t| t.info.clone()).collect(),
        }
    }

    /// Look up a track by ID.
    pub fn track(&self, id: TrackId) -> Option<&TrackBox> {
        self.tracks.iter().find(|t| t.info.id == id)
    }
}

/// Parse `mvhd`/`mdhd`, both of which share the timescale/duration layout.
fn parse_media_header(data: &[u8]) -> Result<(u32, u64)> {
    let (version, _) = fullbox_header(data)?;
    if version == 0 {
        Ok((read_u32(data, 12)?, read_u32(data, 16)? as u64))
    } else {
        Ok((read_u32(data, 20)?, read_u64(data, 24)?))
    }
}

fn parse_mehd(data: &[u8]) -> Result<u64> {
    let (version, _) = fullbox_header(data)?;
    if version == 0 {
        Ok(read_u32(data, 4)? as u64)
    } else {
        read_u64(data, 4)
    }
}

fn parse_trex(data: &[u8]) -> Result<(TrackId, TrackDefaults)> {
    let track_id = TrackId::new(read_u32(data, 4)?);
    let defaults = TrackDefaults {
        sample_duration: read_u32(data, 12)?,
        sample_size: read_u32(data, 16)?,
    };
    Ok((track_id, defaults))
}

/// Parse trak (track) atom.
fn parse_trak(data: &[u8]) -> Result<DecodedTrack> {
    let mut track_id = None;
    let mut kind = TrackKind::Other;
    let mut timescale = 0;
    let mut duration = 0;
    let mut codec = None;

    for child in children(data) {
        match child.atom.atom_type {
            AtomType::TKHD => {
                let body = child.body();
                let (version, _) = fullbox_header(body)?;
                let offset = if version == 0 { 12 } else { 20 };
                track_id = Some(read_u32(body, offset)?);
            }
            AtomType::MDIA => {
                for media in children(child.body()) {
                    match media.atom.atom_type {
                        AtomType::MDHD => {
                            (timescale, duration) = parse_media_header(media.body())?;
                        }
                        AtomType::HDLR => {
                            let body = media.body();
                            if body.len() >= 12 {
                                kind = TrackKind::from_handler([
                                    body[8], body[9], body[10], body[11],
                                ]);
                            }
                        }
                        AtomType::MINF => {
                            codec = parse_minf(media.body())?;
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    let track_id = track_id.ok_or(Error::MissingAtom("tkhd"))?;

    Ok(DecodedTrack {
        id: TrackId::new(track_id),
        kind,
        codec: codec.unwrap_or_default(),
        timescale,
        duration,
    })
}

/// Parse minf (media info) atom down to the sample description.
fn parse_minf(data: &[u8]) -> Result<Option<String>> {
    for child in children(data) {
        if child.atom.atom_type == AtomType::STBL {
            for table in children(child.body()) {
                if table.atom.atom_type == AtomType::STSD {
                    return codec_string(table.body());
                }
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fmp4::boxes;
    use crate::fmp4::writer::{self, TrackConfig};
    use assert_matches::assert_matches;

    fn moov_of(init: &[u8]) -> Bytes {
        let ftyp_size = read_u32(init, 0).unwrap() as usize;
        Bytes::copy_from_slice(&init[ftyp_size..])
    }

    #[test]
    fn test_parse_two_track_movie() {
        let init = writer::write_init_segment(
            &[TrackConfig::avc(1, 90000), TrackConfig::aac(2, 48000)],
            1000,
            10_000,
        );
        let movie = Movie::parse(&moov_of(&init)).unwrap();

        assert_eq!(movie.timescale, 1000);
        assert_eq!(movie.duration, 10_000);
        assert_eq!(movie.tracks.len(), 2);

        let video = movie.track(TrackId::new(1)).unwrap();
        assert_eq!(video.info.kind, TrackKind::Video);
        assert_eq!(video.info.codec, "avc1.64001f");
        assert_eq!(video.info.timescale, 90000);
        assert!(video.trex.is_some());

        let audio = movie.track(TrackId::new(2)).unwrap();
        assert_eq!(audio.info.kind, TrackKind::Audio);
        assert_eq!(audio.info.codec, "mp4a.40.2");

        assert_eq!(movie.info().duration_secs(), Some(10.0));
    }

    #[test]
    fn test_unfragmented_movie_is_rejected() {
        let mvhd = writer::write_mvhd(1000, 0);
        let moov = boxes::write_container_box(b"moov", &[&mvhd]);
        let result = Movie::parse(&Bytes::from(moov));
        assert_matches!(result, Err(Error::Unsupported(_)));
    }

    #[test]
    fn test_missing_mvhd() {
        let mvex = boxes::write_container_box(b"mvex", &[]);
        let moov = boxes::write_container_box(b"moov", &[&mvex]);
        let result = Movie::parse(&Bytes::from(moov));
        assert_matches!(result, Err(Error::MissingAtom("mvhd")));
    }
}
