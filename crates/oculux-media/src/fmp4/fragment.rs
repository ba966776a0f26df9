//! Splitting movie fragments into per-track fragments.
//!
//! A muxer may interleave several tracks in one `moof` with a shared
//! `mdat`. Playback sinks keep one buffer per track, so every `traf` is
//! rebuilt into its own `moof` whose `mdat` carries only that track's
//! samples. Rebuilt fragments always address their data relative to the
//! `moof` (`default-base-is-moof`).

use super::boxes;
use crate::mp4::{children, fullbox_header, read_u32, read_u64, Atom, AtomType, Movie};
use crate::{Error, Result};
use oculux_common::TrackId;
use std::collections::HashMap;

const TFHD_BASE_DATA_OFFSET: u32 = 0x000001;
const TFHD_SAMPLE_DESCRIPTION_INDEX: u32 = 0x000002;
const TFHD_DEFAULT_DURATION: u32 = 0x000008;
const TFHD_DEFAULT_SIZE: u32 = 0x000010;
const TFHD_DEFAULT_FLAGS: u32 = 0x000020;
const TFHD_DEFAULT_BASE_IS_MOOF: u32 = 0x020000;

const TRUN_DATA_OFFSET: u32 = 0x000001;
const TRUN_FIRST_SAMPLE_FLAGS: u32 = 0x000004;
const TRUN_SAMPLE_DURATION: u32 = 0x000100;
const TRUN_SAMPLE_SIZE: u32 = 0x000200;
const TRUN_SAMPLE_FLAGS: u32 = 0x000400;
const TRUN_SAMPLE_CTS: u32 = 0x000800;

/// One track's share of a movie fragment as a standalone `moof` + `mdat`.
#[derive(Debug, Clone)]
pub struct TrackFragment {
    /// Track the fragment belongs to.
    pub track: TrackId,
    /// Decode time of the first sample, in media timescale units.
    pub decode_time: u64,
    /// Sum of sample durations, in media timescale units.
    pub duration: u64,
    /// Serialized `moof` + `mdat`.
    pub data: Vec<u8>,
}

struct Tfhd {
    track: TrackId,
    flags: u32,
    base_data_offset: Option<u64>,
    default_duration: Option<u32>,
    default_size: Option<u32>,
    /// Optional fields other than the base data offset, kept verbatim.
    tail: Vec<u8>,
}

impl Tfhd {
    fn parse(data: &[u8]) -> Result<Self> {
        let (_, flags) = fullbox_header(data)?;
        let track = TrackId::new(read_u32(data, 4)?);
        let mut pos = 8;

        let base_data_offset = if flags & TFHD_BASE_DATA_OFFSET != 0 {
            let value = read_u64(data, pos)?;
            pos += 8;
            Some(value)
        } else {
            None
        };

        let tail_start = pos;
        if flags & TFHD_SAMPLE_DESCRIPTION_INDEX != 0 {
            read_u32(data, pos)?;
            pos += 4;
        }
        let default_duration = if flags & TFHD_DEFAULT_DURATION != 0 {
            let value = read_u32(data, pos)?;
            pos += 4;
            Some(value)
        } else {
            None
        };
        let default_size = if flags & TFHD_DEFAULT_SIZE != 0 {
            let value = read_u32(data, pos)?;
            pos += 4;
            Some(value)
        } else {
            None
        };
        if flags & TFHD_DEFAULT_FLAGS != 0 {
            read_u32(data, pos)?;
            pos += 4;
        }

        Ok(Self {
            track,
            flags,
            base_data_offset,
            default_duration,
            default_size,
            tail: data[tail_start..pos].to_vec(),
        })
    }

    /// Serialize without the base data offset, addressing data from the moof.
    fn rewrite(&self) -> Vec<u8> {
        let flags = (self.flags & !TFHD_BASE_DATA_OFFSET) | TFHD_DEFAULT_BASE_IS_MOOF;
        let mut content = Vec::with_capacity(8 + self.tail.len());
        content.extend_from_slice(&boxes::fullbox_header(0, flags));
        content.extend_from_slice(&self.track.get().to_be_bytes());
        content.extend_from_slice(&self.tail);
        boxes::write_box(b"tfhd", &content)
    }
}

struct Trun<'a> {
    version: u8,
    flags: u32,
    sample_count: u32,
    data_offset: Option<i32>,
    /// First-sample flags and per-sample entries, kept verbatim.
    tail: &'a [u8],
    total_size: u64,
    total_duration: u64,
}

impl<'a> Trun<'a> {
    fn parse(data: &'a [u8], default_duration: u32, default_size: u32) -> Result<Self> {
        let (version, flags) = fullbox_header(data)?;
        let sample_count = read_u32(data, 4)?;
        let mut pos = 8;

        let data_offset = if flags & TRUN_DATA_OFFSET != 0 {
            let value = read_u32(data, pos)? as i32;
            pos += 4;
            Some(value)
        } else {
            None
        };
        let tail = &data[pos.min(data.len())..];

        if flags & TRUN_FIRST_SAMPLE_FLAGS != 0 {
            pos += 4;
        }

        let fields = [
            TRUN_SAMPLE_DURATION,
            TRUN_SAMPLE_SIZE,
            TRUN_SAMPLE_FLAGS,
            TRUN_SAMPLE_CTS,
        ];
        let entry_len = fields.iter().filter(|f| flags & **f != 0).count() * 4;
        let needed = pos + entry_len * sample_count as usize;
        if needed > data.len() {
            return Err(Error::BufferUnderflow {
                need: needed,
                have: data.len(),
            });
        }

        let mut total_size = 0u64;
        let mut total_duration = 0u64;
        for _ in 0..sample_count {
            let mut field = pos;
            let duration = if flags & TRUN_SAMPLE_DURATION != 0 {
                let value = read_u32(data, field)?;
                field += 4;
                value
            } else {
                default_duration
            };
            let size = if flags & TRUN_SAMPLE_SIZE != 0 {
                read_u32(data, field)?
            } else {
                default_size
            };
            total_duration += duration as u64;
            total_size += size as u64;
            pos += entry_len;
        }

        Ok(Self {
            version,
            flags,
            sample_count,
            data_offset,
            tail,
            total_size,
            total_duration,
        })
    }

    fn rewritten_len(&self) -> usize {
        8 + 4 + 4 + 4 + self.tail.len()
    }

    fn rewrite(&self, data_offset: i32) -> Vec<u8> {
        let mut content = Vec::with_capacity(12 + self.tail.len());
        content.extend_from_slice(&boxes::fullbox_header(
            self.version,
            self.flags | TRUN_DATA_OFFSET,
        ));
        content.extend_from_slice(&self.sample_count.to_be_bytes());
        content.extend_from_slice(&data_offset.to_be_bytes());
        content.extend_from_slice(self.tail);
        boxes::write_box(b"trun", &content)
    }
}

/// Split a `moof` and its `mdat` into one fragment per `traf`.
///
/// `moof` and `mdat` are complete boxes found at the given decoded-stream
/// offsets. `next_decode_time` supplies decode times for trafs without a
/// `tfdt`. Trafs of tracks the movie does not declare are dropped.
pub fn split_fragment(
    moof: &[u8],
    moof_offset: u64,
    mdat: &[u8],
    mdat_offset: u64,
    movie: &Movie,
    next_decode_time: &HashMap<TrackId, u64>,
) -> Result<Vec<TrackFragment>> {
    let header = Atom::parse(moof)?.ok_or(Error::MissingAtom("moof"))?;
    let body = &moof[header.header_size as usize..];

    let mut mfhd = None;
    let mut trafs = Vec::new();
    for child in children(body) {
        match child.atom.atom_type {
            AtomType::MFHD => mfhd = Some(child.raw),
            AtomType::TRAF => trafs.push(child.body()),
            _ => {}
        }
    }
    let mfhd = mfhd.ok_or(Error::MissingAtom("mfhd"))?;

    let mdat_header = Atom::parse(mdat)?.ok_or(Error::MissingAtom("mdat"))?;
    let payload_start = mdat_offset + mdat_header.header_size as u64;
    let payload_end = mdat_offset + mdat.len() as u64;

    let mut fragments = Vec::with_capacity(trafs.len());
    let mut previous_end = None;

    for (index, traf) in trafs.into_iter().enumerate() {
        let mut tfhd = None;
        let mut tfdt = None;
        let mut trun_bodies = Vec::new();
        let mut kept: Vec<&[u8]> = Vec::new();

        for child in children(traf) {
            match child.atom.atom_type {
                AtomType::TFHD => tfhd = Some(Tfhd::parse(child.body())?),
                AtomType::TRUN => trun_bodies.push(child.body()),
                AtomType::TFDT => {
                    let body = child.body();
                    let (version, _) = fullbox_header(body)?;
                    tfdt = Some(if version == 0 {
                        read_u32(body, 4)? as u64
                    } else {
                        read_u64(body, 4)?
                    });
                    kept.push(child.raw);
                }
                // Auxiliary info offsets would point into the old layout.
                AtomType::SAIO | AtomType::SAIZ | AtomType::SENC => {}
                _ => kept.push(child.raw),
            }
        }

        let tfhd = tfhd.ok_or(Error::MissingAtom("tfhd"))?;
        let defaults = movie
            .track(tfhd.track)
            .map(|t| t.defaults)
            .unwrap_or_default();
        let default_duration = tfhd.default_duration.unwrap_or(defaults.sample_duration);
        let default_size = tfhd.default_size.unwrap_or(defaults.sample_size);

        let base = if let Some(offset) = tfhd.base_data_offset {
            offset
        } else if tfhd.flags & TFHD_DEFAULT_BASE_IS_MOOF != 0 || index == 0 {
            moof_offset
        } else {
            previous_end.unwrap_or(moof_offset)
        };

        let mut runs = Vec::with_capacity(trun_bodies.len());
        let mut payload = Vec::new();
        let mut cursor = base;
        for body in trun_bodies {
            let run = Trun::parse(body, default_duration, default_size)?;
            let start = match run.data_offset {
                Some(offset) => base.checked_add_signed(offset as i64).ok_or_else(|| {
                    Error::invalid_mp4(format!("trun data offset {offset} underflows"))
                })?,
                None => cursor,
            };
            let end = start.checked_add(run.total_size).ok_or_else(|| {
                Error::invalid_mp4(format!("track {} sample data at {start} overflows", tfhd.track))
            })?;
            if start < payload_start || end > payload_end {
                return Err(Error::invalid_mp4(format!(
                    "track {} sample data {}..{} lies outside mdat {}..{}",
                    tfhd.track, start, end, payload_start, payload_end
                )));
            }
            let from = (start - mdat_offset) as usize;
            let to = (end - mdat_offset) as usize;
            payload.extend_from_slice(&mdat[from..to]);
            cursor = end;
            runs.push(run);
        }
        previous_end = Some(cursor);

        if movie.track(tfhd.track).is_none() {
            continue;
        }

        let new_tfhd = tfhd.rewrite();
        let kept_len: usize = kept.iter().map(|k| k.len()).sum();
        let runs_len: usize = runs.iter().map(Trun::rewritten_len).sum();
        let traf_size = 8 + new_tfhd.len() + kept_len + runs_len;
        let moof_size = 8 + mfhd.len() + traf_size;
        let mdat_hdr = boxes::write_mdat_header(payload.len() as u64);

        let mut data_offset = (moof_size + mdat_hdr.len()) as i32;
        let mut traf_children: Vec<Vec<u8>> = Vec::with_capacity(runs.len());
        for run in &runs {
            traf_children.push(run.rewrite(data_offset));
            data_offset += run.total_size as i32;
        }

        let mut parts: Vec<&[u8]> = vec![new_tfhd.as_slice()];
        parts.extend(kept.iter().copied());
        parts.extend(traf_children.iter().map(|t| t.as_slice()));
        let new_traf = boxes::write_container_box(b"traf", &parts);
        let new_moof = boxes::write_container_box(b"moof", &[mfhd, &new_traf]);

        let mut data = Vec::with_capacity(new_moof.len() + mdat_hdr.len() + payload.len());
        data.extend_from_slice(&new_moof);
        data.extend_from_slice(&mdat_hdr);
        data.extend_from_slice(&payload);

        let decode_time = tfdt
            .or_else(|| next_decode_time.get(&tfhd.track).copied())
            .unwrap_or(0);
        let duration = runs.iter().map(|r| r.total_duration).sum();

        fragments.push(TrackFragment {
            track: tfhd.track,
            decode_time,
            duration,
            data,
        });
    }

    Ok(fragments)
}
