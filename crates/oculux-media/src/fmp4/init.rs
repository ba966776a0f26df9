//! Per-track initialization segments.

use super::boxes;
use crate::mp4::Movie;
use crate::{Error, Result};
use bytes::Bytes;
use oculux_common::TrackId;

/// Build `ftyp` + `moov` describing only `track`.
///
/// The original `mvhd`, `trak` and `trex` boxes are reused verbatim; `mvex`
/// is rebuilt around the single `trex` (plus `mehd` when present). A
/// generic `ftyp` is used when the stream did not start with one.
pub fn build_init_segment(ftyp: Option<&[u8]>, movie: &Movie, track: TrackId) -> Result<Bytes> {
    let track_box = movie
        .track(track)
        .ok_or_else(|| Error::invalid_mp4(format!("no trak for track {track}")))?;

    let generated_trex;
    let trex: &[u8] = match &track_box.trex {
        Some(raw) => raw,
        None => {
            generated_trex = boxes::write_trex(track.get());
            &generated_trex
        }
    };

    let mvex = match &movie.mehd {
        Some(mehd) => boxes::write_container_box(b"mvex", &[&mehd[..], trex]),
        None => boxes::write_container_box(b"mvex", &[trex]),
    };
    let moov = boxes::write_container_box(
        b"moov",
        &[&movie.mvhd[..], &track_box.trak[..], &mvex[..]],
    );

    let generated_ftyp;
    let ftyp: &[u8] = match ftyp {
        Some(raw) => raw,
        None => {
            generated_ftyp = boxes::write_ftyp();
            &generated_ftyp
        }
    };

    let mut out = Vec::with_capacity(ftyp.len() + moov.len());
    out.extend_from_slice(ftyp);
    out.extend_from_slice(&moov);
    Ok(Bytes::from(out))
}
