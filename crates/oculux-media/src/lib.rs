//! Oculux-Media: fragmented MP4 demuxing for progressive playback.
//!
//! Plaintext arrives in arbitrary chunks tagged with their offset in the
//! decoded stream. The demuxer reassembles top-level boxes, announces the
//! movie once `moov` is complete, and from then on turns every `moof`+`mdat`
//! pair into per-track media segments a playback sink can append directly.
//!
//! # Modules
//!
//! - `mp4` - box headers, `moov` parsing, codec string derivation
//! - `fmp4` - init segment construction, fragment splitting, seek index
//! - `demux` - the [`Demuxer`] contract and its event types
//!
//! # Segmentation
//!
//! Segments are produced per track:
//!
//! 1. An initialization segment (`ftyp` + `moov` reduced to one `trak`)
//! 2. Media segments, each holding `fragments_per_segment` fragments whose
//!    `moof` only describes that track and whose `mdat` only carries its
//!    samples

pub mod demux;
pub mod error;
pub mod fmp4;
pub mod mp4;

pub use demux::{
    DecodedTrack, DemuxEvent, Demuxer, MediaSegment, MovieInfo, SegmentKind, SegmentOptions,
};
pub use error::{Error, Result};
pub use fmp4::Fmp4Demuxer;
