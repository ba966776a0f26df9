//! Fragmented MP4 (fMP4) demuxing.
//!
//! The demuxer consumes `ftyp`/`moov` plus `moof`+`mdat` pairs and emits
//! per-track segments:
//! - Init segment: `ftyp` + `moov` reduced to one `trak` and its `trex`
//! - Media segment: one or more single-track `moof` + `mdat` pairs

pub(crate) mod boxes;
mod demuxer;
mod fragment;
mod index;
mod init;
#[cfg(any(test, feature = "fixtures"))]
pub mod writer;

pub use demuxer::Fmp4Demuxer;
pub use fragment::{split_fragment, TrackFragment};
pub use index::{SeekIndex, SeekPoint};
pub use init::build_init_segment;
