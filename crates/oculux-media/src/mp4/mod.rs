//! MP4 container parsing.
//!
//! Only what progressive fMP4 playback needs: top-level box framing, the
//! `moov` header, and codec strings for the sample descriptions.

mod atoms;
mod codec;
mod movie;

pub use atoms::{
    children, find_child, fullbox_header, read_u16, read_u32, read_u64, Atom, AtomType, Child,
    Children,
};
pub use codec::codec_string;
pub use movie::{Movie, TrackBox, TrackDefaults};
