//! Box serialization for rewritten init segments and fragments.

use bytes::BufMut;

const HEADER_LEN: usize = 8;

/// `size | type | children...` with a 32-bit size.
pub(crate) fn write_container_box(box_type: &[u8; 4], children: &[&[u8]]) -> Vec<u8> {
    let len = HEADER_LEN + children.iter().map(|c| c.len()).sum::<usize>();
    let mut out = Vec::with_capacity(len);
    out.put_u32(len as u32);
    out.put_slice(box_type);
    for child in children {
        out.put_slice(child);
    }
    out
}

pub(crate) fn write_box(box_type: &[u8; 4], content: &[u8]) -> Vec<u8> {
    write_container_box(box_type, &[content])
}

/// Version and 24-bit flags of a full box.
pub(crate) fn fullbox_header(version: u8, flags: u32) -> [u8; 4] {
    (u32::from(version) << 24 | (flags & 0x00ff_ffff)).to_be_bytes()
}

/// Stand-in `ftyp` for movies that start at `moov`.
pub(crate) fn write_ftyp() -> Vec<u8> {
    let mut content = Vec::with_capacity(20);
    content.put_slice(b"isom");
    content.put_u32(0x200);
    for brand in [b"isom", b"iso6", b"mp41"] {
        content.put_slice(brand);
    }
    write_box(b"ftyp", &content)
}

/// `trex` for `track_id` with zeroed sample defaults.
pub(crate) fn write_trex(track_id: u32) -> Vec<u8> {
    let mut content = Vec::with_capacity(24);
    content.put_slice(&fullbox_header(0, 0));
    content.put_u32(track_id);
    content.put_u32(1);
    content.put_bytes(0, 12);
    write_box(b"trex", &content)
}

/// Header of an `mdat` carrying `payload_len` bytes. Uses the 64-bit
/// `largesize` form only when the box would not fit a 32-bit size.
pub(crate) fn write_mdat_header(payload_len: u64) -> Vec<u8> {
    let compact = payload_len + HEADER_LEN as u64;
    let mut out = Vec::with_capacity(16);
    match u32::try_from(compact) {
        Ok(size) => {
            out.put_u32(size);
            out.put_slice(b"mdat");
        }
        Err(_) => {
            out.put_u32(1);
            out.put_slice(b"mdat");
            out.put_u64(payload_len + 16);
        }
    }
    out
}
